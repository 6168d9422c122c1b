pub mod api;
pub mod config;
pub mod decode;
pub mod error;
pub mod models;
pub mod state;
