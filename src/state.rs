// Shared state for the request handlers
use crate::models::Captioner;
use std::sync::Arc;

const MB_TO_B: usize = 1024 * 1024;

/// Built once in `main` after the model has loaded, read-only afterwards.
#[derive(Clone)]
pub struct AppState {
    pub captioner: Arc<dyn Captioner>,
    /// Opt-in upload limit, `None` accepts any size.
    pub max_upload_mb: Option<usize>,
}

impl AppState {
    pub fn new(captioner: Arc<dyn Captioner>, max_upload_mb: Option<usize>) -> Self {
        Self {
            captioner,
            max_upload_mb,
        }
    }

    pub fn max_upload_bytes(&self) -> Option<usize> {
        self.max_upload_mb.map(|mb| mb.saturating_mul(MB_TO_B))
    }
}
