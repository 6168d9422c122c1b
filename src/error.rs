// Errors returned by the caption endpoint
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum CaptionError {
    #[error("No image file provided")]
    MissingImage,

    /// Only raised when the operator configured an upload limit.
    #[error("Image exceeds the {0} MB upload limit")]
    TooLarge(usize),

    /// Decoding, preprocessing, inference or detokenizing failed.
    #[error("{0}")]
    Processing(#[from] anyhow::Error),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ResponseError for CaptionError {
    fn status_code(&self) -> StatusCode {
        match self {
            CaptionError::MissingImage => StatusCode::BAD_REQUEST,
            CaptionError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            CaptionError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}
