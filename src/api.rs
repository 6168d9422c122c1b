// API routes and handlers
use crate::decode::decode_rgb;
use crate::error::CaptionError;
use crate::state::AppState;
use actix_cors::Cors;
use actix_multipart::Multipart;
use actix_web::{get, post, web, HttpResponse, Responder};
use futures_util::TryStreamExt;
use log::{debug, error, info};
use serde::Serialize;

const IMAGE_FIELD: &str = "image";

#[derive(Serialize)]
pub struct CaptionResponse {
    description: String,
}

/// Cross-origin requests are accepted from anywhere.
pub fn cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allow_any_method()
        .allow_any_header()
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(caption).service(health);
}

#[post("/caption")]
pub async fn caption(
    state: web::Data<AppState>,
    payload: Multipart,
) -> Result<web::Json<CaptionResponse>, CaptionError> {
    let bytes = read_image_field(payload, &state).await?;
    debug!("received {} image bytes", bytes.len());

    let captioner = state.captioner.clone();
    let start = std::time::Instant::now();

    // decoding and inference are CPU bound, keep them off the http workers
    let description = web::block(move || {
        let image = decode_rgb(&bytes)?;
        captioner.caption(&image)
    })
    .await
    .map_err(anyhow::Error::from)
    .and_then(|result| result)
    .map_err(|err| {
        error!("captioning failed: {err:#}");
        CaptionError::from(err)
    })?;

    info!("captioned image in {:.2?}: {description:?}", start.elapsed());
    Ok(web::Json(CaptionResponse { description }))
}

#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().body("OK")
}

/// Collect the bytes of the first `image` file part, skipping any other parts.
/// A part only counts as a file when its content disposition names a filename.
async fn read_image_field(
    mut payload: Multipart,
    state: &AppState,
) -> Result<Vec<u8>, CaptionError> {
    let limit = state.max_upload_bytes();
    loop {
        let mut field = match payload.try_next().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err(CaptionError::MissingImage),
            Err(err) => {
                // not a readable form, so there is no image part either
                debug!("unreadable multipart body: {err}");
                return Err(CaptionError::MissingImage);
            }
        };
        let is_file = field
            .content_disposition()
            .and_then(|disposition| disposition.get_filename())
            .is_some();
        if field.name() != Some(IMAGE_FIELD) || !is_file {
            continue;
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|err| anyhow::anyhow!("failed to read image upload: {err}"))?
        {
            if let (Some(limit), Some(limit_mb)) = (limit, state.max_upload_mb) {
                if bytes.len() + chunk.len() > limit {
                    return Err(CaptionError::TooLarge(limit_mb));
                }
            }
            bytes.extend_from_slice(&chunk);
        }
        return Ok(bytes);
    }
}
