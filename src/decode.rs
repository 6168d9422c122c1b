// Uploaded image decoding
use image::RgbImage;

/// Decode encoded image bytes (format sniffed from the content) into an
/// 8-bit RGB buffer, whatever the source color type.
pub fn decode_rgb(bytes: &[u8]) -> anyhow::Result<RgbImage> {
    let image = image::load_from_memory(bytes)?;
    Ok(image.to_rgb8())
}
