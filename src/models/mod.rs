// Captioning models
use candle::Tensor;
use image::RgbImage;

pub mod blip;

/// A pretrained image captioning model, split into the three steps the
/// server runs for each request.
pub trait Captioner: Send + Sync {
    /// Turn a decoded image into model-ready pixel values.
    fn preprocess(&self, image: &RgbImage) -> anyhow::Result<Tensor>;

    /// Produce the output token ids for preprocessed pixel values.
    fn generate(&self, pixel_values: &Tensor) -> anyhow::Result<Vec<u32>>;

    /// Turn token ids into text, dropping special tokens.
    fn decode(&self, token_ids: &[u32]) -> anyhow::Result<String>;

    fn caption(&self, image: &RgbImage) -> anyhow::Result<String> {
        let pixel_values = self.preprocess(image)?;
        let token_ids = self.generate(&pixel_values)?;
        self.decode(&token_ids)
    }
}
