// BLIP image captioning model
use std::sync::{Mutex, MutexGuard, PoisonError};

use candle::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::blip::{BlipForConditionalGeneration, Config};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use image::imageops::{self, FilterType};
use image::RgbImage;
use log::{debug, info};
use tokenizers::Tokenizer;

use super::Captioner;

pub const IMAGE_SIZE: usize = 384;
const IMAGE_MEAN: [f32; 3] = [0.48145466, 0.4578275, 0.40821073];
const IMAGE_STD: [f32; 3] = [0.26862954, 0.26130258, 0.27577711];

// [DEC] starts the caption, [SEP] ends it
const BOS_TOKEN_ID: u32 = 30522;
const SEP_TOKEN_ID: u32 = 102;

const SEED: u64 = 1337;

pub struct BlipInferenceModel {
    // the text decoder keeps a kv cache, so one generation at a time
    model: Mutex<BlipForConditionalGeneration>,
    tokenizer: Tokenizer,
    device: Device,
    max_tokens: usize,
}

impl BlipInferenceModel {
    /// Fetch the weights and tokenizer from the hub and build the model.
    ///
    /// Only the `blip-image-captioning-large` architecture is supported, the
    /// weights revision must carry a `model.safetensors` file.
    pub fn load(
        model_name: &str,
        model_revision: &str,
        max_tokens: usize,
        device: Device,
    ) -> anyhow::Result<Self> {
        info!("loading {model_name} ({model_revision})");
        let start = std::time::Instant::now();

        let api = Api::new()?;
        let weights_filename = api
            .repo(Repo::with_revision(
                model_name.to_string(),
                RepoType::Model,
                model_revision.to_string(),
            ))
            .get("model.safetensors")?;
        let tokenizer_filename = api.model(model_name.to_string()).get("tokenizer.json")?;

        let tokenizer = Tokenizer::from_file(tokenizer_filename).map_err(anyhow::Error::msg)?;

        let config = Config::image_captioning_large();
        let variable_builder = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_filename], DType::F32, &device)?
        };
        let model = BlipForConditionalGeneration::new(&config, variable_builder)?;

        info!("loaded {model_name} in {:.2?}", start.elapsed());
        Ok(Self {
            model: Mutex::new(model),
            tokenizer,
            device,
            max_tokens,
        })
    }
}

// a panicked generation leaves nothing behind that the next one relies on,
// the kv cache is reset before every run
fn lock_model<T>(model: &Mutex<T>) -> MutexGuard<'_, T> {
    model.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resize to the model's input size and normalize each channel, giving a
/// `(3, IMAGE_SIZE, IMAGE_SIZE)` f32 tensor.
pub fn pixel_values(image: &RgbImage, device: &Device) -> anyhow::Result<Tensor> {
    let size = IMAGE_SIZE as u32;
    let resized = imageops::resize(image, size, size, FilterType::CatmullRom);
    let data = Tensor::from_vec(resized.into_raw(), (IMAGE_SIZE, IMAGE_SIZE, 3), device)?
        .permute((2, 0, 1))?;
    let mean = Tensor::new(&IMAGE_MEAN, device)?.reshape((3, 1, 1))?;
    let std = Tensor::new(&IMAGE_STD, device)?.reshape((3, 1, 1))?;
    let pixel_values = (data.to_dtype(DType::F32)? / 255.)?
        .broadcast_sub(&mean)?
        .broadcast_div(&std)?;
    Ok(pixel_values)
}

impl Captioner for BlipInferenceModel {
    fn preprocess(&self, image: &RgbImage) -> anyhow::Result<Tensor> {
        pixel_values(image, &self.device)
    }

    fn generate(&self, pixel_values: &Tensor) -> anyhow::Result<Vec<u32>> {
        let mut model = lock_model(&self.model);
        model.reset_kv_cache();

        let image_embeds = pixel_values.unsqueeze(0)?.apply(model.vision_model())?;

        // no temperature means argmax, so captions are deterministic
        let mut logits_processor = LogitsProcessor::new(SEED, None, None);
        let start_gen = std::time::Instant::now();
        let mut token_ids = vec![BOS_TOKEN_ID];

        // max_tokens counts the BOS token, like `max_length` in the generation config
        for index in 0..self.max_tokens.saturating_sub(1) {
            let context_size = if index > 0 { 1 } else { token_ids.len() };
            let start_pos = token_ids.len().saturating_sub(context_size);
            let input_ids = Tensor::new(&token_ids[start_pos..], &self.device)?.unsqueeze(0)?;

            let logits = model
                .text_decoder()
                .forward(&input_ids, &image_embeds)?
                .squeeze(0)?;
            let logits = logits.get(logits.dim(0)? - 1)?;

            let token = logits_processor.sample(&logits)?;
            if token == SEP_TOKEN_ID {
                break;
            }
            token_ids.push(token);
        }

        debug!(
            "{} tokens generated in {:.2?}",
            token_ids.len(),
            start_gen.elapsed()
        );
        Ok(token_ids)
    }

    fn decode(&self, token_ids: &[u32]) -> anyhow::Result<String> {
        let token_ids = token_ids.strip_prefix(&[BOS_TOKEN_ID]).unwrap_or(token_ids);
        let text = self
            .tokenizer
            .decode(token_ids, true)
            .map_err(anyhow::Error::msg)?;
        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle::IndexOp;
    use image::Rgb;

    #[test]
    fn pixel_values_are_resized_and_normalized() -> anyhow::Result<()> {
        let red = RgbImage::from_pixel(2, 2, Rgb([255, 0, 0]));
        let values = pixel_values(&red, &Device::Cpu)?;

        assert_eq!(values.dims(), &[3, IMAGE_SIZE, IMAGE_SIZE]);
        assert_eq!(values.dtype(), DType::F32);

        let r = values.i((0, 0, 0))?.to_scalar::<f32>()?;
        let g = values.i((1, IMAGE_SIZE - 1, IMAGE_SIZE - 1))?.to_scalar::<f32>()?;
        let b = values.i((2, 100, 200))?.to_scalar::<f32>()?;
        assert!((r - (1.0 - IMAGE_MEAN[0]) / IMAGE_STD[0]).abs() < 1e-2);
        assert!((g + IMAGE_MEAN[1] / IMAGE_STD[1]).abs() < 1e-2);
        assert!((b + IMAGE_MEAN[2] / IMAGE_STD[2]).abs() < 1e-2);
        Ok(())
    }

    #[test]
    fn pixel_values_ignore_aspect_ratio() -> anyhow::Result<()> {
        let wide = RgbImage::from_pixel(640, 20, Rgb([10, 20, 30]));
        let values = pixel_values(&wide, &Device::Cpu)?;
        assert_eq!(values.dims(), &[3, IMAGE_SIZE, IMAGE_SIZE]);
        Ok(())
    }

    #[test]
    fn model_lock_survives_a_panicked_generation() {
        let model = std::sync::Arc::new(Mutex::new(vec![BOS_TOKEN_ID]));

        let panicking = model.clone();
        let result = std::thread::spawn(move || {
            let mut token_ids = lock_model(&*panicking);
            token_ids.push(7);
            panic!("generation blew up");
        })
        .join();
        assert!(result.is_err());
        assert!(model.is_poisoned());

        let mut token_ids = lock_model(&*model);
        token_ids.clear();
        token_ids.push(BOS_TOKEN_ID);
        assert_eq!(*token_ids, vec![BOS_TOKEN_ID]);
    }

    // Downloads the full weights from the hub.
    #[test]
    #[ignore]
    fn captions_a_red_square_deterministically() -> anyhow::Result<()> {
        let model = BlipInferenceModel::load(
            "Salesforce/blip-image-captioning-large",
            "refs/pr/18",
            crate::config::DEFAULT_MAX_TOKENS,
            Device::Cpu,
        )?;
        let red = RgbImage::from_pixel(2, 2, Rgb([255, 0, 0]));

        let first = model.caption(&red)?;
        let second = model.caption(&red)?;

        assert!(!first.is_empty());
        assert_eq!(first, first.to_lowercase());
        assert_eq!(first, second);
        Ok(())
    }
}
