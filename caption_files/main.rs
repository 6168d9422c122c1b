use anyhow::{Context, Result};
use caption_server::config::{
    max_tokens_parser, DEFAULT_MAX_TOKENS, DEFAULT_MODEL_ID, DEFAULT_REVISION,
};
use caption_server::decode::decode_rgb;
use caption_server::models::blip::BlipInferenceModel;
use caption_server::models::Captioner;
use clap::Parser;
use log::error;

/// Caption local image files with a pretrained BLIP model
#[derive(Parser, Debug)]
#[command(version, long_about = None)]
struct Args {
    /// Images to caption.
    #[arg(required = true)]
    paths: Vec<String>,

    /// Hub repository of the captioning model.
    #[arg(long, default_value = DEFAULT_MODEL_ID)]
    model_id: String,

    /// Revision holding `model.safetensors`.
    #[arg(long, default_value = DEFAULT_REVISION)]
    revision: String,

    /// Maximum caption length in tokens, including the start token.
    #[arg(long, default_value_t = DEFAULT_MAX_TOKENS, value_parser = max_tokens_parser())]
    max_tokens: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let blip_model = BlipInferenceModel::load(
        &args.model_id,
        &args.revision,
        args.max_tokens,
        candle::Device::Cpu,
    )?;

    let mut failures = 0;
    for path in &args.paths {
        match caption_file(&blip_model, path) {
            Ok(caption) => println!("{path}: {caption}"),
            Err(e) => {
                error!("{path}: {e:#}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} images could not be captioned", args.paths.len());
    }
    Ok(())
}

fn caption_file(model: &BlipInferenceModel, path: &str) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {path}"))?;
    let image = decode_rgb(&bytes)?;
    model.caption(&image)
}
