// Server command line options
use clap::builder::RangedU64ValueParser;
use clap::Parser;

pub const DEFAULT_MODEL_ID: &str = "Salesforce/blip-image-captioning-large";
// the main branch only ships pytorch weights
pub const DEFAULT_REVISION: &str = "refs/pr/18";
/// Matches `max_length` in the model's generation config.
pub const DEFAULT_MAX_TOKENS: usize = 20;
// the start token plus at least one generated token
pub const MIN_MAX_TOKENS: usize = 2;

/// Parser for `--max-tokens`, shared by both binaries.
pub fn max_tokens_parser() -> RangedU64ValueParser<usize> {
    RangedU64ValueParser::<usize>::new().range(MIN_MAX_TOKENS as u64..)
}

#[derive(Parser, Debug, Clone)]
#[command(
    version,
    about = "Caption uploaded images with a pretrained BLIP model",
    long_about = None
)]
pub struct Args {
    /// IP to serve on.
    #[arg(long, env = "CAPTION_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to serve on.
    #[arg(short, long, env = "CAPTION_PORT", default_value_t = 5000)]
    pub port: u16,

    /// Hub repository of the captioning model.
    #[arg(long, env = "CAPTION_MODEL_ID", default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,

    /// Revision holding `model.safetensors`.
    #[arg(long, env = "CAPTION_REVISION", default_value = DEFAULT_REVISION)]
    pub revision: String,

    /// Maximum caption length in tokens, including the start token.
    #[arg(
        long,
        env = "CAPTION_MAX_TOKENS",
        default_value_t = DEFAULT_MAX_TOKENS,
        value_parser = max_tokens_parser()
    )]
    pub max_tokens: usize,

    /// Largest accepted upload, in MB. Uploads are unlimited when unset.
    #[arg(long, env = "CAPTION_MAX_UPLOAD_MB")]
    pub max_upload_mb: Option<usize>,

    /// Number of HTTP workers. Defaults to the number of physical cores.
    #[arg(long, env = "CAPTION_WORKERS")]
    pub workers: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_blip_large_deployment() {
        let args = Args::try_parse_from(["caption_server"]).unwrap();
        assert_eq!(args.host, "127.0.0.1");
        assert_eq!(args.port, 5000);
        assert_eq!(args.model_id, DEFAULT_MODEL_ID);
        assert_eq!(args.revision, DEFAULT_REVISION);
        assert_eq!(args.max_tokens, DEFAULT_MAX_TOKENS);
        assert!(args.max_upload_mb.is_none());
        assert!(args.workers.is_none());
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "caption_server",
            "--port",
            "8080",
            "--max-tokens",
            "30",
            "--workers",
            "2",
            "--max-upload-mb",
            "10",
        ])
        .unwrap();
        assert_eq!(args.port, 8080);
        assert_eq!(args.max_tokens, 30);
        assert_eq!(args.workers, Some(2));
        assert_eq!(args.max_upload_mb, Some(10));
    }

    #[test]
    fn max_tokens_must_leave_room_for_a_caption() {
        for too_small in ["0", "1"] {
            assert!(Args::try_parse_from(["caption_server", "--max-tokens", too_small]).is_err());
        }
        let args = Args::try_parse_from(["caption_server", "--max-tokens", "2"]).unwrap();
        assert_eq!(args.max_tokens, MIN_MAX_TOKENS);
    }

    #[test]
    fn rejects_bad_port() {
        assert!(Args::try_parse_from(["caption_server", "--port", "http"]).is_err());
    }
}
