use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use hlsdl_engine::{HlsConfig, RemuxBackend, VariantSelectionPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Engine {
    /// Stream-copy concatenation through an ffmpeg binary
    Ffmpeg,
    /// Byte concatenation in memory, MPEG-TS only
    Concat,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// URL of the HLS manifest (master or media playlist)
    pub url: String,

    /// Request header sent with every request, as `Name: value` (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Output file [default: hls-downloader-YYYY-MM-DD.ts]
    #[arg(short, long, env = "HLSDL_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Variant to download, by name or zero-based index
    #[arg(long, value_name = "NAME|INDEX", conflicts_with_all = ["lowest", "bandwidth"])]
    pub variant: Option<String>,

    /// Download the lowest bitrate variant
    #[arg(long, conflicts_with = "bandwidth")]
    pub lowest: bool,

    /// Download the variant closest to this bitrate (bits per second)
    #[arg(long, value_name = "BITS")]
    pub bandwidth: Option<u64>,

    /// Print the variants offered by the manifest and exit
    #[arg(long)]
    pub list_variants: bool,

    /// Print the variant list as JSON
    #[arg(long, requires = "list_variants")]
    pub json: bool,

    /// Segments downloaded concurrently per batch
    #[arg(long, env = "HLSDL_BATCH_SIZE", default_value_t = 10)]
    pub batch_size: usize,

    /// Retries per segment after a transient failure
    #[arg(long, env = "HLSDL_RETRIES", default_value_t = 2)]
    pub retries: u32,

    /// Timeout in seconds for each manifest and segment request
    #[arg(long, value_name = "SECS", env = "HLSDL_TIMEOUT", default_value_t = 30)]
    pub timeout: u64,

    /// Remux engine used to join the segments
    #[arg(long, value_enum, env = "HLSDL_ENGINE", default_value_t = Engine::Ffmpeg)]
    pub engine: Engine,

    /// Path to the ffmpeg binary
    #[arg(long, env = "HLSDL_FFMPEG_PATH", default_value = "ffmpeg")]
    pub ffmpeg_path: PathBuf,

    /// User agent for all requests
    #[arg(long, env = "HLSDL_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Accept invalid TLS certificates
    #[arg(long)]
    pub insecure: bool,

    /// Enable debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors and hide the progress bar
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    pub fn hls_config(&self) -> HlsConfig {
        let mut config = HlsConfig::default();
        let timeout = Duration::from_secs(self.timeout);

        if let Some(user_agent) = &self.user_agent {
            config.base.user_agent = user_agent.clone();
        }
        config.base.danger_accept_invalid_certs = self.insecure;
        config.manifest.fetch_timeout = timeout;
        config.fetcher.segment_download_timeout = timeout;
        config.fetcher.max_segment_retries = self.retries;
        config.scheduler.batch_size = self.batch_size;
        config.remux.backend = match self.engine {
            Engine::Ffmpeg => RemuxBackend::Ffmpeg {
                binary: self.ffmpeg_path.clone(),
            },
            Engine::Concat => RemuxBackend::Concat,
        };
        config
    }

    pub fn selection_policy(&self) -> VariantSelectionPolicy {
        if let Some(variant) = &self.variant {
            return match variant.parse::<usize>() {
                Ok(index) => VariantSelectionPolicy::Index(index),
                Err(_) => VariantSelectionPolicy::Named(variant.clone()),
            };
        }
        if self.lowest {
            return VariantSelectionPolicy::LowestBitrate;
        }
        match self.bandwidth {
            Some(bits) => VariantSelectionPolicy::ClosestToBitrate(bits),
            None => VariantSelectionPolicy::HighestBitrate,
        }
    }
}
