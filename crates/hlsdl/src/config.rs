use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::HlsError;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// HTTP client options shared by manifest and segment requests
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Headers sent with every request. Per-job headers are merged on top.
    pub headers: HeaderMap,

    pub danger_accept_invalid_certs: bool,

    /// Maximum idle connections to keep per host
    pub pool_max_idle_per_host: usize,

    /// Duration to keep idle connections alive before closing
    pub pool_idle_timeout: Duration,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: DownloaderConfig::get_default_headers(),
            danger_accept_invalid_certs: false,
            pool_max_idle_per_host: 10,
            pool_idle_timeout: Duration::from_secs(30),
        }
    }
}

impl DownloaderConfig {
    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));

        default_headers.insert(reqwest::header::CONNECTION, HeaderValue::from_static("keep-alive"));

        default_headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5"),
        );
        default_headers
    }
}

// --- Manifest Configuration ---
#[derive(Debug, Clone)]
pub struct ManifestConfig {
    pub fetch_timeout: Duration,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(15),
        }
    }
}

// --- Scheduler Configuration ---
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Segments fetched concurrently per batch (default: 10)
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { batch_size: 10 }
    }
}

// --- Fetcher Configuration ---
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub segment_download_timeout: Duration,
    /// Retries after the first attempt. 0 means a single attempt per segment.
    pub max_segment_retries: u32,
    pub segment_retry_delay_base: Duration, // Base for exponential backoff
    pub segment_retry_max_delay: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            segment_download_timeout: Duration::from_secs(30),
            max_segment_retries: 2,
            segment_retry_delay_base: Duration::from_millis(500),
            segment_retry_max_delay: Duration::from_secs(5),
        }
    }
}

// --- Remux Configuration ---
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemuxBackend {
    /// Concatenate with an external ffmpeg binary using stream copy
    Ffmpeg { binary: PathBuf },
    /// Concatenate segment bytes in memory (MPEG-TS only)
    Concat,
}

impl Default for RemuxBackend {
    fn default() -> Self {
        RemuxBackend::Ffmpeg {
            binary: PathBuf::from("ffmpeg"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemuxConfig {
    pub backend: RemuxBackend,
    /// Delay between reading the output and tearing the engine down
    pub teardown_grace: Duration,
}

impl Default for RemuxConfig {
    fn default() -> Self {
        Self {
            backend: RemuxBackend::default(),
            teardown_grace: Duration::from_secs(1),
        }
    }
}

// --- Top-Level Configuration ---
#[derive(Debug, Clone, Default)]
pub struct HlsConfig {
    /// Base downloader configuration
    pub base: DownloaderConfig,
    pub manifest: ManifestConfig,
    pub scheduler: SchedulerConfig,
    pub fetcher: FetcherConfig,
    pub remux: RemuxConfig,
}

impl HlsConfig {
    pub fn validate(&self) -> Result<(), HlsError> {
        if self.scheduler.batch_size == 0 {
            return Err(HlsError::configuration("batch size must be at least 1"));
        }
        if self.fetcher.segment_retry_max_delay < self.fetcher.segment_retry_delay_base {
            return Err(HlsError::configuration(
                "retry max delay must not be smaller than the base delay",
            ));
        }
        Ok(())
    }
}
