// HLS download pipeline: manifest resolution, batched segment download and stitching
pub mod client;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod manifest;
pub mod parser;
pub mod remux;
pub mod retry;
pub mod scheduler;
pub mod session;
pub mod stitcher;
pub mod uri;

// Export common types for ease of use
pub use client::{build_client, merge_headers};
pub use config::{
    DownloaderConfig, FetcherConfig, HlsConfig, ManifestConfig, RemuxBackend, RemuxConfig,
    SchedulerConfig,
};
pub use error::HlsError;
pub use fetcher::{SegmentDownloader, SegmentFetcher};
pub use manifest::{ManifestResolver, ManifestResult, Segment, Variant, VariantSelectionPolicy};
pub use parser::{Resolution, SegmentByteRange};
pub use remux::{
    ConcatEngine, ConcatJob, EnvironmentCapability, FfmpegEngine, RemuxEngine, check_environment,
    create_engine,
};
pub use scheduler::{DownloadOutcome, SegmentOutcomes, SegmentScheduler};
pub use session::{DownloadSession, EventListener, SessionEvent, SessionPhase, SessionState};
pub use stitcher::Stitcher;
pub use uri::UriRewriter;
