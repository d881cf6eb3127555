//! Download session: drives one job from manifest URL to stitched output.
//!
//! A session runs at most one job at a time and moves through
//! `Idle → Starting → FetchingManifest → [AwaitingQualitySelection] →
//! DownloadingSegments → Stitching → Finished | Failed`. Every transition is
//! published to the optional event listener together with a status message.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::HlsError;
use crate::client::{build_client, merge_headers};
use crate::config::HlsConfig;
use crate::fetcher::SegmentFetcher;
use crate::manifest::{ManifestResolver, ManifestResult, Segment, Variant, VariantSelectionPolicy};
use crate::remux::{EnvironmentCapability, check_environment, create_engine};
use crate::scheduler::SegmentScheduler;
use crate::stitcher::Stitcher;

/// Nested master playlists deeper than this are treated as a broken manifest.
const MAX_VARIANT_DEPTH: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Starting,
    FetchingManifest,
    AwaitingQualitySelection { variants: Vec<Variant> },
    DownloadingSegments,
    Stitching,
    Finished { output: Bytes },
    Failed { message: String },
}

/// Data-free view of [`SessionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Starting,
    FetchingManifest,
    AwaitingQualitySelection,
    DownloadingSegments,
    Stitching,
    Finished,
    Failed,
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match self {
            Self::Idle => SessionPhase::Idle,
            Self::Starting => SessionPhase::Starting,
            Self::FetchingManifest => SessionPhase::FetchingManifest,
            Self::AwaitingQualitySelection { .. } => SessionPhase::AwaitingQualitySelection,
            Self::DownloadingSegments => SessionPhase::DownloadingSegments,
            Self::Stitching => SessionPhase::Stitching,
            Self::Finished { .. } => SessionPhase::Finished,
            Self::Failed { .. } => SessionPhase::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. } | Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged { phase: SessionPhase, message: String },
    /// Fraction of segment batches completed, in `0.0..=1.0`
    Progress(f64),
}

pub type EventListener = Arc<dyn Fn(SessionEvent) + Send + Sync>;

pub struct DownloadSession {
    config: Arc<HlsConfig>,
    client: Client,
    resolver: ManifestResolver,
    stitcher: Stitcher,
    capability: EnvironmentCapability,
    listener: Option<EventListener>,
    cancel: CancellationToken,
    job_token: CancellationToken,
    state: SessionState,
    message: String,
    headers: HashMap<String, String>,
    progress: Arc<AtomicU64>,
    failed_segments: Vec<usize>,
    variant_depth: usize,
}

impl DownloadSession {
    /// Validates `config`, checks that the remux backend is usable and builds
    /// the HTTP client shared by every job of this session.
    pub async fn new(config: HlsConfig) -> Result<Self, HlsError> {
        config.validate()?;
        let capability = check_environment(&config.remux).await?;
        info!(engine = capability.engine, "Remux backend available");

        let client = build_client(&config.base)?;
        let config = Arc::new(config);
        let resolver = ManifestResolver::new(client.clone(), Arc::clone(&config));
        let stitcher = Stitcher::new(config.remux.teardown_grace);
        let cancel = CancellationToken::new();

        Ok(Self {
            config,
            client,
            resolver,
            stitcher,
            capability,
            listener: None,
            job_token: cancel.child_token(),
            cancel,
            state: SessionState::Idle,
            message: String::new(),
            headers: HashMap::new(),
            progress: Arc::new(AtomicU64::new(0f64.to_bits())),
            failed_segments: Vec::new(),
            variant_depth: 0,
        })
    }

    /// Jobs are cancelled together with `token`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.job_token = token.child_token();
        self.cancel = token;
        self
    }

    pub fn on_event(mut self, listener: EventListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn capability(&self) -> &EnvironmentCapability {
        &self.capability
    }

    pub fn progress(&self) -> f64 {
        f64::from_bits(self.progress.load(Ordering::Relaxed))
    }

    /// Variants offered while awaiting a quality selection.
    pub fn variants(&self) -> Option<&[Variant]> {
        match &self.state {
            SessionState::AwaitingQualitySelection { variants } => Some(variants),
            _ => None,
        }
    }

    /// Stitched output of a finished job. Stays available until the next
    /// `submit` or `reset`.
    pub fn output(&self) -> Option<&Bytes> {
        match &self.state {
            SessionState::Finished { output } => Some(output),
            _ => None,
        }
    }

    /// Manifest indices of the segments that could not be downloaded in the last job.
    pub fn failed_segments(&self) -> &[usize] {
        &self.failed_segments
    }

    /// Cancels the job in flight, if any.
    pub fn cancel(&self) {
        self.job_token.cancel();
    }

    /// Drops the current job and returns to `Idle`.
    pub fn reset(&mut self) {
        self.job_token.cancel();
        self.job_token = self.cancel.child_token();
        self.headers.clear();
        self.failed_segments.clear();
        self.variant_depth = 0;
        self.progress.store(0f64.to_bits(), Ordering::Relaxed);
        if self.state == SessionState::Idle {
            self.message.clear();
        } else {
            self.transition(SessionState::Idle, "");
        }
    }

    /// Starts a new job for `url`.
    ///
    /// Returns once the job is finished, has failed, or needs a quality
    /// selection. On error the session is left in `Failed` and the error is
    /// returned as well.
    pub async fn submit(
        &mut self,
        url: &str,
        headers: HashMap<String, String>,
    ) -> Result<(), HlsError> {
        self.reset();
        self.headers = headers;
        self.transition(SessionState::Starting, "Job started");
        info!(url = %url, "Job started");
        self.process(url.to_string()).await
    }

    /// Continues a job waiting in `AwaitingQualitySelection` with the variant at `index`.
    ///
    /// In any other state, or with an out of range index, the state is left
    /// untouched and [`HlsError::InvalidState`] is returned.
    pub async fn select_variant(&mut self, index: usize) -> Result<(), HlsError> {
        let uri = match &self.state {
            SessionState::AwaitingQualitySelection { variants } => match variants.get(index) {
                Some(variant) => {
                    info!(
                        variant = %variant.name,
                        bandwidth = variant.bandwidth,
                        "Variant selected"
                    );
                    variant.uri.clone()
                }
                None => {
                    return Err(HlsError::invalid_state(format!(
                        "variant index {index} out of range (0..{})",
                        variants.len()
                    )));
                }
            },
            other => {
                return Err(HlsError::invalid_state(format!(
                    "cannot select a variant while {}",
                    other.phase()
                )));
            }
        };
        self.process(uri).await
    }

    /// Runs a whole job, answering every quality selection with `policy`, and
    /// returns the stitched output.
    pub async fn run(
        &mut self,
        url: &str,
        headers: HashMap<String, String>,
        policy: &VariantSelectionPolicy,
    ) -> Result<Bytes, HlsError> {
        self.submit(url, headers).await?;
        while let Some(variants) = self.variants() {
            let Some(index) = policy.select(variants) else {
                let e = HlsError::configuration(format!("no variant matches {policy:?}"));
                return Err(self.fail(e));
            };
            self.select_variant(index).await?;
        }
        self.output()
            .cloned()
            .ok_or_else(|| HlsError::invalid_state(format!("job ended while {}", self.phase())))
    }

    async fn process(&mut self, url: String) -> Result<(), HlsError> {
        self.transition(SessionState::FetchingManifest, "Fetching segments");
        if self.job_token.is_cancelled() {
            return Err(self.fail(HlsError::Cancelled));
        }

        let result = tokio::select! {
            _ = self.job_token.cancelled() => ManifestResult::Error(HlsError::Cancelled),
            result = self.resolver.resolve(&url, &self.headers) => result,
        };

        match result {
            ManifestResult::Error(e) => Err(self.fail(e)),
            ManifestResult::PlaylistList(variants) => {
                self.variant_depth += 1;
                if self.variant_depth > MAX_VARIANT_DEPTH {
                    return Err(self.fail(HlsError::manifest_parse(
                        "too many nested master playlists",
                    )));
                }
                debug!(count = variants.len(), "Manifest offers quality variants");
                self.transition(
                    SessionState::AwaitingQualitySelection { variants },
                    "Select a quality",
                );
                Ok(())
            }
            ManifestResult::SegmentList(segments) => match self.download(segments).await {
                Ok(output) => {
                    info!(size = output.len(), "Stitching segments finished");
                    self.transition(
                        SessionState::Finished { output },
                        "Stitching segments finished",
                    );
                    Ok(())
                }
                Err(e) => Err(self.fail(e)),
            },
        }
    }

    async fn download(&mut self, segments: Vec<Segment>) -> Result<Bytes, HlsError> {
        self.transition(SessionState::DownloadingSegments, "Downloading segment chunks");

        let request_headers = merge_headers(&self.config.base.headers, &self.headers)?;
        let fetcher = SegmentFetcher::new(
            self.client.clone(),
            Arc::clone(&self.config),
            request_headers,
        );
        let scheduler = SegmentScheduler::new(&self.config.scheduler, Arc::new(fetcher));

        let progress = Arc::clone(&self.progress);
        let listener = self.listener.clone();
        let on_progress = move |fraction: f64| {
            progress.store(fraction.to_bits(), Ordering::Relaxed);
            if let Some(listener) = &listener {
                listener(SessionEvent::Progress(fraction));
            }
        };

        let token = self.job_token.clone();
        let outcomes = scheduler.download(&segments, &on_progress, &token).await?;
        self.failed_segments = outcomes.failed_indices();
        if !self.failed_segments.is_empty() {
            warn!(
                failed = self.failed_segments.len(),
                total = segments.len(),
                "Some segments could not be downloaded and will be missing from the output"
            );
        }

        self.transition(SessionState::Stitching, "Stitching segments");
        let engine = create_engine(&self.config.remux);
        self.stitcher.stitch(engine, outcomes, &token).await
    }

    fn fail(&mut self, error: HlsError) -> HlsError {
        warn!(error = %error, "Job failed");
        let message = error.to_string();
        self.transition(
            SessionState::Failed {
                message: message.clone(),
            },
            message,
        );
        error
    }

    fn transition(&mut self, state: SessionState, message: impl Into<String>) {
        let phase = state.phase();
        self.state = state;
        self.message = message.into();
        debug!(phase = %phase, message = %self.message, "Session state changed");
        if let Some(listener) = &self.listener {
            listener(SessionEvent::StateChanged {
                phase,
                message: self.message.clone(),
            });
        }
    }
}
