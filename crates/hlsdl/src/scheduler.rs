// Segment Scheduler: downloads a segment list in fixed-size batches.
//
// Batches run one after another; the segments of a batch are in flight together
// and the next batch starts only once all of them have settled. A failed segment
// is recorded and skipped, it never aborts the job.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::HlsError;
use crate::config::SchedulerConfig;
use crate::fetcher::SegmentDownloader;
use crate::manifest::Segment;

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    Success(Bytes),
    Failure(String),
}

/// Per-segment results keyed by `original_index`.
#[derive(Debug, Default)]
pub struct SegmentOutcomes {
    outcomes: BTreeMap<usize, DownloadOutcome>,
}

impl SegmentOutcomes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, original_index: usize, outcome: DownloadOutcome) {
        self.outcomes.insert(original_index, outcome);
    }

    pub fn get(&self, original_index: usize) -> Option<&DownloadOutcome> {
        self.outcomes.get(&original_index)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, DownloadOutcome::Success(_)))
            .count()
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, DownloadOutcome::Failure(_)))
            .map(|(index, _)| *index)
            .collect()
    }

    /// Successful segments only, ascending by `original_index`.
    pub fn into_successes(self) -> Vec<(usize, Bytes)> {
        let mut successes: Vec<(usize, Bytes)> = self
            .outcomes
            .into_iter()
            .filter_map(|(index, outcome)| match outcome {
                DownloadOutcome::Success(bytes) => Some((index, bytes)),
                DownloadOutcome::Failure(_) => None,
            })
            .collect();
        successes.sort_by_key(|(index, _)| *index);
        successes
    }
}

impl FromIterator<(usize, DownloadOutcome)> for SegmentOutcomes {
    fn from_iter<I: IntoIterator<Item = (usize, DownloadOutcome)>>(iter: I) -> Self {
        Self {
            outcomes: iter.into_iter().collect(),
        }
    }
}

pub struct SegmentScheduler {
    batch_size: usize,
    segment_fetcher: Arc<dyn SegmentDownloader>,
}

impl SegmentScheduler {
    pub fn new(config: &SchedulerConfig, segment_fetcher: Arc<dyn SegmentDownloader>) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            segment_fetcher,
        }
    }

    pub fn batch_count(&self, segments: usize) -> usize {
        segments.div_ceil(self.batch_size)
    }

    /// Downloads every segment and returns the per-segment outcomes.
    ///
    /// `on_progress` receives `completed_batches / total_batches` before each
    /// batch starts and a final `1.0` once all batches have settled. The only
    /// error is [`HlsError::Cancelled`].
    pub async fn download(
        &self,
        segments: &[Segment],
        on_progress: &(dyn Fn(f64) + Send + Sync),
        token: &CancellationToken,
    ) -> Result<SegmentOutcomes, HlsError> {
        let total_batches = self.batch_count(segments.len());
        let mut outcomes = SegmentOutcomes::new();
        info!(
            segments = segments.len(),
            batches = total_batches,
            batch_size = self.batch_size,
            "Starting segment download"
        );

        for (batch_index, batch) in segments.chunks(self.batch_size).enumerate() {
            if token.is_cancelled() {
                return Err(HlsError::Cancelled);
            }
            on_progress(batch_index as f64 / total_batches as f64);
            debug!(batch = batch_index, size = batch.len(), "Downloading batch");

            let fetches = batch.iter().map(|segment| async move {
                let result = self.segment_fetcher.download_segment(segment, token).await;
                (segment.original_index, result)
            });
            let results = tokio::select! {
                _ = token.cancelled() => return Err(HlsError::Cancelled),
                results = join_all(fetches) => results,
            };

            for (index, result) in results {
                match result {
                    Ok(bytes) => outcomes.record(index, DownloadOutcome::Success(bytes)),
                    Err(HlsError::Cancelled) => return Err(HlsError::Cancelled),
                    Err(e) => {
                        warn!(index, error = %e, "Segment download failed, skipping");
                        outcomes.record(index, DownloadOutcome::Failure(e.to_string()));
                    }
                }
            }
        }
        on_progress(1.0);

        let failed = outcomes.len() - outcomes.success_count();
        info!(
            downloaded = outcomes.success_count(),
            failed, "Segment download finished"
        );
        Ok(outcomes)
    }
}
