// Stitcher: restores manifest order and hands the segments to a remux engine.

use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::HlsError;
use crate::remux::{ConcatJob, RemuxEngine};
use crate::scheduler::SegmentOutcomes;

pub const OUTPUT_FILE: &str = "output.ts";

pub struct Stitcher {
    teardown_grace: Duration,
}

impl Stitcher {
    pub fn new(teardown_grace: Duration) -> Self {
        Self { teardown_grace }
    }

    /// Joins the successful segments, ordered by `original_index`, into one buffer.
    ///
    /// The engine belongs to this call. It is terminated right away on failure
    /// and after the grace delay on success, on a background task.
    pub async fn stitch(
        &self,
        mut engine: Box<dyn RemuxEngine>,
        outcomes: SegmentOutcomes,
        token: &CancellationToken,
    ) -> Result<Bytes, HlsError> {
        let segments = outcomes.into_successes();
        if segments.is_empty() {
            return Err(HlsError::stitch("no segment was downloaded successfully"));
        }

        match self.concat(engine.as_mut(), segments, token).await {
            Ok(output) => {
                let grace = self.teardown_grace;
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    release(engine.as_mut()).await;
                });
                Ok(output)
            }
            Err(e) => {
                release(engine.as_mut()).await;
                Err(e)
            }
        }
    }

    async fn concat(
        &self,
        engine: &mut dyn RemuxEngine,
        segments: Vec<(usize, Bytes)>,
        token: &CancellationToken,
    ) -> Result<Bytes, HlsError> {
        engine
            .load()
            .await
            .map_err(|e| HlsError::stitch(format!("failed to load remux engine: {e}")))?;

        let mut inputs = Vec::with_capacity(segments.len());
        for (index, data) in segments {
            if token.is_cancelled() {
                return Err(HlsError::Cancelled);
            }
            let name = format!("{index}.ts");
            engine
                .write_file(&name, data)
                .await
                .map_err(|e| HlsError::stitch(format!("failed to stage {name}: {e}")))?;
            inputs.push(name);
        }

        if token.is_cancelled() {
            return Err(HlsError::Cancelled);
        }
        let job = ConcatJob {
            inputs,
            output: OUTPUT_FILE.to_string(),
        };
        info!(segments = job.inputs.len(), "Stitching segments");
        engine.run(&job).await.map_err(|e| match e {
            HlsError::Stitch { .. } => e,
            other => HlsError::stitch(other.to_string()),
        })?;

        // Best effort: one failed unlink must not keep the rest around.
        for name in &job.inputs {
            if let Err(e) = engine.unlink_file(name).await {
                warn!(file = %name, error = %e, "Failed to remove intermediate segment");
            }
        }

        let output = engine
            .read_file(&job.output)
            .await
            .map_err(|e| HlsError::stitch(format!("could not read stitched output: {e}")))?;
        if output.is_empty() {
            return Err(HlsError::stitch("remux engine produced an empty output"));
        }
        debug!(size = output.len(), "Stitched output ready");
        Ok(output)
    }
}

async fn release(engine: &mut dyn RemuxEngine) {
    if let Err(e) = engine.terminate().await {
        warn!(error = %e, "Failed to terminate remux engine");
    }
}
