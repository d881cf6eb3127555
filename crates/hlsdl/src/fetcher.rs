// Segment Fetcher: downloads individual media segments over HTTP.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::HlsError;
use crate::config::HlsConfig;
use crate::manifest::Segment;
use crate::retry::{RetryPolicy, retry_with_backoff};

#[async_trait]
pub trait SegmentDownloader: Send + Sync {
    async fn download_segment(
        &self,
        segment: &Segment,
        token: &CancellationToken,
    ) -> Result<Bytes, HlsError>;
}

pub struct SegmentFetcher {
    http_client: Client,
    config: Arc<HlsConfig>,
    /// Same header set the manifest was requested with
    headers: HeaderMap,
    retry_policy: RetryPolicy,
}

impl SegmentFetcher {
    pub fn new(http_client: Client, config: Arc<HlsConfig>, headers: HeaderMap) -> Self {
        let retry_policy = RetryPolicy::from(&config.fetcher);
        Self {
            http_client,
            config,
            headers,
            retry_policy,
        }
    }

    async fn fetch_once(&self, segment: &Segment, attempt: u32) -> Result<Bytes, HlsError> {
        let mut request_builder = self
            .http_client
            .get(segment.uri.as_str())
            .headers(self.headers.clone())
            .timeout(self.config.fetcher.segment_download_timeout);
        if let Some(range) = &segment.byte_range {
            request_builder = request_builder.header(reqwest::header::RANGE, range.header_value());
        }

        trace!(index = segment.original_index, attempt, url = %segment.uri, "Requesting segment");
        let response = request_builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HlsError::segment_status(status, &segment.uri));
        }

        let bytes = response.bytes().await?;
        Ok(bytes)
    }
}

#[async_trait]
impl SegmentDownloader for SegmentFetcher {
    async fn download_segment(
        &self,
        segment: &Segment,
        token: &CancellationToken,
    ) -> Result<Bytes, HlsError> {
        let bytes = retry_with_backoff(&self.retry_policy, token, |attempt| {
            self.fetch_once(segment, attempt)
        })
        .await?;

        debug!(
            index = segment.original_index,
            size = bytes.len(),
            "Downloaded segment"
        );
        Ok(bytes)
    }
}
