// Manifest Resolver: fetches a manifest, parses it and turns it into either a
// list of quality variants or a list of absolutely addressed segments.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::merge_headers;
use crate::config::HlsConfig;
use crate::parser::{Resolution, SegmentByteRange, parse_manifest};
use crate::uri::UriRewriter;
use crate::HlsError;

/// One quality rendition offered by a master playlist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variant {
    pub name: String,
    /// Bits per second as declared by `BANDWIDTH`
    pub bandwidth: u64,
    pub resolution: Option<Resolution>,
    /// Always absolute
    pub uri: String,
}

impl Variant {
    /// Explicit name if present, else `{width}x{height}`, else `MAYBE_AUDIO:{bandwidth}`.
    fn display_name(
        name: Option<String>,
        resolution: Option<Resolution>,
        bandwidth: u64,
    ) -> String {
        match (name, resolution) {
            (Some(name), _) => name,
            (None, Some(res)) => format!("{}x{}", res.width, res.height),
            (None, None) => format!("MAYBE_AUDIO:{bandwidth}"),
        }
    }
}

/// A media segment in manifest order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    /// Zero-based manifest position, the only ordering key for reassembly
    pub original_index: usize,
    /// Always absolute
    pub uri: String,
    pub duration: f32,
    pub title: Option<String>,
    pub byte_range: Option<SegmentByteRange>,
    pub discontinuity: bool,
}

#[derive(Debug)]
pub enum ManifestResult {
    Error(HlsError),
    PlaylistList(Vec<Variant>),
    SegmentList(Vec<Segment>),
}

impl ManifestResult {
    pub fn is_error(&self) -> bool {
        matches!(self, ManifestResult::Error(_))
    }

    pub fn into_result(self) -> Result<ManifestResult, HlsError> {
        match self {
            ManifestResult::Error(e) => Err(e),
            other => Ok(other),
        }
    }
}

/// How to pick a variant without asking the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum VariantSelectionPolicy {
    #[default]
    HighestBitrate, // Select the variant with the highest bandwidth
    LowestBitrate,
    ClosestToBitrate(u64), // Select variant closest to the specified bitrate
    Named(String),
    Index(usize),
}

impl VariantSelectionPolicy {
    /// Returns the index of the chosen variant, or `None` when nothing matches.
    pub fn select(&self, variants: &[Variant]) -> Option<usize> {
        let mut indexed = variants.iter().enumerate();
        match self {
            Self::HighestBitrate => indexed.max_by_key(|(_, v)| v.bandwidth).map(|(i, _)| i),
            Self::LowestBitrate => indexed.min_by_key(|(_, v)| v.bandwidth).map(|(i, _)| i),
            Self::ClosestToBitrate(target) => indexed
                .min_by_key(|(_, v)| v.bandwidth.abs_diff(*target))
                .map(|(i, _)| i),
            Self::Named(name) => indexed
                .find(|(_, v)| v.name.eq_ignore_ascii_case(name))
                .map(|(i, _)| i),
            Self::Index(index) => (*index < variants.len()).then_some(*index),
        }
    }
}

pub struct ManifestResolver {
    client: Client,
    config: Arc<HlsConfig>,
}

impl ManifestResolver {
    pub fn new(client: Client, config: Arc<HlsConfig>) -> Self {
        Self { client, config }
    }

    /// Resolves `url` into variants or segments.
    ///
    /// Never fails outright: every fetch or parse failure is reported as
    /// [`ManifestResult::Error`].
    pub async fn resolve(&self, url: &str, headers: &HashMap<String, String>) -> ManifestResult {
        match self.try_resolve(url, headers).await {
            Ok(result) => result,
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to resolve manifest");
                ManifestResult::Error(e)
            }
        }
    }

    async fn try_resolve(
        &self,
        url_str: &str,
        headers: &HashMap<String, String>,
    ) -> Result<ManifestResult, HlsError> {
        let manifest_url = parse_http_url(url_str)?;
        let request_headers = merge_headers(&self.config.base.headers, headers)?;

        let response = self
            .client
            .get(manifest_url.clone())
            .headers(request_headers)
            .timeout(self.config.manifest.fetch_timeout)
            .send()
            .await
            .map_err(|e| HlsError::manifest_fetch(manifest_url.as_str(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let status_text = status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| status.to_string());
            return Err(HlsError::manifest_fetch(manifest_url.as_str(), status_text));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| HlsError::manifest_fetch(manifest_url.as_str(), e.to_string()))?;
        debug!(url = %manifest_url, size = body.len(), "Fetched manifest");

        let parsed = parse_manifest(&body)?;
        let rewriter = UriRewriter::new(&manifest_url);
        debug!(
            "Derived base URL from manifest: {} -> {}",
            manifest_url,
            rewriter.base()
        );

        if !parsed.playlists.is_empty() {
            let variants: Vec<Variant> = parsed
                .playlists
                .into_iter()
                .map(|playlist| Variant {
                    name: Variant::display_name(
                        playlist.name,
                        playlist.resolution,
                        playlist.bandwidth,
                    ),
                    bandwidth: playlist.bandwidth,
                    resolution: playlist.resolution,
                    uri: rewriter.rewrite(&playlist.uri),
                })
                .collect();
            info!(
                url = %manifest_url,
                variants = variants.len(),
                "Manifest lists quality variants"
            );
            return Ok(ManifestResult::PlaylistList(variants));
        }

        if !parsed.segments.is_empty() {
            if !parsed.end_list {
                warn!(
                    url = %manifest_url,
                    "Playlist has no EXT-X-ENDLIST, only the segments listed now will be downloaded"
                );
            }
            if parsed.segments.iter().any(|s| s.encrypted) {
                warn!(
                    url = %manifest_url,
                    "Playlist contains encrypted segments, output will not be playable"
                );
            }

            let segments: Vec<Segment> = parsed
                .segments
                .into_iter()
                .enumerate()
                .map(|(original_index, segment)| Segment {
                    original_index,
                    uri: rewriter.rewrite(&segment.uri),
                    duration: segment.duration,
                    title: segment.title,
                    byte_range: segment.byte_range,
                    discontinuity: segment.discontinuity,
                })
                .collect();
            info!(url = %manifest_url, segments = segments.len(), "Manifest lists media segments");
            return Ok(ManifestResult::SegmentList(segments));
        }

        Err(HlsError::manifest_parse(
            "manifest contains neither variant playlists nor segments",
        ))
    }
}

fn parse_http_url(input: &str) -> Result<Url, HlsError> {
    let url = Url::parse(input.trim()).map_err(|e| HlsError::invalid_url(input, e.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url),
        "http" | "https" => Err(HlsError::invalid_url(input, "missing host")),
        other => Err(HlsError::invalid_url(
            input,
            format!("unsupported scheme `{other}`"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(name: &str, bandwidth: u64) -> Variant {
        Variant {
            name: name.to_string(),
            bandwidth,
            resolution: None,
            uri: format!("https://example.com/{name}.m3u8"),
        }
    }

    #[test]
    fn variant_name_fallbacks() {
        assert_eq!(Variant::display_name(Some("720".into()), None, 1), "720");
        assert_eq!(
            Variant::display_name(
                None,
                Some(Resolution {
                    width: 1920,
                    height: 1080
                }),
                1
            ),
            "1920x1080"
        );
        assert_eq!(Variant::display_name(None, None, 64000), "MAYBE_AUDIO:64000");
    }

    #[test]
    fn selection_policies() {
        let variants = vec![
            variant("480", 1_400_000),
            variant("1080", 5_000_000),
            variant("720", 2_800_000),
        ];

        assert_eq!(VariantSelectionPolicy::HighestBitrate.select(&variants), Some(1));
        assert_eq!(VariantSelectionPolicy::LowestBitrate.select(&variants), Some(0));
        assert_eq!(
            VariantSelectionPolicy::ClosestToBitrate(3_000_000).select(&variants),
            Some(2)
        );
        assert_eq!(
            VariantSelectionPolicy::Named("720".into()).select(&variants),
            Some(2)
        );
        assert_eq!(VariantSelectionPolicy::Named("4k".into()).select(&variants), None);
        assert_eq!(VariantSelectionPolicy::Index(2).select(&variants), Some(2));
        assert_eq!(VariantSelectionPolicy::Index(3).select(&variants), None);
        assert_eq!(VariantSelectionPolicy::HighestBitrate.select(&[]), None);
    }

    #[test]
    fn only_absolute_http_urls_are_accepted() {
        assert!(parse_http_url("https://example.com/a.m3u8").is_ok());
        assert!(matches!(
            parse_http_url("example.com/a.m3u8"),
            Err(HlsError::InvalidUrl { .. })
        ));
        assert!(matches!(
            parse_http_url("ftp://example.com/a.m3u8"),
            Err(HlsError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn malformed_url_resolves_to_error() {
        let config = Arc::new(HlsConfig::default());
        let client = crate::client::build_client(&config.base).unwrap();
        let resolver = ManifestResolver::new(client, config);

        let result = resolver.resolve("not a url", &HashMap::new()).await;
        assert!(matches!(
            result,
            ManifestResult::Error(HlsError::InvalidUrl { .. })
        ));
    }
}
