use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum HlsError {
    #[error("download cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("failed to fetch manifest {url}: {reason}")]
    ManifestFetch { url: String, reason: String },

    #[error("manifest is unusable: {reason}")]
    ManifestParse { reason: String },

    #[error("segment fetch error: {reason}")]
    SegmentFetch { reason: String, retryable: bool },

    #[error("stitching failed: {reason}")]
    Stitch { reason: String },

    #[error("unsupported environment: {reason}")]
    UnsupportedEnvironment { reason: String },

    #[error("invalid session state: {reason}")]
    InvalidState { reason: String },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl HlsError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn manifest_fetch(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ManifestFetch {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn manifest_parse(reason: impl Into<String>) -> Self {
        Self::ManifestParse {
            reason: reason.into(),
        }
    }

    pub fn stitch(reason: impl Into<String>) -> Self {
        Self::Stitch {
            reason: reason.into(),
        }
    }

    pub fn unsupported_environment(reason: impl Into<String>) -> Self {
        Self::UnsupportedEnvironment {
            reason: reason.into(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Builds a segment error from a non-2xx response.
    ///
    /// Server errors and `429 Too Many Requests` are worth another attempt,
    /// anything else in the 4xx range is not.
    pub fn segment_status(status: StatusCode, url: &str) -> Self {
        Self::SegmentFetch {
            reason: format!("HTTP {status} for segment {url}"),
            retryable: status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled
            | Self::InvalidUrl { .. }
            | Self::ManifestParse { .. }
            | Self::Stitch { .. }
            | Self::UnsupportedEnvironment { .. }
            | Self::InvalidState { .. }
            | Self::Configuration { .. }
            | Self::Internal { .. } => false,
            Self::SegmentFetch { retryable, .. } => *retryable,
            Self::Network { source } => is_retryable_reqwest_error(source),
            Self::ManifestFetch { .. } | Self::Io { .. } => true,
        }
    }
}

/// Classify a reqwest error as retryable or non-retryable.
///
/// Retryable: connect, timeout, request, body read, and decode errors.
/// Non-retryable: redirect and builder errors.
pub fn is_retryable_reqwest_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() || e.is_decode()
}
