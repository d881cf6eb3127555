use std::collections::HashMap;

use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use crate::{DownloaderConfig, HlsError};

/// Builds the HTTP client used for every manifest and segment request of a session.
pub fn build_client(config: &DownloaderConfig) -> Result<Client, HlsError> {
    let redirect = if config.follow_redirects {
        reqwest::redirect::Policy::limited(10)
    } else {
        reqwest::redirect::Policy::none()
    };

    Client::builder()
        .user_agent(config.user_agent.as_str())
        .connect_timeout(config.connect_timeout)
        .redirect(redirect)
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .pool_idle_timeout(config.pool_idle_timeout)
        .danger_accept_invalid_certs(config.danger_accept_invalid_certs)
        .build()
        .map_err(|e| HlsError::configuration(format!("failed to build HTTP client: {e}")))
}

/// Merges caller supplied headers over the configured defaults.
///
/// Caller headers take precedence over defaults for the same fields.
pub fn merge_headers(
    defaults: &HeaderMap,
    extra: &HashMap<String, String>,
) -> Result<HeaderMap, HlsError> {
    let mut headers = defaults.clone();
    for (name, value) in extra {
        let header_name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| {
            HlsError::configuration(format!("invalid header name `{name}`: {e}"))
        })?;
        let header_value = HeaderValue::from_str(value.trim()).map_err(|e| {
            HlsError::configuration(format!("invalid value for header `{name}`: {e}"))
        })?;
        debug!(header = %header_name, "Using custom request header");
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{ACCEPT, REFERER};

    #[test]
    fn custom_headers_override_defaults() {
        let defaults = DownloaderConfig::get_default_headers();
        let extra = HashMap::from([
            ("Accept".to_string(), "application/vnd.apple.mpegurl".to_string()),
            ("Referer".to_string(), "https://example.com/".to_string()),
        ]);

        let merged = merge_headers(&defaults, &extra).unwrap();
        assert_eq!(merged.get(ACCEPT).unwrap(), "application/vnd.apple.mpegurl");
        assert_eq!(merged.get(REFERER).unwrap(), "https://example.com/");
        assert_eq!(merged.len(), defaults.len() + 1);
    }

    #[test]
    fn invalid_header_name_is_rejected() {
        let extra = HashMap::from([("bad header".to_string(), "x".to_string())]);
        let result = merge_headers(&HeaderMap::new(), &extra);
        assert!(matches!(result, Err(HlsError::Configuration { .. })));
    }
}
