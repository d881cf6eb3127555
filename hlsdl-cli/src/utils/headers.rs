use std::collections::HashMap;

use tracing::{debug, error};

use crate::error::AppError;

/// Parses `-H` arguments into a header map.
///
/// Each entry is either `Name: value` or `Name=value`, split at whichever
/// separator comes first. Later entries for the same name replace earlier ones.
///
/// # Errors
///
/// Returns `AppError::InvalidInput` for an entry without a separator or whose
/// name is not a valid header token, such as `Referer https://example.com`.
pub fn parse_headers(headers: &[String]) -> Result<HashMap<String, String>, AppError> {
    debug!("Parsing {} headers", headers.len());

    let mut parsed = HashMap::with_capacity(headers.len());
    for header in headers {
        let split = match (header.find(':'), header.find('=')) {
            (Some(colon), Some(eq)) => Some(colon.min(eq)),
            (colon, eq) => colon.or(eq),
        };
        let Some((name, value)) = split.map(|at| (&header[..at], &header[at + 1..])) else {
            error!("Invalid header format: {header}");
            return Err(AppError::InvalidInput(format!(
                "invalid header `{header}`, expected `Name: value`"
            )));
        };

        let name = name.trim();
        if !is_token(name) {
            error!("Invalid header format: {header}");
            return Err(AppError::InvalidInput(format!(
                "invalid header `{header}`, expected `Name: value`"
            )));
        }
        debug!(header = name, "Added request header");
        parsed.insert(name.to_string(), value.trim().to_string());
    }
    Ok(parsed)
}

/// RFC 9110 `token`: non-empty, visible ASCII without delimiters.
fn is_token(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}
