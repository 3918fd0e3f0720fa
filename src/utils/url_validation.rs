//! Endpoint URL validation.
//!
//! The backend wrapper must be reached over HTTP(S) and the live API over
//! WS(S). Both must name a host; credentials embedded in the URL are refused
//! since every request would leak them into logs.

use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq)]
pub enum UrlValidationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(#[from] url::ParseError),

    #[error("URL scheme must be one of {expected}, got: {actual}")]
    UnsupportedScheme {
        expected: &'static str,
        actual: String,
    },

    #[error("URL must have a host")]
    MissingHost,

    #[error("URL must not embed credentials")]
    EmbeddedCredentials,
}

fn validate_with_schemes(
    url: &str,
    schemes: &[&str],
    expected: &'static str,
) -> Result<Url, UrlValidationError> {
    let parsed = Url::parse(url)?;

    if !schemes.contains(&parsed.scheme()) {
        return Err(UrlValidationError::UnsupportedScheme {
            expected,
            actual: parsed.scheme().to_string(),
        });
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(UrlValidationError::MissingHost);
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(UrlValidationError::EmbeddedCredentials);
    }
    Ok(parsed)
}

/// Validate the backend wrapper base URL (`http` or `https`).
pub fn validate_backend_url(url: &str) -> Result<Url, UrlValidationError> {
    validate_with_schemes(url, &["http", "https"], "http, https")
}

/// Validate the live API WebSocket base URL (`ws` or `wss`).
pub fn validate_live_url(url: &str) -> Result<Url, UrlValidationError> {
    validate_with_schemes(url, &["ws", "wss"], "ws, wss")
}
