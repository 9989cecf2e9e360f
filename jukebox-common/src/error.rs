//! Common error types for Jukebox

use thiserror::Error;

/// Common result type for Jukebox operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across Jukebox crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level HTTP failure (connect, timeout, TLS)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Upstream API answered with a non-success status
    #[error("Upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Response or file body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Missing, expired or rejected credentials
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_error_display() {
        let err = Error::Upstream {
            status: 401,
            message: "The access token expired".to_string(),
        };
        assert_eq!(err.to_string(), "Upstream returned 401: The access token expired");
    }

    #[test]
    fn test_json_error_maps_to_decode() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Decode(_)));
    }
}
