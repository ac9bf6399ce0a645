//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Serialization errors
    /// Failed to serialize data.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize data.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    // Bot API errors
    /// The Bot API answered with `ok: false`.
    #[error("bot api error{}: {description}", .code.map(|c| format!(" {c}")).unwrap_or_default())]
    Api {
        /// Numeric error code, if the server sent one.
        code: Option<i32>,
        /// Human readable description from the server.
        description: String,
    },

    /// The Bot API answered with `ok: true` but no result payload.
    #[error("bot api response is missing its result")]
    MissingResult,
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialization_error_display() {
        let err = ProtocolError::Deserialization("unexpected end of input".to_string());
        assert_eq!(
            err.to_string(),
            "deserialization failed: unexpected end of input"
        );
    }

    #[test]
    fn test_api_error_display_with_code() {
        let err = ProtocolError::Api {
            code: Some(401),
            description: "Unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "bot api error 401: Unauthorized");
    }

    #[test]
    fn test_api_error_display_without_code() {
        let err = ProtocolError::Api {
            code: None,
            description: "Bad Gateway".to_string(),
        };
        assert_eq!(err.to_string(), "bot api error: Bad Gateway");
    }

    #[test]
    fn test_from_serde_json_syntax_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: ProtocolError = json_err.into();
        assert!(matches!(err, ProtocolError::Deserialization(_)));
    }
}
