//! Error types for the console session client

use thiserror::Error;

/// Message shown when the backend rejects a login without explaining why
pub const DEFAULT_LOGIN_ERROR: &str = "Invalid email or password";

/// Client error types
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Login rejected by the backend; carries the backend's message verbatim
    #[error("{0}")]
    InvalidCredentials(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Failed to fetch current user: {0}")]
    UserFetchFailed(String),

    /// An authenticated request came back with 401
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Text to show the user when a login attempt fails.
    ///
    /// Backend-provided messages are passed through untouched; everything else
    /// collapses to [`DEFAULT_LOGIN_ERROR`].
    pub fn display_message(&self) -> String {
        match self {
            ClientError::InvalidCredentials(message) | ClientError::Api { message, .. }
                if !message.is_empty() =>
            {
                message.clone()
            }
            _ => DEFAULT_LOGIN_ERROR.to_string(),
        }
    }

    /// Whether the error means the locally held access token cannot be used
    pub fn is_token_error(&self) -> bool {
        matches!(self, ClientError::TokenExpired | ClientError::MalformedToken(_))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_message_passes_backend_message_through() {
        let err = ClientError::InvalidCredentials("Bad credentials".to_string());
        assert_eq!(err.display_message(), "Bad credentials");
        assert_eq!(err.to_string(), "Bad credentials");

        let err = ClientError::Api {
            status: 503,
            message: "Service unavailable".to_string(),
        };
        assert_eq!(err.display_message(), "Service unavailable");
    }

    #[test]
    fn test_display_message_falls_back() {
        assert_eq!(
            ClientError::InvalidCredentials(String::new()).display_message(),
            DEFAULT_LOGIN_ERROR
        );
        assert_eq!(ClientError::Unauthorized.display_message(), DEFAULT_LOGIN_ERROR);
    }

    #[test]
    fn test_malformed_token_is_a_token_error() {
        assert!(ClientError::MalformedToken("bad".into()).is_token_error());
        assert!(ClientError::TokenExpired.is_token_error());
        assert!(!ClientError::NoRefreshToken.is_token_error());
    }
}
