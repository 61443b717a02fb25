//! Error types for Sharecast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SharecastError>;

#[derive(Error, Debug)]
pub enum SharecastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Callback error: {0}")]
    Callback(#[from] CallbackError),

    /// An operation was requested from a provider that does not implement it
    #[error("Provider {provider} misses the {capability} capability")]
    MissingCapability {
        provider: String,
        capability: Capability,
    },

    #[error("Invalid token ID: {}", .0.map(|id| id.to_string()).unwrap_or_else(|| "none".to_string()))]
    InvalidTokenId(Option<i64>),

    #[error("Refresh access token for {identifier} failed: {reason}")]
    TokenRefresh {
        token_id: Option<i64>,
        identifier: String,
        reason: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SharecastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            SharecastError::InvalidInput(_) => 3,
            SharecastError::NotFound(_) => 4,
            SharecastError::Platform(PlatformError::Authentication(_)) => 2,
            SharecastError::Callback(_) => 2,
            SharecastError::Platform(_) => 1,
            SharecastError::Config(_) => 1,
            SharecastError::Database(_) => 1,
            SharecastError::MissingCapability { .. } => 1,
            SharecastError::InvalidTokenId(_) => 1,
            SharecastError::TokenRefresh { .. } => 1,
        }
    }

    /// Errors caused by a misconfigured system rather than an unreachable platform
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            SharecastError::Config(_)
                | SharecastError::MissingCapability { .. }
                | SharecastError::InvalidTokenId(_)
        )
    }
}

/// Optional provider facets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Composing,
    PullPosts,
    TokenRefreshing,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Composing => write!(f, "composing"),
            Capability::PullPosts => write!(f, "pull posts"),
            Capability::TokenRefreshing => write!(f, "token refreshing"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt JSON column {column}: {source}")]
    Json {
        column: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    Network(String),

    /// The platform answered with a non-success status; `body` is the raw payload
    #[error("API request failed with status {status}")]
    Api {
        status: u16,
        body: serde_json::Value,
    },

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
}

impl PlatformError {
    /// Raw error payload to record on a failed share
    pub fn body(&self) -> serde_json::Value {
        match self {
            PlatformError::Api { body, .. } => body.clone(),
            other => serde_json::json!({ "error": { "message": other.to_string() } }),
        }
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        if err.status().map(|s| s.as_u16()) == Some(429) {
            PlatformError::RateLimit(err.to_string())
        } else if err.is_decode() {
            PlatformError::InvalidResponse(err.to_string())
        } else {
            PlatformError::Network(err.to_string())
        }
    }
}

/// Failure during the OAuth connect flow
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct CallbackError {
    pub message: String,
    /// Whether the user should be sent back to the stored return URL
    pub redirect: bool,
}

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            redirect: true,
        }
    }

    pub fn without_redirect(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            redirect: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_invalid_input() {
        let error = SharecastError::InvalidInput("Empty handle".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_authentication_error() {
        let error = SharecastError::Platform(PlatformError::Authentication("bad".to_string()));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_not_found() {
        let error = SharecastError::NotFound("share 4".to_string());
        assert_eq!(error.exit_code(), 4);
    }

    #[test]
    fn test_missing_capability_message() {
        let error = SharecastError::MissingCapability {
            provider: "Facebook".to_string(),
            capability: Capability::TokenRefreshing,
        };
        assert_eq!(
            error.to_string(),
            "Provider Facebook misses the token refreshing capability"
        );
        assert!(error.is_configuration_error());
    }

    #[test]
    fn test_invalid_token_id_message() {
        assert_eq!(
            SharecastError::InvalidTokenId(None).to_string(),
            "Invalid token ID: none"
        );
        assert_eq!(
            SharecastError::InvalidTokenId(Some(7)).to_string(),
            "Invalid token ID: 7"
        );
    }

    #[test]
    fn test_token_refresh_message() {
        let error = SharecastError::TokenRefresh {
            token_id: Some(1),
            identifier: "1234".to_string(),
            reason: "revoked".to_string(),
        };
        assert_eq!(error.to_string(), "Refresh access token for 1234 failed: revoked");
        assert!(!error.is_configuration_error());
    }

    #[test]
    fn test_callback_error_redirect_flag() {
        assert!(CallbackError::new("OAuth2 state mismatch").redirect);
        assert!(!CallbackError::without_redirect("Provider is missing").redirect);

        let error: SharecastError = CallbackError::new("OAuth2 state mismatch").into();
        assert_eq!(error.to_string(), "Callback error: OAuth2 state mismatch");
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_platform_error_body() {
        let body = serde_json::json!({"error": {"message": "Invalid token"}});
        let error = PlatformError::Api {
            status: 400,
            body: body.clone(),
        };
        assert_eq!(error.body(), body);

        let network = PlatformError::Network("timeout".to_string());
        assert_eq!(
            network.body()["error"]["message"],
            "Network error: timeout"
        );
    }

    #[test]
    fn test_error_conversion_from_config_error() {
        let config_error = ConfigError::MissingField("test".to_string());
        let error: SharecastError = config_error.into();

        match error {
            SharecastError::Config(_) => {}
            _ => panic!("Expected SharecastError::Config"),
        }
    }
}
