//! Error types for the spacectl core

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the spacectl core
#[derive(Error, Debug)]
pub enum SpacectlError {
    /// Profile or credential validation failed
    #[error("{0}")]
    InvalidProfile(String),

    /// Endpoint is empty or not a valid URL
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Invalid configuration value (usually from the environment)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Version string is not `[v]MAJOR.MINOR.PATCH`
    #[error("invalid version '{0}'")]
    InvalidVersion(String),

    /// Filesystem operation failed on a specific path
    #[error("{action} {}: {source}", path.display())]
    Filesystem {
        /// What was being done when it failed
        action: &'static str,
        /// Path involved
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Named profile does not exist in the store
    #[error("profile '{0}' not found")]
    ProfileNotFound(String),

    /// No profile is currently selected
    #[error("no profile selected, please run `spacectl profile login` first")]
    NoCurrentProfile,

    /// The `current` link points at a file that does not exist
    #[error("current profile link {} points to a missing profile", .0.display())]
    DanglingCurrent(PathBuf),

    /// Token exchange or token parsing failed
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// A required environment variable is not set
    #[error("{0} environment variable is not set")]
    MissingEnvironment(&'static str),

    /// Browser login handshake failed
    #[error("Login error: {0}")]
    Login(String),

    /// Cryptographic operation failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// HTTP transport failure
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The GraphQL API returned errors
    #[error("GraphQL error: {0}")]
    Graphql(String),

    /// The operation was cancelled by its caller
    #[error("operation cancelled")]
    Cancelled,

    /// JSON encode or decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error without a specific path
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for spacectl operations
pub type Result<T> = std::result::Result<T, SpacectlError>;

impl SpacectlError {
    /// Create a profile validation error
    pub fn invalid_profile(msg: impl Into<String>) -> Self {
        Self::InvalidProfile(msg.into())
    }

    /// Create an invalid endpoint error
    pub fn invalid_endpoint(msg: impl Into<String>) -> Self {
        Self::InvalidEndpoint(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a filesystem error for `path`
    pub fn filesystem(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            action,
            path: path.into(),
            source,
        }
    }

    /// Create a profile not found error
    pub fn profile_not_found(alias: impl Into<String>) -> Self {
        Self::ProfileNotFound(alias.into())
    }

    /// Create an authentication error
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a login error
    pub fn login(msg: impl Into<String>) -> Self {
        Self::Login(msg.into())
    }

    /// Create a crypto error
    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }

    /// Create a GraphQL error
    pub fn graphql(msg: impl Into<String>) -> Self {
        Self::Graphql(msg.into())
    }

    /// Whether an interactive login could plausibly fix this error
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_) | Self::MissingEnvironment(_) | Self::NoCurrentProfile
        )
    }
}
