//! Environment-derived configuration
//!
//! spacectl has no configuration file. Everything tunable comes from the
//! environment, read once into an [`Environment`] snapshot so resolution can
//! be tested without touching process state.

use std::collections::HashMap;
use std::str::FromStr;

use crate::auth::CredentialKind;
use crate::error::{Result, SpacectlError};

/// Account endpoint for environment-based sessions
pub const ENV_API_ENDPOINT: &str = "SPACELIFT_API_ENDPOINT";
/// API key ID for environment-based sessions
pub const ENV_API_KEY_ID: &str = "SPACELIFT_API_KEY_ID";
/// API key secret for environment-based sessions
pub const ENV_API_KEY_SECRET: &str = "SPACELIFT_API_KEY_SECRET";
/// Pre-issued API token
pub const ENV_API_TOKEN: &str = "SPACELIFT_API_TOKEN";
/// GitHub access token
pub const ENV_API_GITHUB_TOKEN: &str = "SPACELIFT_API_GITHUB_TOKEN";
/// Any non-empty value enables autologin
pub const ENV_AUTO_LOGIN: &str = "SPACELIFT_AUTO_LOGIN";
/// Host the browser-login callback server binds to
pub const ENV_BIND_HOST: &str = "SPACECTL_BIND_HOST";
/// Port the browser-login callback server binds to
pub const ENV_BIND_PORT: &str = "SPACECTL_BIND_PORT";
/// Login method that skips the credential type prompt
pub const ENV_LOGIN_METHOD: &str = "SPACECTL_LOGIN_METHOD";
/// Default endpoint offered at the login prompt
pub const ENV_LOGIN_ENDPOINT: &str = "SPACECTL_LOGIN_ENDPOINT";
/// Profile alias used for one invocation instead of `current`
pub const ENV_PROFILE: &str = "SPACECTL_PROFILE";

/// Default host for the browser-login callback server
pub const DEFAULT_BIND_HOST: &str = "localhost";

/// Snapshot of environment variables.
///
/// Empty values are treated as unset.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    /// Capture the current process environment
    #[must_use]
    pub fn from_process() -> Self {
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }

    /// Value of `name`, if set and non-empty
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Override one variable
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Whether autologin was requested
    #[must_use]
    pub fn auto_login(&self) -> bool {
        self.get(ENV_AUTO_LOGIN).is_some()
    }

    /// Profile alias requested for this invocation
    #[must_use]
    pub fn profile_alias(&self) -> Option<&str> {
        self.get(ENV_PROFILE)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Interactive login flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginMethod {
    /// Browser-mediated token exchange
    Browser,
    /// API key pair
    ApiKey,
    /// GitHub access token
    GitHub,
}

impl LoginMethod {
    /// Credential kind this method produces
    #[must_use]
    pub fn credential_kind(self) -> CredentialKind {
        match self {
            Self::Browser => CredentialKind::ApiToken,
            Self::ApiKey => CredentialKind::ApiKey,
            Self::GitHub => CredentialKind::GitHubToken,
        }
    }
}

impl FromStr for LoginMethod {
    type Err = SpacectlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "browser" => Ok(Self::Browser),
            "api" | "api_key" => Ok(Self::ApiKey),
            "github" => Ok(Self::GitHub),
            other => Err(SpacectlError::invalid_config(format!(
                "{ENV_LOGIN_METHOD} must be one of browser, api or github, got '{other}'"
            ))),
        }
    }
}

/// Defaults for interactive login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginDefaults {
    /// Callback server host
    pub bind_host: String,
    /// Callback server port, 0 lets the OS pick
    pub bind_port: u16,
    /// Preselected login method
    pub method: Option<LoginMethod>,
    /// Endpoint offered at the prompt
    pub endpoint: Option<String>,
}

impl Default for LoginDefaults {
    fn default() -> Self {
        Self {
            bind_host: DEFAULT_BIND_HOST.to_string(),
            bind_port: 0,
            method: None,
            endpoint: None,
        }
    }
}

impl LoginDefaults {
    /// Read login defaults from `env`.
    ///
    /// # Errors
    ///
    /// Returns `SpacectlError::InvalidConfig` for a malformed port or method.
    pub fn from_env(env: &Environment) -> Result<Self> {
        let bind_port = env
            .get(ENV_BIND_PORT)
            .map(|port| {
                port.parse::<u16>().map_err(|e| {
                    SpacectlError::invalid_config(format!("{ENV_BIND_PORT} '{port}': {e}"))
                })
            })
            .transpose()?
            .unwrap_or(0);

        Ok(Self {
            bind_host: env
                .get(ENV_BIND_HOST)
                .unwrap_or(DEFAULT_BIND_HOST)
                .to_string(),
            bind_port,
            method: env.get(ENV_LOGIN_METHOD).map(str::parse).transpose()?,
            endpoint: env.get(ENV_LOGIN_ENDPOINT).map(str::to_string),
        })
    }
}
