//! Credential model and profile validation

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SpacectlError};

/// Alias reserved for the link to the selected profile
pub const CURRENT_ALIAS: &str = "current";

/// Kind of authentication material a profile holds.
///
/// The numeric values are persisted in profile files and shown at the login
/// prompt, so they must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum CredentialKind {
    /// Zero value, never persisted
    #[default]
    Invalid = 0,
    /// API key pair exchanged for a JWT
    ApiKey = 1,
    /// GitHub access token exchanged for a JWT
    GitHubToken = 2,
    /// Pre-issued JWT, usually obtained through browser login
    ApiToken = 4,
}

impl CredentialKind {
    /// Numeric value as persisted and prompted
    #[must_use]
    pub fn as_number(self) -> u8 {
        self as u8
    }

    /// Whether a session built from this kind can mint new tokens on its own
    #[must_use]
    pub fn is_refreshable(self) -> bool {
        matches!(self, Self::ApiKey | Self::GitHubToken)
    }
}

impl From<CredentialKind> for u8 {
    fn from(kind: CredentialKind) -> Self {
        kind.as_number()
    }
}

impl TryFrom<u8> for CredentialKind {
    type Error = SpacectlError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Invalid),
            1 => Ok(Self::ApiKey),
            2 => Ok(Self::GitHubToken),
            4 => Ok(Self::ApiToken),
            other => Err(unknown_kind(other)),
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Invalid => "invalid",
            Self::ApiKey => "API key",
            Self::GitHubToken => "GitHub access token",
            Self::ApiToken => "API token",
        };
        f.write_str(name)
    }
}

fn unknown_kind(value: u8) -> SpacectlError {
    SpacectlError::invalid_profile(format!("unknown credential type: {value}"))
}

/// Authentication material and endpoint of one profile.
///
/// Unused fields stay empty and are left out of the on-disk encoding.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    /// Credential kind
    #[serde(rename = "type")]
    pub kind: CredentialKind,

    /// Account endpoint, e.g. `https://acme.app.spacelift.io`
    pub endpoint: String,

    /// JWT for [`CredentialKind::ApiToken`], GitHub token for [`CredentialKind::GitHubToken`]
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_token: String,

    /// API key ID for [`CredentialKind::ApiKey`]
    #[serde(default, rename = "key_id", skip_serializing_if = "String::is_empty")]
    pub key_id: String,

    /// API key secret for [`CredentialKind::ApiKey`]
    #[serde(default, rename = "key_secret", skip_serializing_if = "String::is_empty")]
    pub key_secret: String,
}

impl StoredCredentials {
    /// API key pair credentials
    pub fn api_key(
        endpoint: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Self {
        Self {
            kind: CredentialKind::ApiKey,
            endpoint: endpoint.into(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
            ..Default::default()
        }
    }

    /// GitHub access token credentials
    pub fn github_token(endpoint: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            kind: CredentialKind::GitHubToken,
            endpoint: endpoint.into(),
            access_token: access_token.into(),
            ..Default::default()
        }
    }

    /// Pre-issued API token credentials
    pub fn api_token(endpoint: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            kind: CredentialKind::ApiToken,
            endpoint: endpoint.into(),
            access_token: access_token.into(),
            ..Default::default()
        }
    }

    /// Check the per-kind required fields.
    ///
    /// # Errors
    ///
    /// Returns `SpacectlError::InvalidProfile` naming the first missing field,
    /// or the numeric kind when the kind is not a persistable one.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(SpacectlError::invalid_profile("endpoint must not be empty"));
        }

        match self.kind {
            CredentialKind::ApiKey => {
                if self.key_id.is_empty() {
                    return Err(SpacectlError::invalid_profile("API key ID must not be empty"));
                }
                if self.key_secret.is_empty() {
                    return Err(SpacectlError::invalid_profile(
                        "API key secret must not be empty",
                    ));
                }
            }
            CredentialKind::GitHubToken => {
                if self.access_token.is_empty() {
                    return Err(SpacectlError::invalid_profile(
                        "GitHub access token must not be empty",
                    ));
                }
            }
            CredentialKind::ApiToken => {
                if self.access_token.is_empty() {
                    return Err(SpacectlError::invalid_profile("API token must not be empty"));
                }
                crate::session::TokenClaims::parse(&self.access_token)
                    .map_err(|_| SpacectlError::invalid_profile("API token is not a valid JWT"))?;
            }
            CredentialKind::Invalid => return Err(unknown_kind(self.kind.as_number())),
        }

        Ok(())
    }
}

// Secrets stay out of logs and panic messages.
impl fmt::Debug for StoredCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |s: &str| if s.is_empty() { "" } else { "<redacted>" };
        f.debug_struct("StoredCredentials")
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("access_token", &redact(&self.access_token))
            .field("key_id", &self.key_id)
            .field("key_secret", &redact(&self.key_secret))
            .finish()
    }
}

/// A named credential bundle for one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    /// Filename-safe identifier
    pub alias: String,
    /// Authentication material
    pub credentials: StoredCredentials,
}

impl Profile {
    /// Create a new profile
    pub fn new(alias: impl Into<String>, credentials: StoredCredentials) -> Self {
        Self {
            alias: alias.into(),
            credentials,
        }
    }

    /// Validate the alias and the credentials.
    ///
    /// # Errors
    ///
    /// Returns `SpacectlError::InvalidProfile` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        validate_alias(&self.alias)?;
        self.credentials.validate()
    }
}

/// Whether `name` has the shape of a store temp file,
/// `.<current|profile>.<pid>.<n>.tmp`
#[must_use]
pub fn is_scratch_name(name: &str) -> bool {
    let Some(inner) = name
        .strip_prefix('.')
        .and_then(|rest| rest.strip_suffix(".tmp"))
    else {
        return false;
    };
    let parts: Vec<&str> = inner.split('.').collect();
    let numeric = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    matches!(
        parts.as_slice(),
        [prefix, pid, n] if matches!(*prefix, CURRENT_ALIAS | "profile") && numeric(*pid) && numeric(*n)
    )
}

/// Check that `alias` can be used as a profile file name.
///
/// # Errors
///
/// Returns `SpacectlError::InvalidProfile` for empty aliases, aliases containing
/// path separators, the reserved names `current`, `.` and `..`, and names
/// shaped like the store's temp files.
pub fn validate_alias(alias: &str) -> Result<()> {
    if alias.is_empty() {
        return Err(SpacectlError::invalid_profile("alias must not be empty"));
    }

    let reserved = matches!(alias, CURRENT_ALIAS | "." | "..") || is_scratch_name(alias);
    if reserved || alias.contains(std::path::is_separator) {
        return Err(SpacectlError::invalid_profile(format!(
            "'{alias}' is not a valid profile alias"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_numbers_are_stable() {
        assert_eq!(CredentialKind::Invalid.as_number(), 0);
        assert_eq!(CredentialKind::ApiKey.as_number(), 1);
        assert_eq!(CredentialKind::GitHubToken.as_number(), 2);
        assert_eq!(CredentialKind::ApiToken.as_number(), 4);
        assert_eq!(CredentialKind::try_from(4).unwrap(), CredentialKind::ApiToken);
    }

    #[test]
    fn test_unknown_kind_mentions_number() {
        let err = CredentialKind::try_from(3).unwrap_err();
        assert_eq!(err.to_string(), "unknown credential type: 3");
    }

    #[test]
    fn test_invalid_kind_rejected() {
        let creds = StoredCredentials {
            endpoint: "https://acme.app.spacelift.io".to_string(),
            ..Default::default()
        };
        assert_eq!(
            creds.validate().unwrap_err().to_string(),
            "unknown credential type: 0"
        );
    }

    #[test]
    fn test_alias_validation() {
        assert!(validate_alias("dev").is_ok());
        assert!(validate_alias("acme-prod_2").is_ok());
        assert!(validate_alias("").is_err());

        assert!(validate_alias(".dev").is_ok());
        assert!(validate_alias(".profile.tmp").is_ok());

        for bad in ["cur/rent", "current", ".", "..", ".profile.12.0.tmp", ".current.7.3.tmp"] {
            assert_eq!(
                validate_alias(bad).unwrap_err().to_string(),
                format!("'{bad}' is not a valid profile alias")
            );
        }
    }

    #[test]
    fn test_api_key_requires_both_parts() {
        let endpoint = "https://acme.app.spacelift.io";
        assert!(StoredCredentials::api_key(endpoint, "k", "s").validate().is_ok());
        assert!(StoredCredentials::api_key(endpoint, "", "s").validate().is_err());
        assert!(StoredCredentials::api_key(endpoint, "k", "").validate().is_err());
        assert!(StoredCredentials::api_key("", "k", "s").validate().is_err());
    }

    #[test]
    fn test_github_token_required() {
        let endpoint = "https://acme.app.spacelift.io";
        assert!(StoredCredentials::github_token(endpoint, "gho_x").validate().is_ok());
        assert!(StoredCredentials::github_token(endpoint, "").validate().is_err());
    }

    #[test]
    fn test_api_token_must_be_jwt() {
        let creds = StoredCredentials::api_token("https://acme.app.spacelift.io", "not-a-jwt");
        let msg = creds.validate().unwrap_err().to_string();
        assert!(msg.starts_with("API token is not a valid JWT"), "{msg}");
    }

    #[test]
    fn test_unused_fields_omitted() {
        let creds = StoredCredentials::api_key("https://x.y/", "k", "s");
        let json: serde_json::Value = serde_json::to_value(&creds).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": 1,
                "endpoint": "https://x.y/",
                "key_id": "k",
                "key_secret": "s"
            })
        );

        let decoded: StoredCredentials = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, creds);
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let result = serde_json::from_str::<StoredCredentials>(
            r#"{"type": 7, "endpoint": "https://x.y"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = StoredCredentials::api_key("https://x.y", "key-id", "very-secret");
        let debug = format!("{creds:?}");
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("key-id"));
    }
}
