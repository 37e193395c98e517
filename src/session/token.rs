//! JWT claims and the cached bearer token

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{DecodingKey, Validation};
use serde_json::Value;

use crate::error::{Result, SpacectlError};

/// Margin before expiry inside which a token is treated as stale
pub const FRESHNESS_GUARD: Duration = Duration::from_secs(30);

/// Unverified claims of a Spacelift JWT.
///
/// Signatures are not checked. The token is proof of authority issued by
/// the server and only the server validates it.
#[derive(Debug, Clone)]
pub struct TokenClaims {
    /// `aud` claim, normalized to a list
    pub audience: Vec<String>,
    /// `exp` claim, or the epoch when the token carries none
    pub expires_at: SystemTime,
    raw: Value,
}

impl TokenClaims {
    /// Decode the claims of `token` without verifying its signature.
    ///
    /// # Errors
    ///
    /// Returns `SpacectlError::Authentication` when `token` is not a
    /// well-formed JWT.
    pub fn parse(token: &str) -> Result<Self> {
        let mut validation = Validation::default();
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = jsonwebtoken::decode::<Value>(token, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|e| SpacectlError::authentication(format!("malformed token: {e}")))?;
        let raw = data.claims;

        let audience = match raw.get("aud") {
            Some(Value::String(aud)) => vec![aud.clone()],
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };

        let exp = raw
            .get("exp")
            .and_then(|exp| exp.as_u64().or_else(|| exp.as_f64().map(|f| f.max(0.0) as u64)))
            .unwrap_or(0);

        Ok(Self {
            audience,
            expires_at: UNIX_EPOCH + Duration::from_secs(exp),
            raw,
        })
    }

    /// All claims as JSON
    #[must_use]
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

/// A bearer token and the instant it stops being valid
#[derive(Clone, PartialEq, Eq)]
pub struct CachedToken {
    /// Encoded JWT
    pub jwt: String,
    /// Expiry instant
    pub expires_at: SystemTime,
}

impl CachedToken {
    /// Whether the token outlives `now` plus [`FRESHNESS_GUARD`]
    #[must_use]
    pub fn is_fresh_at(&self, now: SystemTime) -> bool {
        now + FRESHNESS_GUARD < self.expires_at
    }

    /// Whether the token is fresh right now
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(SystemTime::now())
    }
}

impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("jwt", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
