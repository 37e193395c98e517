//! Authenticated sessions
//!
//! A [`Session`] turns stored credentials into short-lived bearer tokens.
//! API key and GitHub token sessions exchange their long-lived material for
//! a JWT when created and again whenever the cached JWT comes within
//! [`FRESHNESS_GUARD`] of expiry. API token sessions hold a pre-issued JWT
//! that cannot be renewed.
//!
//! Sessions are shared between tasks behind an `Arc`. Readers of a fresh
//! token only take a read lock; a stale token sends exactly one exchange to
//! the server no matter how many tasks are waiting on it.
//!
//! # Example
//!
//! ```no_run
//! use spacectl::auth::ProfileStore;
//! use spacectl::config::Environment;
//! use spacectl::http::HttpClient;
//! use spacectl::session::SessionFactory;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> spacectl::Result<()> {
//! let factory = SessionFactory::new(HttpClient::new()?);
//! let cancel = CancellationToken::new();
//! let session = factory
//!     .from_default_chain(&Environment::from_process(), &ProfileStore::new(), &cancel)
//!     .await?;
//!
//! println!("{}", session.endpoint());
//! let _token = session.bearer_token(&cancel).await?;
//! # Ok(())
//! # }
//! ```

mod env;
mod exchange;
mod token;

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::{CredentialKind, StoredCredentials};
use crate::error::{Result, SpacectlError};

pub use env::{SessionFactory, credentials_from_environment};
pub use exchange::{ExchangeRequest, GraphqlExchanger, IssuedToken, TokenExchanger};
pub use token::{CachedToken, FRESHNESS_GUARD, TokenClaims};

/// Kind-specific state of a session
#[derive(Clone)]
enum Exchange {
    ApiToken,
    ApiKey { key_id: String, key_secret: String },
    GitHubToken { access_token: String },
}

impl Exchange {
    fn kind(&self) -> CredentialKind {
        match self {
            Self::ApiToken => CredentialKind::ApiToken,
            Self::ApiKey { .. } => CredentialKind::ApiKey,
            Self::GitHubToken { .. } => CredentialKind::GitHubToken,
        }
    }
}

/// Mint a new token for `exchange`
async fn refresh(
    exchanger: &dyn TokenExchanger,
    endpoint: &str,
    exchange: &Exchange,
    cancel: &CancellationToken,
) -> Result<CachedToken> {
    let request = match exchange {
        Exchange::ApiToken => {
            return Err(SpacectlError::authentication(
                "API tokens cannot be refreshed, please log in again",
            ));
        }
        Exchange::ApiKey { key_id, key_secret } => ExchangeRequest::ApiKey { key_id, key_secret },
        Exchange::GitHubToken { access_token } => ExchangeRequest::GitHubToken { access_token },
    };

    tracing::debug!(endpoint, kind = %exchange.kind(), "requesting a new token");
    let issued = exchanger.exchange(endpoint, request, cancel).await?;
    Ok(CachedToken {
        jwt: issued.jwt,
        expires_at: issued.valid_until,
    })
}

/// Canonical GraphQL URL for an account endpoint.
///
/// Trailing slashes are stripped and `/graphql` appended, so
/// `https://acme.app.spacelift.io/` and `https://acme.app.spacelift.io`
/// both become `https://acme.app.spacelift.io/graphql`.
///
/// # Errors
///
/// Returns `SpacectlError::InvalidEndpoint` when the endpoint is empty or
/// not an absolute URL.
pub fn canonical_endpoint(endpoint: &str) -> Result<String> {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(SpacectlError::invalid_endpoint("endpoint must not be empty"));
    }
    Url::parse(trimmed).map_err(|e| SpacectlError::invalid_endpoint(format!("{endpoint}: {e}")))?;

    Ok(format!("{trimmed}/graphql"))
}

/// A live source of bearer tokens for one account
pub struct Session {
    endpoint: String,
    exchange: Exchange,
    exchanger: Arc<dyn TokenExchanger>,
    cache: RwLock<CachedToken>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Build a session from `credentials`.
    ///
    /// API key and GitHub token credentials are exchanged right away, so a
    /// bad key fails here rather than on the first API call.
    ///
    /// # Errors
    ///
    /// Returns validation errors for malformed credentials, and exchange
    /// errors for refreshable kinds.
    pub async fn new(
        credentials: &StoredCredentials,
        exchanger: Arc<dyn TokenExchanger>,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        credentials.validate()?;

        let (endpoint, exchange, token) = match credentials.kind {
            CredentialKind::ApiToken => {
                let claims = TokenClaims::parse(&credentials.access_token)?;
                let audience = claims
                    .audience
                    .first()
                    .map_or(credentials.endpoint.as_str(), String::as_str);
                let token = CachedToken {
                    jwt: credentials.access_token.clone(),
                    expires_at: claims.expires_at,
                };
                (canonical_endpoint(audience)?, Exchange::ApiToken, token)
            }
            kind @ (CredentialKind::ApiKey | CredentialKind::GitHubToken) => {
                let endpoint = canonical_endpoint(&credentials.endpoint)?;
                let exchange = if kind == CredentialKind::ApiKey {
                    Exchange::ApiKey {
                        key_id: credentials.key_id.clone(),
                        key_secret: credentials.key_secret.clone(),
                    }
                } else {
                    Exchange::GitHubToken {
                        access_token: credentials.access_token.clone(),
                    }
                };
                let token = refresh(exchanger.as_ref(), &endpoint, &exchange, cancel).await?;
                (endpoint, exchange, token)
            }
            CredentialKind::Invalid => {
                return Err(SpacectlError::invalid_profile(format!(
                    "unknown credential type: {}",
                    credentials.kind.as_number()
                )));
            }
        };

        Ok(Self {
            endpoint,
            exchange,
            exchanger,
            cache: RwLock::new(token),
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Canonical GraphQL URL of the account
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Kind of credentials backing the session
    #[must_use]
    pub fn kind(&self) -> CredentialKind {
        self.exchange.kind()
    }

    /// Whether the cached token is outside the freshness guard
    #[must_use]
    pub fn has_fresh_token(&self) -> bool {
        self.cached().is_fresh()
    }

    fn cached(&self) -> CachedToken {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// A bearer token for the next API call, refreshed if stale.
    ///
    /// API token sessions return their token even when stale; the server
    /// rejects it and the caller surfaces that.
    ///
    /// # Errors
    ///
    /// Returns the exchange error when a refresh fails (the next call
    /// retries), `SpacectlError::Authentication` when the server issues a
    /// token that is already inside the freshness guard, and
    /// `SpacectlError::Cancelled` if `cancel` fires while waiting.
    pub async fn bearer_token(&self, cancel: &CancellationToken) -> Result<String> {
        let cached = self.cached();
        if cached.is_fresh() {
            return Ok(cached.jwt);
        }

        if matches!(self.exchange, Exchange::ApiToken) {
            tracing::warn!(endpoint = %self.endpoint, "API token is expired or about to expire");
            return Ok(cached.jwt);
        }

        let _guard = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SpacectlError::Cancelled),
            guard = self.refresh_lock.lock() => guard,
        };

        // Another task may have refreshed while we waited for the lock.
        let cached = self.cached();
        if cached.is_fresh() {
            return Ok(cached.jwt);
        }

        let token = refresh(self.exchanger.as_ref(), &self.endpoint, &self.exchange, cancel).await?;
        let fresh = token.is_fresh();
        let jwt = token.jwt.clone();
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = token;

        if !fresh {
            return Err(SpacectlError::authentication(
                "server issued a token that is already about to expire",
            ));
        }
        Ok(jwt)
    }
}
