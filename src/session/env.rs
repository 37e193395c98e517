//! Session construction from the environment and from profiles

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{GraphqlExchanger, Session, TokenClaims, TokenExchanger};
use crate::auth::{ProfileStore, StoredCredentials};
use crate::config::{
    ENV_API_ENDPOINT, ENV_API_GITHUB_TOKEN, ENV_API_KEY_ID, ENV_API_KEY_SECRET, ENV_API_TOKEN,
    Environment,
};
use crate::error::{Result, SpacectlError};
use crate::http::HttpClient;

fn require<'a>(env: &'a Environment, name: &'static str) -> Result<&'a str> {
    env.get(name).ok_or(SpacectlError::MissingEnvironment(name))
}

/// Resolve credentials from `SPACELIFT_*` variables.
///
/// An API token wins outright. Otherwise the endpoint is required together
/// with either a GitHub token or an API key pair.
///
/// # Errors
///
/// Returns `SpacectlError::MissingEnvironment` naming the first variable
/// that is needed but unset.
pub fn credentials_from_environment(env: &Environment) -> Result<StoredCredentials> {
    if let Some(token) = env.get(ENV_API_TOKEN) {
        let endpoint = match env.get(ENV_API_ENDPOINT) {
            Some(endpoint) => endpoint.to_string(),
            None => TokenClaims::parse(token)?
                .audience
                .into_iter()
                .next()
                .ok_or(SpacectlError::MissingEnvironment(ENV_API_ENDPOINT))?,
        };
        return Ok(StoredCredentials::api_token(endpoint, token));
    }

    let endpoint = require(env, ENV_API_ENDPOINT)?;
    if let Some(token) = env.get(ENV_API_GITHUB_TOKEN) {
        return Ok(StoredCredentials::github_token(endpoint, token));
    }

    let key_id = require(env, ENV_API_KEY_ID)?;
    let key_secret = require(env, ENV_API_KEY_SECRET)?;
    Ok(StoredCredentials::api_key(endpoint, key_id, key_secret))
}

/// Builds sessions sharing one token exchanger
#[derive(Clone)]
pub struct SessionFactory {
    exchanger: Arc<dyn TokenExchanger>,
}

impl std::fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFactory").finish_non_exhaustive()
    }
}

impl SessionFactory {
    /// Factory exchanging tokens over GraphQL through `http`
    #[must_use]
    pub fn new(http: HttpClient) -> Self {
        Self::with_exchanger(Arc::new(GraphqlExchanger::new(http)))
    }

    /// Factory using a custom exchanger
    #[must_use]
    pub fn with_exchanger(exchanger: Arc<dyn TokenExchanger>) -> Self {
        Self { exchanger }
    }

    /// Session for explicit credentials
    ///
    /// # Errors
    ///
    /// See [`Session::new`].
    pub async fn from_credentials(
        &self,
        credentials: &StoredCredentials,
        cancel: &CancellationToken,
    ) -> Result<Session> {
        Session::new(credentials, Arc::clone(&self.exchanger), cancel).await
    }

    /// Session for credentials found in the environment
    ///
    /// # Errors
    ///
    /// See [`credentials_from_environment`] and [`Session::new`].
    pub async fn from_environment(
        &self,
        env: &Environment,
        cancel: &CancellationToken,
    ) -> Result<Session> {
        let credentials = credentials_from_environment(env)?;
        self.from_credentials(&credentials, cancel).await
    }

    /// Session for a stored profile, `current` when `alias` is `None`.
    ///
    /// # Errors
    ///
    /// Returns `SpacectlError::NoCurrentProfile` when no alias is given and
    /// none is selected, store errors when the profile cannot be read, and
    /// the errors of [`Session::new`].
    pub async fn from_profile(
        &self,
        store: &ProfileStore,
        alias: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Session> {
        let profile = match alias {
            Some(alias) => store.get(alias)?,
            None => store.current()?.ok_or(SpacectlError::NoCurrentProfile)?,
        };
        tracing::debug!(alias = %profile.alias, kind = %profile.credentials.kind, "using profile");
        self.from_credentials(&profile.credentials, cancel).await
    }

    /// Environment first, then the profile named by `SPACECTL_PROFILE` or
    /// the current one.
    ///
    /// # Errors
    ///
    /// Returns `SpacectlError::Authentication` carrying both underlying
    /// errors when neither source produces a session. A transport failure
    /// while using the profile is returned as `SpacectlError::Network`, and
    /// `SpacectlError::Cancelled` as soon as `cancel` fires.
    pub async fn from_default_chain(
        &self,
        env: &Environment,
        store: &ProfileStore,
        cancel: &CancellationToken,
    ) -> Result<Session> {
        let env_err = match self.from_environment(env, cancel).await {
            Ok(session) => return Ok(session),
            Err(SpacectlError::Cancelled) => return Err(SpacectlError::Cancelled),
            Err(e) => e,
        };
        tracing::debug!("no session from the environment: {env_err}");

        match self.from_profile(store, env.profile_alias(), cancel).await {
            Ok(session) => Ok(session),
            Err(SpacectlError::Cancelled) => Err(SpacectlError::Cancelled),
            // A transport failure stays one; the profile was usable.
            Err(e @ SpacectlError::Network(_)) => Err(e),
            Err(profile_err) => Err(SpacectlError::authentication(format!(
                "could not create a session from the environment: {env_err}; or from a profile: {profile_err}"
            ))),
        }
    }
}
