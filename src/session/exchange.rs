//! Token exchange RPCs

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SpacectlError};
use crate::graphql;
use crate::http::HttpClient;

const API_KEY_USER: &str = "mutation GetSpaceliftToken($id: ID!, $secret: String!) { apiKeyUser(id: $id, secret: $secret) { jwt validUntil } }";

const OAUTH_USER: &str =
    "mutation GetSpaceliftToken($token: String!) { oauthUser(token: $token) { jwt validUntil } }";

/// Long-lived material presented to the server in exchange for a JWT
#[derive(Clone, Copy)]
pub enum ExchangeRequest<'a> {
    /// API key pair
    ApiKey {
        /// Key ID
        key_id: &'a str,
        /// Key secret
        key_secret: &'a str,
    },
    /// GitHub access token
    GitHubToken {
        /// Access token
        access_token: &'a str,
    },
}

impl std::fmt::Debug for ExchangeRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey { key_id, .. } => f
                .debug_struct("ApiKey")
                .field("key_id", key_id)
                .finish_non_exhaustive(),
            Self::GitHubToken { .. } => f.debug_struct("GitHubToken").finish_non_exhaustive(),
        }
    }
}

/// A JWT minted by the server
#[derive(Clone)]
#[cfg_attr(test, derive(Debug))]
pub struct IssuedToken {
    /// Encoded JWT
    pub jwt: String,
    /// Expiry reported by the server
    pub valid_until: SystemTime,
}

impl IssuedToken {
    /// Token valid until `valid_until` Unix seconds
    pub fn new(jwt: impl Into<String>, valid_until: i64) -> Self {
        let secs = u64::try_from(valid_until).unwrap_or(0);
        Self {
            jwt: jwt.into(),
            valid_until: UNIX_EPOCH + Duration::from_secs(secs),
        }
    }
}

/// Performs the credential-for-token exchange.
///
/// Sessions call this once when created and again whenever their cached
/// token goes stale. Implementations must honor `cancel`.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// Exchange `request` for a fresh token at the GraphQL `endpoint`
    async fn exchange(
        &self,
        endpoint: &str,
        request: ExchangeRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<IssuedToken>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserToken {
    jwt: String,
    valid_until: i64,
}

/// Exchanges credentials through the `apiKeyUser` and `oauthUser` mutations
#[derive(Debug, Clone)]
pub struct GraphqlExchanger {
    http: HttpClient,
}

impl GraphqlExchanger {
    /// Create an exchanger sending requests through `http`
    #[must_use]
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

#[async_trait]
impl TokenExchanger for GraphqlExchanger {
    async fn exchange(
        &self,
        endpoint: &str,
        request: ExchangeRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<IssuedToken> {
        let (field, query, variables) = match request {
            ExchangeRequest::ApiKey { key_id, key_secret } => (
                "apiKeyUser",
                API_KEY_USER,
                json!({ "id": key_id, "secret": key_secret }),
            ),
            ExchangeRequest::GitHubToken { access_token } => {
                ("oauthUser", OAUTH_USER, json!({ "token": access_token }))
            }
        };

        let mut data: HashMap<String, Option<UserToken>> =
            graphql::execute(&self.http, endpoint, None, query, variables, cancel)
                .await
                .map_err(|e| match e {
                    SpacectlError::Graphql(msg) => {
                        SpacectlError::authentication(format!("{field} failed: {msg}"))
                    }
                    other => other,
                })?;

        let user = data
            .remove(field)
            .flatten()
            .ok_or_else(|| SpacectlError::authentication(format!("{field} returned no token")))?;

        tracing::debug!(operation = field, "exchanged credentials for a token");
        Ok(IssuedToken::new(user.jwt, user.valid_until))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::post;
    use serde_json::Value;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}/graphql")
    }

    #[tokio::test]
    async fn test_api_key_exchange() {
        let router = Router::new().route(
            "/graphql",
            post(|axum::Json(body): axum::Json<Value>| async move {
                assert!(body["query"].as_str().unwrap().contains("apiKeyUser"));
                assert_eq!(body["variables"]["id"], "01ABC");
                axum::Json(json!({
                    "data": { "apiKeyUser": { "jwt": "minted", "validUntil": 1_900_000_000 } }
                }))
            }),
        );
        let endpoint = serve(router).await;
        let exchanger = GraphqlExchanger::new(HttpClient::new().unwrap());

        let issued = exchanger
            .exchange(
                &endpoint,
                ExchangeRequest::ApiKey {
                    key_id: "01ABC",
                    key_secret: "secret",
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(issued.jwt, "minted");
        assert_eq!(
            issued.valid_until,
            UNIX_EPOCH + Duration::from_secs(1_900_000_000)
        );
    }

    #[tokio::test]
    async fn test_null_user_is_authentication_error() {
        let router = Router::new().route(
            "/graphql",
            post(|| async { axum::Json(json!({ "data": { "oauthUser": null } })) }),
        );
        let endpoint = serve(router).await;
        let exchanger = GraphqlExchanger::new(HttpClient::new().unwrap());

        let err = exchanger
            .exchange(
                &endpoint,
                ExchangeRequest::GitHubToken {
                    access_token: "gho_x",
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_authentication(), "{err}");
    }

    #[test]
    fn test_negative_valid_until_is_epoch() {
        assert_eq!(IssuedToken::new("t", -5).valid_until, UNIX_EPOCH);
    }
}
