//! GraphQL request/response envelope
//!
//! Only the plumbing lives here. Individual operations are defined by their
//! callers as query strings plus a `Deserialize` type for `data`.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SpacectlError};
use crate::http::HttpClient;
use crate::session::Session;
use crate::utils::truncate_for_display;

const MAX_ERROR_BODY: usize = 512;

/// Request body sent to the GraphQL endpoint
#[derive(Debug, Serialize)]
pub struct GraphqlRequest<'a> {
    /// Query or mutation document
    pub query: &'a str,
    /// Operation variables
    #[serde(skip_serializing_if = "Value::is_null")]
    pub variables: Value,
}

/// One entry of the `errors` array
#[derive(Debug, Clone, Deserialize)]
pub struct GraphqlErrorMessage {
    /// Human-readable message
    pub message: String,
}

/// Response body returned by the GraphQL endpoint
#[derive(Debug, Deserialize)]
pub struct GraphqlResponse<T> {
    /// Operation result
    pub data: Option<T>,
    /// Errors reported by the server
    #[serde(default = "Vec::new")]
    pub errors: Vec<GraphqlErrorMessage>,
}

impl<T> GraphqlResponse<T> {
    /// Turn the envelope into its data, failing on reported errors
    ///
    /// # Errors
    ///
    /// Returns `SpacectlError::Graphql` with every message joined when the
    /// `errors` array is non-empty, or when `data` is missing.
    pub fn into_result(self) -> Result<T> {
        if !self.errors.is_empty() {
            let messages: Vec<&str> = self.errors.iter().map(|e| e.message.as_str()).collect();
            return Err(SpacectlError::graphql(messages.join("; ")));
        }
        self.data
            .ok_or_else(|| SpacectlError::graphql("response contained no data"))
    }
}

/// Execute one GraphQL operation against `endpoint`.
///
/// # Errors
///
/// - `SpacectlError::Authentication` on 401 and 403 responses
/// - `SpacectlError::Graphql` on other non-2xx responses and reported errors
/// - `SpacectlError::Network` / `SpacectlError::Cancelled` from the transport
pub async fn execute<T: DeserializeOwned>(
    http: &HttpClient,
    endpoint: &str,
    bearer: Option<&str>,
    query: &str,
    variables: Value,
    cancel: &CancellationToken,
) -> Result<T> {
    let mut request = http.post(endpoint).json(&GraphqlRequest { query, variables });
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }

    let (status, body) = http.send(request, cancel).await?;
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(SpacectlError::authentication(format!(
            "server rejected the request with {status}"
        )));
    }
    if !status.is_success() {
        return Err(SpacectlError::graphql(format!(
            "server returned {status}: {}",
            truncate_for_display(&body, MAX_ERROR_BODY)
        )));
    }

    let response: GraphqlResponse<T> = serde_json::from_str(&body)?;
    response.into_result()
}

/// Authenticated GraphQL client bound to one session
#[derive(Debug, Clone)]
pub struct GraphqlClient {
    http: HttpClient,
    session: Arc<Session>,
}

impl GraphqlClient {
    /// Create a client that authenticates through `session`
    #[must_use]
    pub fn new(http: HttpClient, session: Arc<Session>) -> Self {
        Self { http, session }
    }

    /// The session backing this client
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Run a query or mutation with a fresh bearer token.
    ///
    /// # Errors
    ///
    /// Returns token refresh errors from the session, then any error from
    /// [`execute`].
    pub async fn query<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let token = self.session.bearer_token(cancel).await?;
        execute(
            &self.http,
            self.session.endpoint(),
            Some(&token),
            query,
            variables,
            cancel,
        )
        .await
    }
}
