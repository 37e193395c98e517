//! Shared HTTP client
//!
//! One [`HttpClient`] is built in the entry point and cloned into every
//! session and call site. Clones share the connection pool.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use crate::error::{Result, SpacectlError};

/// Default timeout applied to every request
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Hook that adds headers to every outgoing request
pub type HeaderInjector = Arc<dyn Fn(&mut HeaderMap) + Send + Sync>;

fn default_user_agent() -> String {
    format!("spacectl/{}", crate::VERSION)
}

/// Options for [`HttpClient`]
#[derive(Debug, Clone, TypedBuilder)]
pub struct HttpClientConfig {
    /// Whole-request timeout
    #[builder(default = DEFAULT_TIMEOUT)]
    pub timeout: Duration,

    /// `User-Agent` header value
    #[builder(default = default_user_agent(), setter(into))]
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// HTTP client shared across sessions
#[derive(Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    injector: Option<HeaderInjector>,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("has_header_injector", &self.injector.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Create a client with default options
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self> {
        Self::with_config(&HttpClientConfig::default())
    }

    /// Create a client with explicit options
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn with_config(config: &HttpClientConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            inner,
            injector: None,
        })
    }

    /// Attach a header injector run on every request
    #[must_use]
    pub fn with_header_injector(mut self, injector: HeaderInjector) -> Self {
        self.injector = Some(injector);
        self
    }

    /// Start a POST request with injected headers applied
    pub fn post(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self.inner.post(url);
        match &self.injector {
            Some(inject) => {
                let mut headers = HeaderMap::new();
                inject(&mut headers);
                builder.headers(headers)
            }
            None => builder,
        }
    }

    /// Send a request and read the whole body, honoring `cancel`.
    ///
    /// # Errors
    ///
    /// Returns `SpacectlError::Cancelled` if `cancel` fires first, or
    /// `SpacectlError::Network` on transport failure. Non-2xx statuses are
    /// returned to the caller, not treated as errors.
    pub async fn send(
        &self,
        request: reqwest::RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<(StatusCode, String)> {
        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SpacectlError::Cancelled),
            result = exchange => Ok(result?),
        }
    }
}
