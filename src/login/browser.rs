//! Loopback callback server for browser login

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::response::Redirect;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;
use url::Url;

use super::crypto::{KEY_BITS, LoginKeyPair};
use crate::auth::{CredentialKind, StoredCredentials};
use crate::config::{DEFAULT_BIND_HOST, LoginDefaults};
use crate::error::{Result, SpacectlError};
use crate::session::TokenClaims;

/// Time the callback server gets to finish in-flight responses
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Where and how the callback server listens
#[derive(Debug, Clone, TypedBuilder)]
pub struct HandshakeConfig {
    /// Host to bind
    #[builder(default = DEFAULT_BIND_HOST.to_string(), setter(into))]
    pub host: String,

    /// Port to bind, 0 lets the OS pick
    #[builder(default = 0)]
    pub port: u16,

    /// RSA modulus size
    #[builder(default = KEY_BITS)]
    pub key_bits: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl From<&LoginDefaults> for HandshakeConfig {
    fn from(defaults: &LoginDefaults) -> Self {
        Self::builder()
            .host(defaults.bind_host.clone())
            .port(defaults.bind_port)
            .build()
    }
}

/// `endpoint` with `segment` appended to its path
fn endpoint_page(endpoint: &Url, segment: &str) -> Url {
    let mut url = endpoint.clone();
    let path = format!("{}/{segment}", endpoint.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    url
}

struct CallbackState {
    keys: LoginKeyPair,
    success_url: String,
    failure_url: String,
    result_tx: Mutex<Option<oneshot::Sender<Result<String>>>>,
}

impl CallbackState {
    fn open(&self, params: &HashMap<String, String>) -> Result<String> {
        let (Some(token), Some(key)) = (params.get("token"), params.get("key")) else {
            return Err(SpacectlError::login(
                "callback is missing the token or key parameter",
            ));
        };
        let jwt = self.keys.open(token, key)?;
        TokenClaims::parse(&jwt)?;
        Ok(jwt)
    }
}

async fn callback(
    State(state): State<Arc<CallbackState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Redirect {
    let outcome = state.open(&params);
    let target = if outcome.is_ok() {
        &state.success_url
    } else {
        &state.failure_url
    };

    let sender = state
        .result_tx
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    match sender {
        Some(tx) => {
            if let Err(e) = &outcome {
                tracing::debug!("login callback failed: {e}");
            }
            if tx.send(outcome).is_err() {
                tracing::debug!("login callback arrived after the handshake was abandoned");
            }
        }
        None => tracing::debug!("ignoring repeated login callback"),
    }

    Redirect::temporary(target)
}

/// A browser login in progress.
///
/// The callback server runs from [`BrowserHandshake::begin`] until the
/// handshake is waited on, cancelled, or dropped.
///
/// # Example
///
/// ```no_run
/// use spacectl::auth::StoredCredentials;
/// use spacectl::login::{BrowserHandshake, HandshakeConfig};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> spacectl::Result<()> {
/// let credentials = StoredCredentials::api_token("https://acme.app.spacelift.io", "");
/// let handshake = BrowserHandshake::begin(credentials, &HandshakeConfig::default()).await?;
/// println!("Open {}", handshake.login_url());
///
/// let credentials = handshake.wait(&CancellationToken::new()).await?;
/// # Ok(())
/// # }
/// ```
pub struct BrowserHandshake {
    credentials: StoredCredentials,
    local_addr: SocketAddr,
    login_url: Url,
    result_rx: oneshot::Receiver<Result<String>>,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
}

impl std::fmt::Debug for BrowserHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserHandshake")
            .field("endpoint", &self.credentials.endpoint)
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl BrowserHandshake {
    /// Generate a key pair and start the callback server.
    ///
    /// # Errors
    ///
    /// - `SpacectlError::Login` if `credentials` are not API token credentials
    ///   or the listener cannot be bound
    /// - `SpacectlError::InvalidEndpoint` for a malformed endpoint
    /// - `SpacectlError::Crypto` if key generation fails
    pub async fn begin(credentials: StoredCredentials, config: &HandshakeConfig) -> Result<Self> {
        if credentials.kind != CredentialKind::ApiToken {
            return Err(SpacectlError::login(format!(
                "browser login is only available for API token profiles, not {}",
                credentials.kind
            )));
        }

        let endpoint = Url::parse(&credentials.endpoint)
            .map_err(|e| SpacectlError::invalid_endpoint(format!("{}: {e}", credentials.endpoint)))?;

        let keys = LoginKeyPair::generate(config.key_bits).await?;
        let key_param = keys.public_key_param()?;

        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|e| {
                SpacectlError::login(format!("cannot listen on {}:{}: {e}", config.host, config.port))
            })?;
        let local_addr = listener.local_addr()?;

        let mut login_url = endpoint_page(&endpoint, "cli_login");
        login_url
            .query_pairs_mut()
            .append_pair("key", &key_param)
            .append_pair("port", &local_addr.port().to_string());

        let (result_tx, result_rx) = oneshot::channel();
        let state = Arc::new(CallbackState {
            keys,
            success_url: endpoint_page(&endpoint, "auth_success").to_string(),
            failure_url: endpoint_page(&endpoint, "auth_failure").to_string(),
            result_tx: Mutex::new(Some(result_tx)),
        });
        let router = Router::new().route("/", get(callback)).with_state(state);

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone().cancelled_owned();
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(signal)
                .await
            {
                tracing::warn!("login callback server failed: {e}");
            }
        });

        tracing::info!(%local_addr, "waiting for browser login callback");
        Ok(Self {
            credentials,
            local_addr,
            login_url,
            result_rx,
            shutdown,
            server,
        })
    }

    /// Page the user must open to log in
    #[must_use]
    pub fn login_url(&self) -> &Url {
        &self.login_url
    }

    /// Address the callback server actually listens on
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Credentials being updated
    #[must_use]
    pub fn credentials(&self) -> &StoredCredentials {
        &self.credentials
    }

    /// Wait for the callback and return the credentials with the new token.
    ///
    /// The server is stopped on every path out of this method: gracefully
    /// (bounded by [`SHUTDOWN_GRACE`]) once the callback arrives, immediately
    /// when `cancel` fires. Nothing is persisted.
    ///
    /// # Errors
    ///
    /// Returns `SpacectlError::Cancelled` when `cancel` fires first, or the
    /// error the callback failed with.
    pub async fn wait(mut self, cancel: &CancellationToken) -> Result<StoredCredentials> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                self.cancel();
                Err(SpacectlError::Cancelled)
            }
            outcome = &mut self.result_rx => {
                self.shutdown_gracefully().await;
                let jwt = outcome.map_err(|_| {
                    SpacectlError::login("callback server stopped before receiving a token")
                })??;
                self.credentials.access_token = jwt;
                Ok(std::mem::take(&mut self.credentials))
            }
        }
    }

    /// Stop the callback server immediately. Safe to call more than once.
    pub fn cancel(&self) {
        self.shutdown.cancel();
        self.server.abort();
    }

    async fn shutdown_gracefully(&mut self) {
        self.shutdown.cancel();
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut self.server).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("login callback server task failed: {e}"),
            Err(_) => {
                tracing::warn!("login callback server did not stop within {SHUTDOWN_GRACE:?}");
                self.server.abort();
            }
        }
    }
}

impl Drop for BrowserHandshake {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Open `url` in the system browser
///
/// # Errors
///
/// Returns `SpacectlError::Login` when no browser launcher can be spawned.
pub fn open_browser(url: &str) -> Result<()> {
    let spawn = |program: &str, args: &[&str]| {
        std::process::Command::new(program)
            .args(args)
            .spawn()
            .map(drop)
            .map_err(|e| SpacectlError::login(format!("could not open browser: {e}")))
    };

    #[cfg(target_os = "macos")]
    return spawn("open", &[url]);

    #[cfg(target_os = "windows")]
    return spawn("cmd", &["/C", "start", "", url]);

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    spawn("xdg-open", &[url])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::login::seal;

    fn config() -> HandshakeConfig {
        HandshakeConfig::builder()
            .host("127.0.0.1")
            .key_bits(2048)
            .build()
    }

    #[test]
    fn test_endpoint_page_keeps_path() {
        let endpoint = Url::parse("https://acme.app.spacelift.io/prefix/").unwrap();
        assert_eq!(
            endpoint_page(&endpoint, "auth_success").as_str(),
            "https://acme.app.spacelift.io/prefix/auth_success"
        );
    }

    #[test]
    fn test_config_from_login_defaults() {
        let config = HandshakeConfig::from(&LoginDefaults::default());
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 0);
        assert_eq!(config.key_bits, 4096);
    }

    #[tokio::test]
    async fn test_rejects_non_token_credentials() {
        let creds = StoredCredentials::api_key("https://acme.app.spacelift.io", "k", "s");
        let err = BrowserHandshake::begin(creds, &config()).await.unwrap_err();
        assert!(matches!(err, SpacectlError::Login(_)), "{err}");
    }

    #[tokio::test]
    async fn test_rejects_malformed_endpoint() {
        let creds = StoredCredentials::api_token("acme", "");
        let err = BrowserHandshake::begin(creds, &config()).await.unwrap_err();
        assert!(matches!(err, SpacectlError::InvalidEndpoint(_)), "{err}");
    }

    #[tokio::test]
    async fn test_login_url() {
        let creds = StoredCredentials::api_token("https://acme.app.spacelift.io", "");
        let handshake = BrowserHandshake::begin(creds, &config()).await.unwrap();

        let url = handshake.login_url();
        assert_eq!(url.path(), "/cli_login");
        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["port"], handshake.local_addr().port().to_string());
        assert!(handshake.local_addr().ip().is_loopback());
        assert!(handshake.local_addr().port() > 0);

        let (token, key) = seal(&params["key"], &[9u8; 32], "a.b.c").unwrap();
        assert!(!token.is_empty() && !key.is_empty());
    }

    #[tokio::test]
    async fn test_missing_parameters_redirect_to_failure() {
        let creds = StoredCredentials::api_token("https://acme.app.spacelift.io", "");
        let handshake = BrowserHandshake::begin(creds, &config()).await.unwrap();
        let addr = handshake.local_addr();

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();
        let response = client
            .get(format!("http://{addr}/?token=abc"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            response.headers()["location"],
            "https://acme.app.spacelift.io/auth_failure"
        );

        let err = handshake.wait(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SpacectlError::Login(_)), "{err}");
    }

    #[tokio::test]
    async fn test_cancel_stops_server() {
        let creds = StoredCredentials::api_token("https://acme.app.spacelift.io", "");
        let handshake = BrowserHandshake::begin(creds, &config()).await.unwrap();
        let addr = handshake.local_addr();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            handshake.wait(&cancel).await,
            Err(SpacectlError::Cancelled)
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }
}
