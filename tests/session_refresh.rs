//! Sessions against a local GraphQL stub

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::Json;
use jsonwebtoken::{EncodingKey, Header};
use serde_json::{Value, json};
use spacectl::config::{ENV_API_ENDPOINT, ENV_API_KEY_ID, ENV_API_KEY_SECRET, ENV_PROFILE};
use spacectl::graphql::GraphqlClient;
use spacectl::version::detect_instance;
use spacectl::{
    Environment, HttpClient, InstanceVersion, Profile, ProfileStore, SessionFactory,
    SpacectlError, StoredCredentials, Version,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn unix_in(secs: u64) -> u64 {
    (SystemTime::now() + Duration::from_secs(secs))
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn jwt(claims: &Value) -> String {
    jsonwebtoken::encode(&Header::default(), claims, &EncodingKey::from_secret(b"test")).unwrap()
}

#[derive(Default)]
struct Stub {
    exchanges: AtomicUsize,
    self_hosted_version: Option<&'static str>,
}

async fn graphql(
    State(stub): State<Arc<Stub>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    let query = body["query"].as_str().unwrap_or_default();

    if query.contains("apiKeyUser") {
        let n = stub.exchanges.fetch_add(1, Ordering::SeqCst);
        // The first token is already inside the freshness guard.
        let valid_until = if n == 0 { unix_in(10) } else { unix_in(3600) };
        return Json(json!({
            "data": { "apiKeyUser": { "jwt": format!("token-{n}"), "validUntil": valid_until } }
        }));
    }

    if query.contains("debugInfo") {
        let authorized = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("Bearer "));
        if !authorized {
            return Json(json!({ "errors": [{ "message": "unauthorized" }] }));
        }
        return Json(json!({
            "data": { "debugInfo": { "selfHostedVersion": stub.self_hosted_version } }
        }));
    }

    Json(json!({ "errors": [{ "message": format!("unexpected query: {query}") }] }))
}

async fn serve(stub: Arc<Stub>) -> String {
    let router = Router::new()
        .route("/graphql", post(graphql))
        .with_state(stub);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    format!("http://{addr}")
}

fn factory() -> SessionFactory {
    SessionFactory::new(HttpClient::new().unwrap())
}

#[tokio::test]
async fn test_api_key_session_refreshes_once() {
    let stub = Arc::new(Stub::default());
    let endpoint = serve(Arc::clone(&stub)).await;
    let cancel = CancellationToken::new();

    let creds = StoredCredentials::api_key(format!("{endpoint}/"), "01ABC", "secret");
    let session = factory().from_credentials(&creds, &cancel).await.unwrap();
    assert_eq!(session.endpoint(), format!("{endpoint}/graphql"));
    assert_eq!(stub.exchanges.load(Ordering::SeqCst), 1);

    assert_eq!(session.bearer_token(&cancel).await.unwrap(), "token-1");
    assert_eq!(session.bearer_token(&cancel).await.unwrap(), "token-1");
    assert_eq!(stub.exchanges.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_default_chain_prefers_environment() {
    let stub = Arc::new(Stub::default());
    let endpoint = serve(Arc::clone(&stub)).await;
    let dir = TempDir::new().unwrap();
    let store = ProfileStore::with_root(dir.path());

    let env: Environment = [
        (ENV_API_ENDPOINT, endpoint.as_str()),
        (ENV_API_KEY_ID, "01ABC"),
        (ENV_API_KEY_SECRET, "secret"),
    ]
    .into_iter()
    .collect();

    let session = factory()
        .from_default_chain(&env, &store, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(session.endpoint(), format!("{endpoint}/graphql"));
}

#[tokio::test]
async fn test_default_chain_uses_profile_override() {
    let stub = Arc::new(Stub::default());
    let endpoint = serve(Arc::clone(&stub)).await;
    let dir = TempDir::new().unwrap();
    let store = ProfileStore::with_root(dir.path());

    store
        .create(&Profile::new(
            "selected",
            StoredCredentials::api_key("https://unreachable.invalid", "k", "s"),
        ))
        .unwrap();
    store
        .save(&Profile::new(
            "override",
            StoredCredentials::api_key(&endpoint, "01ABC", "secret"),
        ))
        .unwrap();

    let env: Environment = [(ENV_PROFILE, "override")].into_iter().collect();
    let session = factory()
        .from_default_chain(&env, &store, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(session.endpoint(), format!("{endpoint}/graphql"));
    assert_eq!(store.current_alias().unwrap().as_deref(), Some("selected"));
}

#[tokio::test]
async fn test_default_chain_reports_both_sources() {
    let dir = TempDir::new().unwrap();
    let store = ProfileStore::with_root(dir.path());

    let err = factory()
        .from_default_chain(&Environment::default(), &store, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_authentication());
    let message = err.to_string();
    assert!(message.contains(ENV_API_ENDPOINT), "{message}");
    assert!(message.contains("no profile selected"), "{message}");
}

#[tokio::test]
async fn test_default_chain_keeps_transport_errors() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let dir = TempDir::new().unwrap();
    let store = ProfileStore::with_root(dir.path());
    store
        .create(&Profile::new(
            "offline",
            StoredCredentials::api_key(&dead, "01ABC", "secret"),
        ))
        .unwrap();

    let err = factory()
        .from_default_chain(&Environment::default(), &store, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SpacectlError::Network(_)), "{err}");
    assert!(!err.is_authentication());
}

#[tokio::test]
async fn test_detect_self_hosted_instance() {
    let stub = Arc::new(Stub {
        self_hosted_version: Some("v2.3.4"),
        ..Stub::default()
    });
    let endpoint = serve(Arc::clone(&stub)).await;
    let cancel = CancellationToken::new();

    let token = jwt(&json!({ "aud": [endpoint], "exp": unix_in(3600) }));
    let creds = StoredCredentials::api_token("https://ignored.example.com", token);
    let session = factory().from_credentials(&creds, &cancel).await.unwrap();
    let client = GraphqlClient::new(HttpClient::new().unwrap(), Arc::new(session));

    assert_eq!(
        detect_instance(Some(&client), &cancel).await,
        InstanceVersion::SelfHosted(Version::new(2, 3, 4))
    );
    assert_eq!(stub.exchanges.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_detect_saas_instance() {
    let stub = Arc::new(Stub::default());
    let endpoint = serve(Arc::clone(&stub)).await;
    let cancel = CancellationToken::new();

    let creds = StoredCredentials::api_key(&endpoint, "01ABC", "secret");
    let session = factory().from_credentials(&creds, &cancel).await.unwrap();
    let client = GraphqlClient::new(HttpClient::new().unwrap(), Arc::new(session));

    assert_eq!(detect_instance(Some(&client), &cancel).await, InstanceVersion::SaaS);
}

#[tokio::test]
async fn test_unreachable_backend_is_unknown_instance() {
    let stub = Arc::new(Stub::default());
    let endpoint = serve(Arc::clone(&stub)).await;
    let cancel = CancellationToken::new();

    // The audience points at a port nothing listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let token = jwt(&json!({ "aud": dead, "exp": unix_in(3600) }));
    let creds = StoredCredentials::api_token(&endpoint, token);
    let session = factory().from_credentials(&creds, &cancel).await.unwrap();
    let client = GraphqlClient::new(HttpClient::new().unwrap(), Arc::new(session));

    assert_eq!(
        detect_instance(Some(&client), &cancel).await,
        InstanceVersion::Unknown
    );
}

#[tokio::test]
async fn test_cancelled_chain() {
    let stub = Arc::new(Stub::default());
    let endpoint = serve(stub).await;
    let env: Environment = [
        (ENV_API_ENDPOINT, endpoint.as_str()),
        (ENV_API_KEY_ID, "01ABC"),
        (ENV_API_KEY_SECRET, "secret"),
    ]
    .into_iter()
    .collect();
    let dir = TempDir::new().unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = factory()
        .from_default_chain(&env, &ProfileStore::with_root(dir.path()), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, SpacectlError::Cancelled), "{err}");
}
