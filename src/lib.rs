//! # spacectl
//!
//! Core of the Spacelift command-line client: credential profiles,
//! self-refreshing API sessions, browser login, and command dispatch that
//! adapts to the backend version.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use spacectl::auth::ProfileStore;
//! use spacectl::config::Environment;
//! use spacectl::graphql::GraphqlClient;
//! use spacectl::http::HttpClient;
//! use spacectl::session::SessionFactory;
//! use spacectl::version::detect_instance;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> spacectl::Result<()> {
//!     let http = HttpClient::new()?;
//!     let cancel = CancellationToken::new();
//!
//!     let session = SessionFactory::new(http.clone())
//!         .from_default_chain(&Environment::from_process(), &ProfileStore::new(), &cancel)
//!         .await?;
//!     let client = GraphqlClient::new(http, Arc::new(session));
//!
//!     println!("talking to {}", detect_instance(Some(&client), &cancel).await);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`auth`] - credential model and the `~/.spacelift` profile store
//! - [`session`] - bearer tokens from profiles or `SPACELIFT_*` variables
//! - [`login`] - loopback browser login with an encrypted token hand-off
//! - [`version`] - command variants resolved against SaaS or Self-Hosted
//! - [`graphql`], [`http`] - request plumbing shared by everything above
//! - [`config`] - environment-derived defaults
//!
//! ## Logging
//!
//! The crate emits [`tracing`] events and never installs a subscriber.
//! Secrets are never logged.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod config;
pub mod error;
pub mod graphql;
pub mod http;
pub mod login;
pub mod session;
pub mod utils;
pub mod version;

// Re-export commonly used types
pub use auth::{CredentialKind, Profile, ProfileStore, StoredCredentials};
pub use config::{Environment, LoginDefaults, LoginMethod};
pub use error::{Result, SpacectlError};
pub use graphql::GraphqlClient;
pub use http::{HttpClient, HttpClientConfig};
pub use login::{BrowserHandshake, HandshakeConfig};
pub use session::{Session, SessionFactory};
pub use version::{EarliestVersion, InstanceVersion, Version, VersionedCommand};

/// Version of the client
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
