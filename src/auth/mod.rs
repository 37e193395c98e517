//! Credential profiles
//!
//! Profiles are named credential bundles for one Spacelift account. They are
//! stored as JSON files (mode 0600) in `~/.spacelift` (mode 0700), one per
//! alias, and a symbolic link named `current` selects the one a bare
//! invocation uses.
//!
//! # Example
//!
//! ```no_run
//! use spacectl::auth::{Profile, ProfileStore, StoredCredentials};
//!
//! # fn main() -> spacectl::Result<()> {
//! let store = ProfileStore::new();
//! let credentials = StoredCredentials::api_key("https://acme.app.spacelift.io", "01ABC", "secret");
//! store.create(&Profile::new("acme", credentials))?;
//!
//! let current = store.current()?.expect("just selected");
//! assert_eq!(current.alias, "acme");
//! # Ok(())
//! # }
//! ```
//!
//! # Profile file format
//!
//! ```json
//! { "type": 1, "endpoint": "https://acme.app.spacelift.io", "key_id": "01ABC", "key_secret": "..." }
//! ```
//!
//! `type` is 1 for API keys, 2 for GitHub access tokens and 4 for API tokens.
//! Fields a kind does not use are omitted.

mod credentials;
mod store;

pub use credentials::{CURRENT_ALIAS, CredentialKind, Profile, StoredCredentials, validate_alias};
pub use store::ProfileStore;
