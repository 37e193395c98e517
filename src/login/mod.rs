//! Browser login
//!
//! The handshake publishes an ephemeral RSA public key through the login
//! URL, listens on a loopback port, and receives the new API token back
//! encrypted so that nothing else on the machine can read it in transit.
//!
//! ```text
//! CLI                         browser                      Spacelift
//!  | begin: keys + listener      |                             |
//!  |---- open <endpoint>/cli_login?key=..&port=.. ------------>|
//!  |                             |<------ user logs in ------->|
//!  |<--- GET /?token=..&key=.. --|<------ 307 to loopback -----|
//!  | decrypt, 307 auth_success ->|                             |
//! ```

mod browser;
mod crypto;

pub use browser::{BrowserHandshake, HandshakeConfig, SHUTDOWN_GRACE, open_browser};
pub use crypto::{
    CryptoError, KEY_BITS, LoginKeyPair, decode_public_key_param, decrypt_aes, encrypt_aes, seal,
};
