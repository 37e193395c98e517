//! Hybrid envelope for the browser-login token.
//!
//! The CLI publishes an RSA public key. The server picks a random AES key,
//! encrypts the JWT with it (AES-GCM, nonce || ciphertext), and encrypts the
//! AES key with RSA-OAEP(SHA-512). Both parts come back base64-url encoded.

use aes_gcm::aead::{Aead, Nonce};
use aes_gcm::{Aes128Gcm, Aes256Gcm, KeyInit};
use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::pkcs8::der::pem::{self, LineEnding};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha512;
use zeroize::Zeroizing;

use crate::error::SpacectlError;

const NONCE_SIZE: usize = 12;
const PEM_LABEL: &str = "RSA PUBLIC KEY";

/// RSA modulus size used for login keys
pub const KEY_BITS: usize = 4096;

/// Base64-url that writes no padding and accepts either form when reading
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

type Result<T> = std::result::Result<T, CryptoError>;

/// Envelope failures
#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    /// RSA key generation or OAEP failure
    #[error(transparent)]
    Rsa(#[from] rsa::Error),
    /// Public key DER encoding or decoding failure
    #[error("public key encoding failed: {0}")]
    Spki(#[from] rsa::pkcs8::spki::Error),
    /// Parameter is not base64
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// PEM armor is malformed
    #[error("malformed PEM block: {0}")]
    Pem(#[from] pem::Error),
    /// PEM block carries a label other than `RSA PUBLIC KEY`
    #[error("unexpected PEM label '{0}'")]
    PemLabel(String),
    /// AES key is neither 128 nor 256 bits
    #[error("AES key length is {0} while 16 or 32 is expected")]
    KeyLength(usize),
    /// Ciphertext cannot even hold a nonce
    #[error("ciphertext is {0} bytes, shorter than its nonce")]
    Truncated(usize),
    /// Authentication tag mismatch
    #[error("AES decryption failed")]
    Aead,
    /// Plaintext is not a string
    #[error("decrypted token is not utf8")]
    Utf8(#[from] std::string::FromUtf8Error),
    /// Blocking key generation task died
    #[error("key generation was interrupted: {0}")]
    Join(String),
}

impl From<CryptoError> for SpacectlError {
    fn from(e: CryptoError) -> Self {
        SpacectlError::crypto(e.to_string())
    }
}

/// Ephemeral RSA key pair for one login.
///
/// The private half never leaves this value.
pub struct LoginKeyPair {
    private: RsaPrivateKey,
}

impl LoginKeyPair {
    /// Generate a key pair of `bits` bits on the blocking pool
    pub async fn generate(bits: usize) -> Result<Self> {
        let private = tokio::task::spawn_blocking(move || {
            RsaPrivateKey::new(&mut rand::thread_rng(), bits)
        })
        .await
        .map_err(|e| CryptoError::Join(e.to_string()))??;

        Ok(Self { private })
    }

    /// Public half
    #[must_use]
    pub fn public_key(&self) -> RsaPublicKey {
        self.private.to_public_key()
    }

    /// Public key as sent in the `key` query parameter
    pub fn public_key_param(&self) -> Result<String> {
        let der = self.public_key().to_public_key_der()?;
        Ok(URL_SAFE_LENIENT.encode(pem_encode(der.as_bytes())?))
    }

    /// RSA-OAEP(SHA-512) decrypt the AES key
    pub fn decrypt_key(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        Ok(Zeroizing::new(
            self.private.decrypt(Oaep::new::<Sha512>(), ciphertext)?,
        ))
    }

    /// Decode and decrypt the callback's `token` and `key` parameters
    pub fn open(&self, token: &str, key: &str) -> Result<String> {
        let token = URL_SAFE_LENIENT.decode(token)?;
        let key = URL_SAFE_LENIENT.decode(key)?;

        let aes_key = self.decrypt_key(&key)?;
        let plaintext = decrypt_aes(&aes_key, &token)?;
        Ok(String::from_utf8(plaintext)?)
    }
}

impl std::fmt::Debug for LoginKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginKeyPair").finish_non_exhaustive()
    }
}

fn pem_encode(der: &[u8]) -> Result<String> {
    Ok(pem::encode_string(PEM_LABEL, LineEnding::LF, der)?)
}

fn pem_decode(armored: &str) -> Result<Vec<u8>> {
    let (label, der) = pem::decode_vec(armored.as_bytes())?;
    if label != PEM_LABEL {
        return Err(CryptoError::PemLabel(label.to_string()));
    }
    Ok(der)
}

/// Parse a `key` query parameter back into a public key
pub fn decode_public_key_param(param: &str) -> Result<RsaPublicKey> {
    let armored = String::from_utf8(URL_SAFE_LENIENT.decode(param)?)?;
    Ok(RsaPublicKey::from_public_key_der(&pem_decode(&armored)?)?)
}

fn open_with<C: KeyInit + Aead>(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let cipher = C::new_from_slice(key).map_err(|_| CryptoError::KeyLength(key.len()))?;
    let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
    cipher
        .decrypt(Nonce::<C>::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Aead)
}

fn seal_with<C: KeyInit + Aead>(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = C::new_from_slice(key).map_err(|_| CryptoError::KeyLength(key.len()))?;

    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::<C>::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Aead)?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// AES-GCM decrypt `nonce || ciphertext` with a 16 or 32 byte key
pub fn decrypt_aes(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::Truncated(data.len()));
    }
    match key.len() {
        16 => open_with::<Aes128Gcm>(key, data),
        32 => open_with::<Aes256Gcm>(key, data),
        other => Err(CryptoError::KeyLength(other)),
    }
}

/// AES-GCM encrypt to `nonce || ciphertext` with a 16 or 32 byte key
pub fn encrypt_aes(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    match key.len() {
        16 => seal_with::<Aes128Gcm>(key, plaintext),
        32 => seal_with::<Aes256Gcm>(key, plaintext),
        other => Err(CryptoError::KeyLength(other)),
    }
}

/// Server side of the envelope: returns the `(token, key)` callback parameters
pub fn seal(public_key_param: &str, aes_key: &[u8], jwt: &str) -> Result<(String, String)> {
    let public_key = decode_public_key_param(public_key_param)?;
    let key = public_key.encrypt(&mut rand::thread_rng(), Oaep::new::<Sha512>(), aes_key)?;
    let token = encrypt_aes(aes_key, jwt.as_bytes())?;

    Ok((URL_SAFE_LENIENT.encode(token), URL_SAFE_LENIENT.encode(key)))
}
