//! # Symmetric Frame Encryption
//!
//! Optional payload encryption for the frame transport.
//!
//! A connection configured with a shared secret encrypts every frame payload
//! with XChaCha20-Poly1305 (random 24-byte nonce prepended to the
//! ciphertext) and base64-encodes the result so the ciphertext travels as
//! plain text through the escape armor. The 256-bit key is derived from the
//! secret string with SHA-256; key material is zeroized once the cipher is
//! built.
//!
//! There is no key agreement on the wire — both ends are handed the secret
//! out-of-band, and the greeting exchange doubles as the key check.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::{constants, ExchangeError, Result};

/// Length of the XChaCha20-Poly1305 nonce prepended to each ciphertext.
pub const NONCE_LEN: usize = 24;

/// Symmetric cipher bound to one connection.
#[derive(Clone)]
pub struct Crypto {
    cipher: XChaCha20Poly1305,
}

impl Crypto {
    /// Build a cipher from a raw 256-bit key.
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(key.into()),
        }
    }

    /// Derive the connection key from a shared secret string.
    pub fn from_secret(secret: &str) -> Self {
        let mut key: [u8; 32] = Sha256::digest(secret.as_bytes()).into();
        let crypto = Self::new(&key);
        key.zeroize();
        crypto
    }

    /// Encrypt a payload; returns `nonce ‖ ciphertext`.
    pub fn seal(&self, plain: &[u8]) -> Result<Vec<u8>> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plain)
            .map_err(|_| ExchangeError::Encode(constants::ERR_ENCRYPTION_FAILED.into()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(nonce.as_slice());
        sealed.extend(ciphertext);
        Ok(sealed)
    }

    /// Decrypt `nonce ‖ ciphertext`. Fails with [`ExchangeError::Decryption`]
    /// when the key does not match.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(ExchangeError::Decode(
                constants::ERR_CIPHERTEXT_TOO_SHORT.into(),
            ));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = XNonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| ExchangeError::Decryption)
    }

    /// Encrypt a text payload and armor it as base64.
    pub fn seal_text(&self, plain: &str) -> Result<String> {
        Ok(STANDARD.encode(self.seal(plain.as_bytes())?))
    }

    /// Reverse [`Crypto::seal_text`].
    pub fn open_text(&self, armored: &str) -> Result<String> {
        let sealed = STANDARD
            .decode(armored)
            .map_err(|e| ExchangeError::Decode(format!("bad base64 armor: {e}")))?;
        let plain = self.open(&sealed)?;
        String::from_utf8(plain).map_err(|e| ExchangeError::Decode(format!("bad utf-8: {e}")))
    }
}

impl std::fmt::Debug for Crypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crypto").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let crypto = Crypto::from_secret("library key");
        let sealed = crypto.seal(b"chapter one").unwrap();
        assert_eq!(crypto.open(&sealed).unwrap(), b"chapter one");
    }

    #[test]
    fn nonces_differ_between_seals() {
        let crypto = Crypto::from_secret("k");
        let a = crypto.seal(b"same").unwrap();
        let b = crypto.seal(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let sealed = Crypto::from_secret("right").seal(b"payload").unwrap();
        let err = Crypto::from_secret("wrong").open(&sealed).unwrap_err();
        assert!(matches!(err, ExchangeError::Decryption));
    }

    #[test]
    fn text_armor_roundtrip() {
        let crypto = Crypto::from_secret("secret");
        let armored = crypto.seal_text("once upon a time").unwrap();
        assert!(armored.is_ascii());
        assert_eq!(crypto.open_text(&armored).unwrap(), "once upon a time");
    }

    #[test]
    fn truncated_ciphertext_is_a_decode_error() {
        let crypto = Crypto::from_secret("secret");
        let err = crypto.open(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, ExchangeError::Decode(_)));
    }
}
