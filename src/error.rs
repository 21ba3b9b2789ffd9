//! # Error Types
//!
//! Error handling for the object-exchange transport.
//!
//! This module defines all error variants that can occur during an exchange,
//! from low-level I/O errors to handshake rejections.
//!
//! ## Error Categories
//! - **I/O Errors**: socket failures, partial frames, premature close
//! - **Handshake Errors**: the peer rejected the greeting or the shared key
//! - **Codec Errors**: malformed escaping, bad base64, value decode failures
//! - **Cryptographic Errors**: decryption failures (wrong key)
//! - **TLS Errors**: failures establishing the certificate-less TLS channel
//!
//! The protocol-end signal ("no more frames") is *not* an error: receive
//! operations report it as `Ok(None)` so request loops terminate cleanly.

use std::io;
use thiserror::Error;

/// Error message constants shared between modules and tests.
pub mod constants {
    /// Client-visible handshake rejection.
    pub const ERR_KEY_REJECTED: &str = "server did not accept the encryption key";

    /// Server-side handshake rejection.
    pub const ERR_BAD_GREETING: &str = "client did not send the expected greeting";

    /// Framing errors
    pub const ERR_PARTIAL_FRAME: &str = "stream ended inside a frame";
    pub const ERR_DANGLING_ESCAPE: &str = "frame ends with a dangling escape byte";
    pub const ERR_UNKNOWN_ESCAPE: &str = "escape byte precedes a byte that needs no escaping";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "connection closed";

    /// Cryptographic errors
    pub const ERR_DECRYPTION_FAILED: &str = "decryption failed";
    pub const ERR_ENCRYPTION_FAILED: &str = "encryption failed";
    pub const ERR_CIPHERTEXT_TOO_SHORT: &str = "ciphertext shorter than a nonce";
}

/// Primary error type for all exchange operations.
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("decryption failed")]
    Decryption,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("remote handler failed: {0}")]
    Remote(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ExchangeError {
    /// Whether this error is the kind expected while a listener is shutting
    /// down (closed sockets, reset connections). Such errors are swallowed
    /// once a stop was requested.
    pub fn is_shutdown_noise(&self) -> bool {
        matches!(self, ExchangeError::Io(_) | ExchangeError::ConnectionClosed)
    }
}

/// Type alias for Results using ExchangeError
pub type Result<T> = std::result::Result<T, ExchangeError>;
