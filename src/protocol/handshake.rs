//! # Handshake
//!
//! The opening exchange of every conversation.
//!
//! The client sends the literal greeting frame and requires the literal
//! greeting back; when a shared key is configured the greeting travels
//! encrypted, so a mismatched key fails here — before any application data
//! is exchanged. The greeting is followed by one version round trip: the
//! client offers its application version and the server answers with the
//! version it will speak, picked by a [`VersionPolicy`].
//!
//! Servers reject bad-key clients silently (the request handler is never
//! invoked); clients surface the same situation as an explicit
//! "server did not accept the encryption key" error.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{constants, ExchangeError, Result};
use crate::protocol::message::GREETING;
use crate::service::channel::{ClientChannel, ServerChannel};

/// How a server answers the client's offered version.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionPolicy {
    /// Speak whatever the client offered.
    #[default]
    EchoClient,
    /// Always answer with this version, e.g. to negotiate clients down.
    Fixed(String),
}

impl VersionPolicy {
    pub fn negotiate(&self, offered: &str) -> String {
        match self {
            VersionPolicy::EchoClient => offered.to_owned(),
            VersionPolicy::Fixed(version) => version.clone(),
        }
    }
}

/// Client side: greet, verify the greeting echo, offer `version`.
/// Returns the version the server negotiated.
///
/// # Errors
/// `ExchangeError::Handshake` when the server closes, answers anything but
/// the greeting, or the reply fails to decrypt — all of which mean the key
/// was not accepted.
#[instrument(skip(channel, version))]
pub async fn client_handshake(channel: &mut ClientChannel, version: &str) -> Result<String> {
    let greeting = channel.exchange_raw(GREETING).await.map_err(|e| match e {
        ExchangeError::Decryption | ExchangeError::Decode(_) => {
            ExchangeError::Handshake(constants::ERR_KEY_REJECTED.into())
        }
        other => other,
    })?;

    match greeting {
        Some(reply) if reply == GREETING => {}
        _ => return Err(ExchangeError::Handshake(constants::ERR_KEY_REJECTED.into())),
    }

    let negotiated = channel
        .exchange_raw(version)
        .await?
        .ok_or(ExchangeError::ConnectionClosed)?;
    debug!(offered = version, negotiated = %negotiated, "handshake complete");
    Ok(negotiated)
}

/// Server side: verify the greeting, echo it, answer the offered version
/// through `policy`. Returns the negotiated version.
///
/// The greeting echo and the negotiated version ride the server channel's
/// deferred flush: each leaves the wire when the next request is awaited.
#[instrument(skip(channel, policy))]
pub async fn server_handshake(
    channel: &mut ServerChannel,
    policy: &VersionPolicy,
) -> Result<String> {
    match channel.recv_text().await? {
        Some(greeting) if greeting == GREETING => {}
        _ => return Err(ExchangeError::Handshake(constants::ERR_BAD_GREETING.into())),
    }
    channel.send_text(GREETING).await?;

    let offered = channel
        .recv_text()
        .await?
        .ok_or(ExchangeError::ConnectionClosed)?;
    let negotiated = policy.negotiate(&offered);
    channel.send_text(&negotiated).await?;

    debug!(offered = %offered, negotiated = %negotiated, peer = %channel.peer(), "handshake answered");
    Ok(negotiated)
}
