//! # Client Actions
//!
//! Connect, handshake, converse, close.
//!
//! A [`Client`] owns one connection for one conversation: sockets are not
//! reused across actions. [`converse`] drives a caller-supplied conversation
//! on the current task; [`converse_detached`] is the fire-and-forget variant
//! that spawns the conversation and reports failures through the error hook.

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

use crate::config::ClientConfig;
use crate::core::frame::TransferTally;
use crate::error::{ExchangeError, Result};
use crate::protocol::handshake::client_handshake;
use crate::protocol::message::Payload;
use crate::service::channel::ClientChannel;
use crate::service::ErrorHook;
use crate::transport;
use crate::utils::crypto::Crypto;

/// One authenticated connection, client role.
pub struct Client {
    channel: ClientChannel,
    version: String,
    next_request_id: u64,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("version", &self.version)
            .field("next_request_id", &self.next_request_id)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Open the socket, perform the handshake, record the negotiated
    /// version.
    ///
    /// # Errors
    /// `ExchangeError::Handshake` when the server rejects the shared key.
    #[instrument(skip(config), fields(address = %config.address))]
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let (io, peer) =
            transport::connect(&config.address, config.mode, config.connect_timeout).await?;
        let crypto = config.secret.as_deref().map(Crypto::from_secret);
        let mut channel = ClientChannel::new(io, crypto);

        let version = client_handshake(&mut channel, &config.version).await?;
        debug!(%peer, version = %version, "client connected");

        Ok(Self {
            channel,
            version,
            next_request_id: 1,
        })
    }

    /// Version the server agreed to speak.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// One typed round trip through the value codec.
    pub async fn exchange<Req, Resp>(&mut self, request: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        self.channel.exchange(request).await
    }

    /// One text round trip; protocol-end instead of a reply is absorbed as
    /// an empty string.
    pub async fn exchange_text(&mut self, request: &str) -> Result<String> {
        self.channel.exchange_text(request).await
    }

    /// Object façade: wrap `data` in a [`Payload::Request`] for `action` and
    /// unwrap the paired response.
    pub async fn request(&mut self, action: &str, data: Value) -> Result<Value> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let reply: Payload = self
            .exchange(&Payload::Request {
                action: action.to_owned(),
                request_id,
                data,
            })
            .await?;

        match reply {
            Payload::Response {
                request_id: reply_id,
                data,
            } if reply_id == request_id => Ok(data),
            Payload::Failure { message, .. } => Err(ExchangeError::Remote(message)),
            other => Err(ExchangeError::Decode(format!(
                "expected the response paired to request {request_id}, got a {} payload",
                other.kind()
            ))),
        }
    }

    /// Cumulative wire-byte counters for this connection.
    pub fn tally(&self) -> Arc<TransferTally> {
        self.channel.tally()
    }

    /// End the conversation and shut the socket down.
    pub async fn close(self) -> Result<()> {
        self.channel.close().await
    }
}

/// Connect, run `conversation` with the client, then close — all on the
/// caller's task. The connection closes whether the conversation succeeds or
/// not.
pub async fn converse<T>(
    config: &ClientConfig,
    conversation: impl for<'a> FnOnce(&'a mut Client) -> BoxFuture<'a, Result<T>>,
) -> Result<T> {
    let mut client = Client::connect(config).await?;
    let outcome = conversation(&mut client).await;
    let closed = client.close().await;
    let value = outcome?;
    closed?;
    Ok(value)
}

/// Fire-and-forget variant of [`converse`]: the conversation runs on a new
/// task and failures are handed to `on_error`.
pub fn converse_detached(
    config: ClientConfig,
    conversation: impl for<'a> FnOnce(&'a mut Client) -> BoxFuture<'a, Result<()>> + Send + 'static,
    on_error: ErrorHook,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = converse(&config, conversation).await {
            on_error(&e);
        }
    })
}
