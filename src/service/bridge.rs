//! # Diagnostic Bridge
//!
//! A relay server for watching a conversation on the wire.
//!
//! Per accepted downstream connection the bridge opens a matching client
//! connection to the upstream server, forwards the greeting and version
//! negotiation, then relays frame-by-frame: downstream request upstream,
//! upstream reply downstream, synchronously, one exchange at a time, until
//! the downstream side signals protocol-end. Payloads are re-armored per
//! side, so the bridge works across differing keys — and can decrypt for
//! logging.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{ClientConfig, ListenerConfig};
use crate::core::codec;
use crate::error::{ExchangeError, Result};
use crate::protocol::message::{Payload, GREETING};
use crate::service::channel::{ClientChannel, ServerChannel};
use crate::service::listener::Listener;
use crate::service::server::ConnectionDriver;
use crate::transport;
use crate::utils::crypto::Crypto;

/// How much of each relayed frame reaches the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    /// Relay silently.
    #[default]
    Quiet,
    /// Byte counts only.
    Bytes,
    /// The payload text as it crossed the bridge.
    Text,
    /// The decoded payload kind (request/response/failure, or plain text).
    Kind,
    /// The fully decoded content.
    Full,
}

/// The relay server. Wraps a [`Listener`] whose driver bridges every
/// downstream connection to the upstream address.
pub struct Bridge {
    listener: Listener,
}

impl Bridge {
    /// Bind the downstream listener and start relaying to `upstream`.
    pub async fn start(
        listen: &ListenerConfig,
        upstream: ClientConfig,
        verbosity: Verbosity,
    ) -> Result<Self> {
        let mut listener = Listener::bind(listen).await?;
        listener.start(Arc::new(BridgeDriver {
            upstream,
            verbosity,
        }));
        info!(downstream = %listener.local_addr(), "bridge relaying");
        Ok(Self { listener })
    }

    /// Address clients connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Gracefully stop the underlying listener.
    pub async fn stop(&mut self, timeout: Duration) -> Result<()> {
        self.listener.stop(timeout).await
    }
}

struct BridgeDriver {
    upstream: ClientConfig,
    verbosity: Verbosity,
}

impl ConnectionDriver for BridgeDriver {
    fn drive(&self, mut downstream: ServerChannel) -> BoxFuture<'static, Result<()>> {
        let config = self.upstream.clone();
        let verbosity = self.verbosity;

        Box::pin(async move {
            // Downstream greeting; a bad-key client is turned away silently.
            match downstream.recv_text().await {
                Ok(Some(greeting)) if greeting == GREETING => {}
                Ok(_) | Err(ExchangeError::Decryption) | Err(ExchangeError::Decode(_)) => {
                    debug!(peer = %downstream.peer(), "downstream greeting rejected");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }

            // Matching upstream client connection, greeting relayed by hand
            // so the downstream version offer can be forwarded verbatim.
            let (io, upstream_peer) =
                transport::connect(&config.address, config.mode, config.connect_timeout).await?;
            let crypto = config.secret.as_deref().map(Crypto::from_secret);
            let mut upstream = ClientChannel::new(io, crypto);

            match upstream.exchange_raw(GREETING).await? {
                Some(reply) if reply == GREETING => {}
                _ => {
                    return Err(ExchangeError::Handshake(
                        crate::error::constants::ERR_KEY_REJECTED.into(),
                    ))
                }
            }
            downstream.send_text(GREETING).await?;

            let Some(offered) = downstream.recv_text().await? else {
                return upstream.close().await.and(downstream.finish().await);
            };
            let negotiated = upstream
                .exchange_raw(&offered)
                .await?
                .ok_or(ExchangeError::ConnectionClosed)?;
            downstream.send_text(&negotiated).await?;
            info!(
                peer = %downstream.peer(),
                upstream = %upstream_peer,
                version = %negotiated,
                "bridge relaying connection"
            );

            while let Some(request) = downstream.recv_text().await? {
                log_frame(verbosity, "request", &request);
                let reply = upstream.exchange_text(&request).await?;
                log_frame(verbosity, "reply", &reply);
                downstream.send_text(&reply).await?;
            }

            let _ = upstream.close().await;
            downstream.finish().await
        })
    }
}

fn log_frame(verbosity: Verbosity, direction: &str, text: &str) {
    match verbosity {
        Verbosity::Quiet => {}
        Verbosity::Bytes => info!(direction, bytes = text.len(), "relay"),
        Verbosity::Text => info!(direction, payload = %text, "relay"),
        Verbosity::Kind => {
            let kind = codec::decode::<Payload>(text)
                .map(|p| p.kind())
                .unwrap_or("text");
            info!(direction, kind, "relay");
        }
        Verbosity::Full => match serde_json::from_str::<Value>(text) {
            Ok(value) => info!(direction, content = %value, "relay"),
            Err(_) => info!(direction, payload = %text, "relay"),
        },
    }
}
