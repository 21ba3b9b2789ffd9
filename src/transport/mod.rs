//! # Socket Transport
//!
//! Plain-TCP and certificate-less-TLS socket plumbing beneath the channels.
//!
//! Channels are written against [`BoxedIo`] so the same code path serves both
//! socket modes; the listener and client pick the mode from configuration.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::Result;

pub mod tls;

/// Object-safe alias for anything a channel can ride on.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

/// A boxed bidirectional byte stream (plain TCP or TLS).
pub type BoxedIo = Box<dyn Io>;

/// How a listener or client dresses its sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocketMode {
    /// Raw TCP.
    #[default]
    Plain,
    /// TLS with an ephemeral self-signed identity the peer does not verify.
    /// Authentication happens at the application layer via the shared key.
    AnonymousTls,
}

/// Open a client socket in the given mode.
///
/// A zero `connect_timeout` waits indefinitely.
pub async fn connect(
    addr: &str,
    mode: SocketMode,
    connect_timeout: Duration,
) -> Result<(BoxedIo, SocketAddr)> {
    let stream = if connect_timeout.is_zero() {
        TcpStream::connect(addr).await?
    } else {
        tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                io::Error::new(io::ErrorKind::TimedOut, format!("connecting to {addr}"))
            })??
    };
    let peer = stream.peer_addr()?;
    debug!(%peer, ?mode, "socket opened");

    let io: BoxedIo = match mode {
        SocketMode::Plain => Box::new(stream),
        SocketMode::AnonymousTls => tls::connect(stream).await?,
    };
    Ok((io, peer))
}
