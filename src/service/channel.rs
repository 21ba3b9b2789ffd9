//! # Exchange Channels
//!
//! Role-specific frame channels over one socket.
//!
//! The protocol is strict request/reply turn-taking, and the two roles flush
//! differently: a client pushes its frame out immediately and blocks for
//! exactly one reply; a server queues its reply and only flushes when it next
//! asks for a request (servers answer, they don't auto-push). Those two
//! disciplines are two distinct types — [`ClientChannel`] and
//! [`ServerChannel`] — so the asymmetry cannot be inverted by flipping a role
//! flag.
//!
//! One exchange in flight per connection is enforced by `&mut self`: a
//! channel can only be driven from one task at a time. Concurrent outstanding
//! requests require separate connections.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::codec::Framed;
use tracing::trace;

use crate::core::codec;
use crate::core::frame::{FrameCodec, TransferTally};
use crate::error::{ExchangeError, Result};
use crate::transport::BoxedIo;
use crate::utils::crypto::Crypto;

/// State shared by both channel roles: the framed socket, the optional
/// cipher, and the byte tally.
struct Exchange {
    framed: Framed<BoxedIo, FrameCodec>,
    crypto: Option<Crypto>,
    tally: Arc<TransferTally>,
}

impl Exchange {
    fn new(io: BoxedIo, crypto: Option<Crypto>) -> Self {
        let frame_codec = FrameCodec::new();
        let tally = frame_codec.tally();
        Self {
            framed: Framed::new(io, frame_codec),
            crypto,
            tally,
        }
    }

    /// Text payload → frame bytes: encrypt + base64 when a key is
    /// configured, clear text otherwise.
    fn armor(&self, text: &str) -> Result<Bytes> {
        match &self.crypto {
            Some(crypto) => Ok(Bytes::from(crypto.seal_text(text)?)),
            None => Ok(Bytes::copy_from_slice(text.as_bytes())),
        }
    }

    /// Frame bytes → text payload; reverses [`Exchange::armor`].
    fn unarmor(&self, frame: &[u8]) -> Result<String> {
        let text = std::str::from_utf8(frame)
            .map_err(|e| ExchangeError::Decode(format!("frame is not utf-8: {e}")))?;
        match &self.crypto {
            Some(crypto) => crypto.open_text(text),
            None => Ok(text.to_owned()),
        }
    }

    /// Block for the next inbound frame. `None` is the protocol-end signal.
    async fn next_text(&mut self) -> Result<Option<String>> {
        match self.framed.next().await {
            Some(frame) => {
                let text = self.unarmor(&frame?)?;
                trace!(len = text.len(), "frame received");
                Ok(Some(text))
            }
            None => Ok(None),
        }
    }
}

/// Client end of one conversation: every send flushes immediately and blocks
/// for its paired reply.
pub struct ClientChannel {
    exchange: Exchange,
}

impl ClientChannel {
    pub(crate) fn new(io: BoxedIo, crypto: Option<Crypto>) -> Self {
        Self {
            exchange: Exchange::new(io, crypto),
        }
    }

    /// One raw round trip: write, flush, await one reply frame.
    /// `None` means the server closed instead of answering.
    pub(crate) async fn exchange_raw(&mut self, request: &str) -> Result<Option<String>> {
        let frame = self.exchange.armor(request)?;
        self.exchange.framed.send(frame).await?;
        self.exchange.next_text().await
    }

    /// One text round trip. Protocol-end instead of a reply is absorbed into
    /// an empty string, so text request loops terminate without an error arm.
    pub async fn exchange_text(&mut self, request: &str) -> Result<String> {
        Ok(self.exchange_raw(request).await?.unwrap_or_default())
    }

    /// One typed round trip through the value codec.
    pub async fn exchange<Req, Resp>(&mut self, request: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let text = codec::encode(request)?;
        let reply = self
            .exchange_raw(&text)
            .await?
            .ok_or(ExchangeError::ConnectionClosed)?;
        codec::decode(&reply)
    }

    /// Cumulative wire-byte counters for this connection.
    pub fn tally(&self) -> Arc<TransferTally> {
        Arc::clone(&self.exchange.tally)
    }

    /// Flush anything pending and shut the socket down.
    pub async fn close(mut self) -> Result<()> {
        self.exchange.framed.close().await
    }
}

/// Server end of one conversation: replies are queued with [`send`] and only
/// reach the wire when [`recv`] is next invoked.
///
/// [`send`]: ServerChannel::send_text
/// [`recv`]: ServerChannel::recv_text
pub struct ServerChannel {
    exchange: Exchange,
    peer: SocketAddr,
    hangup: bool,
}

impl ServerChannel {
    pub(crate) fn new(io: BoxedIo, crypto: Option<Crypto>, peer: SocketAddr) -> Self {
        Self {
            exchange: Exchange::new(io, crypto),
            peer,
            hangup: false,
        }
    }

    /// Address of the connected client.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queue a text reply without flushing it.
    pub async fn send_text(&mut self, reply: &str) -> Result<()> {
        let frame = self.exchange.armor(reply)?;
        self.exchange.framed.feed(frame).await
    }

    /// Queue a typed reply without flushing it.
    pub async fn send<T: Serialize>(&mut self, reply: &T) -> Result<()> {
        let text = codec::encode(reply)?;
        self.send_text(&text).await
    }

    /// Flush any queued reply, then block for the next request.
    /// `Ok(None)` is the protocol-end signal that terminates request loops.
    pub async fn recv_text(&mut self) -> Result<Option<String>> {
        self.exchange.framed.flush().await?;
        self.exchange.next_text().await
    }

    /// Typed variant of [`ServerChannel::recv_text`].
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        match self.recv_text().await? {
            Some(text) => Ok(Some(codec::decode(&text)?)),
            None => Ok(None),
        }
    }

    /// Mark the connection for forced closure. The serve loop closes after
    /// the queued reply is flushed, even if the client has more data queued.
    pub fn hang_up(&mut self) {
        self.hangup = true;
    }

    /// Whether a handler asked for forced closure.
    pub fn hangup_requested(&self) -> bool {
        self.hangup
    }

    /// Cumulative wire-byte counters for this connection.
    pub fn tally(&self) -> Arc<TransferTally> {
        Arc::clone(&self.exchange.tally)
    }

    /// Flush any queued reply and shut the socket down.
    pub async fn finish(mut self) -> Result<()> {
        self.exchange.framed.close().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pair(crypto: Option<&str>) -> (ClientChannel, ServerChannel) {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let key = crypto.map(Crypto::from_secret);
        let client = ClientChannel::new(Box::new(client_io), key.clone());
        let server = ServerChannel::new(
            Box::new(server_io),
            key,
            "127.0.0.1:0".parse().expect("addr"),
        );
        (client, server)
    }

    #[tokio::test]
    async fn text_round_trip_clear() {
        let (mut client, mut server) = pair(None);

        let served = tokio::spawn(async move {
            let request = server.recv_text().await.unwrap().unwrap();
            server.send_text(&format!("echo:{request}")).await.unwrap();
            // reply leaves the wire on the next recv, which also sees the end
            assert_eq!(server.recv_text().await.unwrap(), None);
        });

        let reply = client.exchange_text("ping").await.unwrap();
        assert_eq!(reply, "echo:ping");
        client.close().await.unwrap();
        served.await.unwrap();
    }

    #[tokio::test]
    async fn encrypted_round_trip() {
        let (mut client, mut server) = pair(Some("shelf key"));

        let served = tokio::spawn(async move {
            let request = server.recv_text().await.unwrap().unwrap();
            assert_eq!(request, "secret ping");
            server.send_text("secret pong").await.unwrap();
            assert_eq!(server.recv_text().await.unwrap(), None);
        });

        assert_eq!(
            client.exchange_text("secret ping").await.unwrap(),
            "secret pong"
        );
        client.close().await.unwrap();
        served.await.unwrap();
    }

    #[tokio::test]
    async fn server_reply_is_deferred_until_recv() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let mut client = ClientChannel::new(Box::new(client_io), None);
        let mut server = ServerChannel::new(
            Box::new(server_io),
            None,
            "127.0.0.1:0".parse().expect("addr"),
        );

        server.send_text("queued").await.unwrap();

        // The reply is fed but not flushed: the client must not see it yet.
        let undelivered =
            tokio::time::timeout(Duration::from_millis(50), client.exchange_raw("req")).await;
        assert!(undelivered.is_err(), "reply must stay queued before recv");

        // recv flushes the queued frame and picks up the pending request.
        let request = server.recv_text().await.unwrap().unwrap();
        assert_eq!(request, "req");
        let reply = client.exchange_raw("next").await.unwrap().unwrap();
        assert_eq!(reply, "queued");
    }

    #[tokio::test]
    async fn wrong_key_surfaces_as_decryption_error() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let mut client = ClientChannel::new(Box::new(client_io), Some(Crypto::from_secret("a")));
        let mut server = ServerChannel::new(
            Box::new(server_io),
            Some(Crypto::from_secret("b")),
            "127.0.0.1:0".parse().expect("addr"),
        );

        tokio::spawn(async move {
            let _ = client.exchange_raw("hello").await;
        });

        let err = server.recv_text().await.unwrap_err();
        assert!(matches!(err, ExchangeError::Decryption));
    }
}
