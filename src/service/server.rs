//! # Server Actions
//!
//! Per-connection request loops and the handler extension points.
//!
//! A [`ConnectionDriver`] is invoked once per accepted socket. The two
//! provided drivers are the typed façades: [`ObjectService`] speaks the
//! tagged [`Payload`] schema and hands handlers decoded values;
//! [`TextService`] passes raw strings through. Both perform the handshake
//! first — a bad-key client is rejected silently, its handler never invoked —
//! then loop `recv` → handler → `send` until the client signals protocol-end.
//!
//! A handler answers with [`Reply::Answer`] to keep serving, or
//! [`Reply::Hangup`] to force the connection closed after the reply, even if
//! the client still has requests queued (e.g. to cut off a caller that
//! failed authorization).

use futures::future::BoxFuture;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ExchangeError, Result};
use crate::protocol::handshake::{server_handshake, VersionPolicy};
use crate::protocol::message::Payload;
use crate::service::channel::ServerChannel;

/// Connection-scoped facts handed to every handler invocation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Address of the connected client.
    pub peer: SocketAddr,
    /// Version negotiated during the handshake.
    pub version: String,
    /// Identifier pairing this request with its reply.
    pub request_id: u64,
}

/// A handler's verdict on one request.
#[derive(Debug)]
pub enum Reply<T> {
    /// Answer and keep serving this connection.
    Answer(T),
    /// Answer, then force the connection closed.
    Hangup(T),
}

/// Object-typed extension point: `on_request(ctx, action, data) -> reply`.
pub trait ObjectHandler: Send + Sync + 'static {
    fn on_request(&self, ctx: &RequestContext, action: &str, data: Value) -> Result<Reply<Value>>;
}

impl<F> ObjectHandler for F
where
    F: Fn(&RequestContext, &str, Value) -> Result<Reply<Value>> + Send + Sync + 'static,
{
    fn on_request(&self, ctx: &RequestContext, action: &str, data: Value) -> Result<Reply<Value>> {
        self(ctx, action, data)
    }
}

/// String-typed extension point: `on_request(ctx, data) -> reply`, with the
/// negotiated version and request id on the context.
pub trait TextHandler: Send + Sync + 'static {
    fn on_request(&self, ctx: &RequestContext, data: &str) -> Result<Reply<String>>;
}

impl<F> TextHandler for F
where
    F: Fn(&RequestContext, &str) -> Result<Reply<String>> + Send + Sync + 'static,
{
    fn on_request(&self, ctx: &RequestContext, data: &str) -> Result<Reply<String>> {
        self(ctx, data)
    }
}

/// One accepted connection's whole lifecycle. Implemented by the typed
/// façades and by the bridge.
pub trait ConnectionDriver: Send + Sync + 'static {
    fn drive(&self, channel: ServerChannel) -> BoxFuture<'static, Result<()>>;
}

/// Run the handshake, classifying rejections as silent.
///
/// `Ok(None)` means the client was turned away before any application data;
/// only genuine I/O trouble propagates.
async fn shake(channel: &mut ServerChannel, policy: &VersionPolicy) -> Result<Option<String>> {
    match server_handshake(channel, policy).await {
        Ok(version) => Ok(Some(version)),
        Err(
            e @ (ExchangeError::Handshake(_) | ExchangeError::Decryption | ExchangeError::Decode(_)),
        ) => {
            debug!(error = %e, peer = %channel.peer(), "handshake rejected");
            Ok(None)
        }
        Err(other) => Err(other),
    }
}

/// Object façade: serves the tagged [`Payload`] schema.
pub struct ObjectService<H> {
    handler: Arc<H>,
    policy: VersionPolicy,
}

impl<H: ObjectHandler> ObjectService<H> {
    pub fn new(handler: H) -> Self {
        Self::with_policy(handler, VersionPolicy::default())
    }

    pub fn with_policy(handler: H, policy: VersionPolicy) -> Self {
        Self {
            handler: Arc::new(handler),
            policy,
        }
    }
}

impl<H: ObjectHandler> ConnectionDriver for ObjectService<H> {
    fn drive(&self, mut channel: ServerChannel) -> BoxFuture<'static, Result<()>> {
        let handler = Arc::clone(&self.handler);
        let policy = self.policy.clone();

        Box::pin(async move {
            let Some(version) = shake(&mut channel, &policy).await? else {
                return Ok(());
            };
            let peer = channel.peer();

            while let Some(payload) = channel.recv::<Payload>().await? {
                match payload {
                    Payload::Request {
                        action,
                        request_id,
                        data,
                    } => {
                        let ctx = RequestContext {
                            peer,
                            version: version.clone(),
                            request_id,
                        };
                        match handler.on_request(&ctx, &action, data) {
                            Ok(Reply::Answer(data)) => {
                                channel.send(&Payload::Response { request_id, data }).await?
                            }
                            Ok(Reply::Hangup(data)) => {
                                channel.send(&Payload::Response { request_id, data }).await?;
                                channel.hang_up();
                            }
                            Err(e) => {
                                channel
                                    .send(&Payload::Failure {
                                        request_id,
                                        message: e.to_string(),
                                    })
                                    .await?
                            }
                        }
                    }
                    other => {
                        channel
                            .send(&Payload::Failure {
                                request_id: 0,
                                message: format!("unexpected {} payload", other.kind()),
                            })
                            .await?
                    }
                }
                if channel.hangup_requested() {
                    break;
                }
            }
            channel.finish().await
        })
    }
}

/// String façade: raw text in, raw text out.
pub struct TextService<H> {
    handler: Arc<H>,
    policy: VersionPolicy,
}

impl<H: TextHandler> TextService<H> {
    pub fn new(handler: H) -> Self {
        Self::with_policy(handler, VersionPolicy::default())
    }

    pub fn with_policy(handler: H, policy: VersionPolicy) -> Self {
        Self {
            handler: Arc::new(handler),
            policy,
        }
    }
}

impl<H: TextHandler> ConnectionDriver for TextService<H> {
    fn drive(&self, mut channel: ServerChannel) -> BoxFuture<'static, Result<()>> {
        let handler = Arc::clone(&self.handler);
        let policy = self.policy.clone();

        Box::pin(async move {
            let Some(version) = shake(&mut channel, &policy).await? else {
                return Ok(());
            };
            let peer = channel.peer();
            let mut request_id = 0u64;

            while let Some(data) = channel.recv_text().await? {
                request_id += 1;
                let ctx = RequestContext {
                    peer,
                    version: version.clone(),
                    request_id,
                };
                match handler.on_request(&ctx, &data)? {
                    Reply::Answer(reply) => channel.send_text(&reply).await?,
                    Reply::Hangup(reply) => {
                        channel.send_text(&reply).await?;
                        channel.hang_up();
                        break;
                    }
                }
            }
            channel.finish().await
        })
    }
}
