//! # object-exchange
//!
//! Framed, optionally-encrypted request/reply transport core.
//!
//! One connection carries one strictly turn-taken conversation: frames are
//! sentinel-delimited and escape-armored, optionally encrypted under a
//! shared key, and opened by a fixed greeting-plus-version handshake. On top
//! of the transport sit role drivers — a client action, a listening server
//! with a task-per-connection accept loop and graceful stop, typed
//! request/reply façades, and a diagnostic bridge that relays and logs a
//! conversation between a client and an upstream server.
//!
//! ## Quick start
//!
//! ```ignore
//! use object_exchange::{Client, ClientConfig, Listener, ListenerConfig};
//! use object_exchange::{ObjectService, Reply};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn demo() -> object_exchange::Result<()> {
//! let mut listener = Listener::bind(&ListenerConfig::default()).await?;
//! listener.start(Arc::new(ObjectService::new(
//!     |_ctx: &object_exchange::RequestContext, action: &str, data: serde_json::Value| {
//!         Ok(Reply::Answer(json!({ "echoed": { "action": action, "data": data } })))
//!     },
//! )));
//!
//! let mut client = Client::connect(&ClientConfig::default()).await?;
//! let reply = client.request("list_books", json!(["a", "b", "c"])).await?;
//! client.close().await?;
//! # Ok(()) }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::{BridgeConfig, ClientConfig, ExchangeConfig, ListenerConfig, LoggingConfig};
pub use error::{ExchangeError, Result};
pub use protocol::handshake::VersionPolicy;
pub use protocol::message::{Payload, GREETING};
pub use service::bridge::{Bridge, Verbosity};
pub use service::channel::{ClientChannel, ServerChannel};
pub use service::client::{converse, converse_detached, Client};
pub use service::listener::{Listener, ListenerState};
pub use service::server::{
    ConnectionDriver, ObjectHandler, ObjectService, Reply, RequestContext, TextHandler,
    TextService,
};
pub use service::{log_errors, ErrorHook};
pub use transport::SocketMode;
