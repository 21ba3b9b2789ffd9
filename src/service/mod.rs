//! Role drivers over the transport: client and server actions, the
//! connection listener, and the diagnostic bridge.

use std::sync::Arc;

use crate::error::ExchangeError;

pub mod bridge;
pub mod channel;
pub mod client;
pub mod listener;
pub mod server;

/// Per-action error callback. Transport failures are handed here instead of
/// crossing connection boundaries.
pub type ErrorHook = Arc<dyn Fn(&ExchangeError) + Send + Sync>;

/// The default hook: log and continue.
pub fn log_errors() -> ErrorHook {
    Arc::new(|e| tracing::error!(error = %e, "exchange error"))
}
