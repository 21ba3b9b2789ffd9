//! # Wire Messages
//!
//! The fixed greeting and the tagged payload schema used by the object
//! façade.
//!
//! The transport itself moves opaque text frames; this schema is what the
//! object-typed request/reply layer puts inside them. It is an explicit sum
//! type — a frame either asks for something, answers, or reports a handler
//! failure — so a misrouted payload fails decoding instead of being
//! reinterpreted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Literal first frame of every conversation, in both directions.
pub const GREETING: &str = "HELLO";

/// One object-façade payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// A request for the named action.
    Request {
        action: String,
        request_id: u64,
        data: Value,
    },
    /// The reply paired to `request_id`.
    Response { request_id: u64, data: Value },
    /// The handler failed; carries the error text instead of data.
    Failure { request_id: u64, message: String },
}

impl Payload {
    /// Short tag for logging and bridge diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Request { .. } => "request",
            Payload::Response { .. } => "response",
            Payload::Failure { .. } => "failure",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::core::codec;
    use serde_json::json;

    #[test]
    fn payload_roundtrip() {
        let request = Payload::Request {
            action: "list_books".into(),
            request_id: 3,
            data: json!({"shelf": "fantasy"}),
        };
        let text = codec::encode(&request).unwrap();
        assert_eq!(codec::decode::<Payload>(&text).unwrap(), request);
    }

    #[test]
    fn kind_tags() {
        let response = Payload::Response {
            request_id: 1,
            data: json!(null),
        };
        assert_eq!(response.kind(), "response");
    }

    #[test]
    fn unknown_kind_fails_decoding() {
        let err = codec::decode::<Payload>("{\"kind\":\"push\"}").unwrap_err();
        assert!(matches!(err, crate::error::ExchangeError::Decode(_)));
    }
}
