//! # Value Codec
//!
//! Text encoding of typed values for frame payloads.
//!
//! The transport moves UTF-8 text; typed values cross it as JSON through
//! serde. The contract is deliberately narrow: `encode(value) -> text` and
//! `decode(text) -> value`, with decode failures naming the offending type so
//! a malformed payload can be traced to the schema it failed against.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::type_name;

use crate::error::{ExchangeError, Result};

/// Encode a value as a UTF-8 text payload.
pub fn encode<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| ExchangeError::Encode(format!("{}: {e}", type_name::<T>())))
}

/// Decode a text payload into a value, naming the target type on failure.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text)
        .map_err(|e| ExchangeError::Decode(format!("{}: {e}", type_name::<T>())))
}
