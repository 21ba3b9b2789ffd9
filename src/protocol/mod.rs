//! Wire protocol: greeting, version negotiation, and the payload schema.

pub mod handshake;
pub mod message;
