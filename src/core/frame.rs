//! # Frame Codec
//!
//! Turns a raw byte stream into delimited frames and back.
//!
//! A frame is the escaped payload followed by one unescaped sentinel byte
//! (ASCII backspace, `0x08`). Escaping prefixes every backslash and sentinel
//! byte in the payload with a backslash, so arbitrary binary payloads —
//! including ones containing the sentinel itself — survive the trip losslessly.
//!
//! `FrameCodec` implements [`tokio_util::codec::Decoder`] and
//! [`tokio_util::codec::Encoder`] so it plugs into `Framed` like any other
//! codec. The decoder keeps its scan position between calls, so feeding a
//! large frame in small chunks stays linear in the frame size.
//!
//! Cumulative wire bytes in both directions are tracked on a shared
//! [`TransferTally`] for instrumentation.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{constants, ExchangeError};

/// Byte marking the end of a frame.
pub const SENTINEL: u8 = 0x08;

/// Byte prefixed to protected bytes inside a payload.
pub const ESCAPE: u8 = b'\\';

/// Escape a payload into `buf`: every `ESCAPE` and `SENTINEL` byte is
/// prefixed with `ESCAPE`.
pub fn escape_into(payload: &[u8], buf: &mut BytesMut) {
    for &b in payload {
        if b == ESCAPE || b == SENTINEL {
            buf.put_u8(ESCAPE);
        }
        buf.put_u8(b);
    }
}

/// Escape a payload into a fresh buffer.
pub fn escape(payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(payload.len() + payload.len() / 8 + 1);
    escape_into(payload, &mut buf);
    buf.to_vec()
}

/// Reverse [`escape`] on a frame body (the bytes before the sentinel).
///
/// # Errors
/// `ExchangeError::Decode` if the body ends mid-escape or an escape byte
/// precedes a byte that needs no escaping.
pub fn unescape(body: &[u8]) -> Result<Vec<u8>, ExchangeError> {
    let mut out = Vec::with_capacity(body.len());
    let mut iter = body.iter();
    while let Some(&b) = iter.next() {
        if b == ESCAPE {
            match iter.next() {
                Some(&next) if next == ESCAPE || next == SENTINEL => out.push(next),
                Some(_) => {
                    return Err(ExchangeError::Decode(constants::ERR_UNKNOWN_ESCAPE.into()))
                }
                None => return Err(ExchangeError::Decode(constants::ERR_DANGLING_ESCAPE.into())),
            }
        } else {
            out.push(b);
        }
    }
    Ok(out)
}

/// Cumulative wire-byte counters, shared by everything that touches one
/// connection. Uses atomics so readers never contend with the I/O path.
#[derive(Debug, Default)]
pub struct TransferTally {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl TransferTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_received(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
    }

    /// Total bytes written to the wire, escaping and sentinels included.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Total bytes consumed from the wire, escaping and sentinels included.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }
}

/// Sentinel-delimited frame codec with escape armor.
///
/// Decoder state survives partial reads: `scan_pos` remembers how far the
/// buffer was already scanned and `in_escape` whether the last scanned byte
/// opened an escape sequence.
#[derive(Debug)]
pub struct FrameCodec {
    tally: Arc<TransferTally>,
    scan_pos: usize,
    in_escape: bool,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_tally(Arc::new(TransferTally::new()))
    }

    /// Build a codec reporting into an existing tally.
    pub fn with_tally(tally: Arc<TransferTally>) -> Self {
        Self {
            tally,
            scan_pos: 0,
            in_escape: false,
        }
    }

    pub fn tally(&self) -> Arc<TransferTally> {
        Arc::clone(&self.tally)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ExchangeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ExchangeError> {
        let mut i = self.scan_pos;
        let mut escaped = self.in_escape;

        while i < src.len() {
            let b = src[i];
            if escaped {
                escaped = false;
            } else if b == ESCAPE {
                escaped = true;
            } else if b == SENTINEL {
                let body = src.split_to(i);
                src.advance(1);
                self.scan_pos = 0;
                self.in_escape = false;
                self.tally.add_received(i as u64 + 1);
                return Ok(Some(Bytes::from(unescape(&body)?)));
            }
            i += 1;
        }

        self.scan_pos = i;
        self.in_escape = escaped;
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ExchangeError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            // Clean EOF between frames is the protocol-end signal.
            Ok(None)
        } else {
            Err(ExchangeError::Decode(constants::ERR_PARTIAL_FRAME.into()))
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ExchangeError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), ExchangeError> {
        dst.reserve(item.len() + item.len() / 8 + 1);
        let before = dst.len();
        escape_into(&item, dst);
        dst.put_u8(SENTINEL);
        self.tally.add_sent((dst.len() - before) as u64);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn contains_unescaped_sentinel(bytes: &[u8]) -> bool {
        let mut escaped = false;
        for &b in bytes {
            if escaped {
                escaped = false;
            } else if b == ESCAPE {
                escaped = true;
            } else if b == SENTINEL {
                return true;
            }
        }
        false
    }

    fn roundtrip(payload: &[u8]) {
        let escaped = escape(payload);
        assert!(!contains_unescaped_sentinel(&escaped));
        assert_eq!(unescape(&escaped).unwrap(), payload);
    }

    #[test]
    fn escape_roundtrips_arbitrary_bytes() {
        roundtrip(b"");
        roundtrip(b"plain text");
        roundtrip(&[SENTINEL]);
        roundtrip(&[ESCAPE]);
        roundtrip(&[ESCAPE, SENTINEL, ESCAPE, ESCAPE, SENTINEL]);
        let all: Vec<u8> = (0..=255u8).collect();
        roundtrip(&all);
    }

    #[test]
    fn unescape_rejects_dangling_escape() {
        let err = unescape(&[b'a', ESCAPE]).unwrap_err();
        assert!(matches!(err, ExchangeError::Decode(_)));
    }

    #[test]
    fn unescape_rejects_unknown_escape() {
        let err = unescape(&[ESCAPE, b'x']).unwrap_err();
        assert!(matches!(err, ExchangeError::Decode(_)));
    }

    #[test]
    fn codec_roundtrips_through_buffer() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        let payload = Bytes::from_static(&[1, SENTINEL, 2, ESCAPE, 3]);
        codec.encode(payload.clone(), &mut buf).unwrap();
        codec
            .encode(Bytes::from_static(b"second"), &mut buf)
            .unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), payload);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), &b"second"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn decoder_handles_escape_split_across_reads() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        // First read ends exactly on the escape byte.
        buf.extend_from_slice(&[b'a', ESCAPE]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        // The escaped sentinel arrives next; it must not terminate the frame.
        buf.extend_from_slice(&[SENTINEL, b'b', SENTINEL]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..], &[b'a', SENTINEL, b'b']);
    }

    #[test]
    fn decode_eof_flags_partial_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"unterminated"[..]);
        let err = codec.decode_eof(&mut buf).unwrap_err();
        assert!(matches!(err, ExchangeError::Decode(_)));
    }

    #[test]
    fn tally_counts_wire_bytes() {
        let mut codec = FrameCodec::new();
        let tally = codec.tally();
        let mut buf = BytesMut::new();

        codec
            .encode(Bytes::from_static(&[ESCAPE, b'x']), &mut buf)
            .unwrap();
        // escape doubles the backslash, plus one sentinel
        assert_eq!(tally.bytes_sent(), 4);

        codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(tally.bytes_received(), 4);
    }
}
