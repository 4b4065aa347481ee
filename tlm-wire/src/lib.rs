//! Wire formats for the telemetry output pipeline.
//!
//! - [`packet`]: a zero-copy view over CCSDS-style space packets (stream id, sequence
//!   count, secondary-header time).
//! - [`frame`]: framing codec for the telemetry and command packets this node produces.
//! - [`evs`]: the binary event log file format (file header + fixed-size event records).

use thiserror::Error;

pub mod evs;
pub mod frame;
pub mod packet;

pub use packet::{Packet, StreamId, TimeFormat, APP_ID_MASK, MAX_APP_ID};

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("Truncated data: got {len} bytes, need {needed}")]
    Truncated { len: usize, needed: usize },
    #[error("Invalid file content type: {0:#010x}")]
    ContentType(u32),
    #[error("Invalid file subtype: {0}")]
    SubType(u32),
    #[error("Packet too large: {0} bytes")]
    Oversized(usize),
}

/// Reads a fixed-width, NUL-padded string field.
pub fn get_fixed_str(src: &[u8]) -> String {
    let end = src.iter().position(|b| *b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}

/// Writes `s` into a fixed-width field of `width` bytes, truncating and NUL-padding.
pub fn put_fixed_str(dst: &mut bytes::BytesMut, s: &str, width: usize) {
    use bytes::BufMut;

    let bytes = s.as_bytes();
    let n = bytes.len().min(width);
    dst.put_slice(&bytes[..n]);
    dst.put_bytes(0, width - n);
}
