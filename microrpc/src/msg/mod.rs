//! Wire frames exchanged between client and server.
//!
//! Every frame starts with the same 15-byte fixed header (big-endian):
//!
//! ```text
//! | 4 bytes       | 4 bytes     | 4 bytes    | 1       | 1          | 1          |
//! | header_length | body_length | request_id | version | compressor | serializer |
//! ```
//!
//! followed by a variable header (`header_length - 15` bytes) and the body
//! (`body_length` bytes). The lengths sit at fixed offsets, so a reader learns
//! the size of a whole frame from its first 8 bytes.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, ErrorKind, Result};

mod request;
pub use request::{Meta, ONEWAY_KEY, Request};

mod response;
pub use response::Response;

/// Size of the fixed header shared by requests and responses.
pub const FIXED_HEADER_LEN: usize = 15;

/// Number of leading bytes that hold `header_length` and `body_length`.
pub const LENGTH_PREFIX_LEN: usize = 8;

/// Largest frame accepted by the encoder and the stream reader.
pub const MAX_MSG_SIZE: usize = 64 << 20;

pub(crate) const SPLITTER: u8 = b'\n';
pub(crate) const PAIR_SPLITTER: u8 = b'\r';

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FixedHeader {
    pub header_length: u32,
    pub body_length: u32,
    pub request_id: u32,
    pub version: u8,
    pub compressor: u8,
    pub serializer: u8,
}

impl FixedHeader {
    /// Parses the fixed header and checks the declared lengths against `frame`.
    pub fn parse(frame: &[u8]) -> Result<Self> {
        if frame.len() < FIXED_HEADER_LEN {
            return Err(Error::new(
                ErrorKind::TcpParseMsgFailed,
                format!("frame is too short: {}", frame.len()),
            ));
        }

        let mut cur = &frame[..FIXED_HEADER_LEN];
        let header = Self {
            header_length: cur.get_u32(),
            body_length: cur.get_u32(),
            request_id: cur.get_u32(),
            version: cur.get_u8(),
            compressor: cur.get_u8(),
            serializer: cur.get_u8(),
        };

        let total = frame_len(header.header_length, header.body_length)?;
        if total != frame.len() {
            return Err(Error::new(
                ErrorKind::TcpParseMsgFailed,
                format!(
                    "declared frame length {total} (header {}, body {}) does not match {} bytes",
                    header.header_length,
                    header.body_length,
                    frame.len()
                ),
            ));
        }
        Ok(header)
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u32(self.header_length);
        buf.put_u32(self.body_length);
        buf.put_u32(self.request_id);
        buf.put_u8(self.version);
        buf.put_u8(self.compressor);
        buf.put_u8(self.serializer);
    }
}

/// Validates a pair of declared lengths and returns the total frame size.
///
/// # Errors
///
/// Fails when `header_length` cannot hold the fixed header or the frame would
/// exceed [`MAX_MSG_SIZE`].
pub fn frame_len(header_length: u32, body_length: u32) -> Result<usize> {
    let header_length = usize::try_from(header_length)?;
    let body_length = usize::try_from(body_length)?;
    if header_length < FIXED_HEADER_LEN {
        return Err(Error::new(
            ErrorKind::TcpParseMsgFailed,
            format!("invalid header length: {header_length}"),
        ));
    }
    match header_length.checked_add(body_length) {
        Some(total) if total <= MAX_MSG_SIZE => Ok(total),
        _ => Err(Error::new(
            ErrorKind::TcpParseMsgFailed,
            format!("msg is too long: header {header_length}, body {body_length}"),
        )),
    }
}

/// Reads the two lengths out of the first [`LENGTH_PREFIX_LEN`] bytes of a frame.
#[must_use]
pub fn split_length_prefix(prefix: [u8; LENGTH_PREFIX_LEN]) -> (u32, u32) {
    let mut cur = &prefix[..];
    (cur.get_u32(), cur.get_u32())
}

pub(crate) fn to_u32(len: usize) -> Result<u32> {
    if len > MAX_MSG_SIZE {
        return Err(Error::new(
            ErrorKind::SerializeFailed,
            format!("msg is too long: {len}"),
        ));
    }
    Ok(u32::try_from(len)?)
}
