use bytes::{Bytes, BytesMut};

use super::{FIXED_HEADER_LEN, FixedHeader, Request, to_u32};
use crate::error::Result;

/// A reply frame sent from server to client.
///
/// The variable header is the raw error text, its length implied by
/// `header_length - 15`. An empty error means the call succeeded.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Response {
    pub header_length: u32,
    pub body_length: u32,
    pub request_id: u32,
    pub version: u8,
    pub compressor: u8,
    pub serializer: u8,

    pub error: Bytes,

    pub data: Bytes,
}

impl Response {
    /// Creates an empty response echoing the request's fixed header fields.
    #[must_use]
    pub fn for_request(req: &Request) -> Self {
        Self {
            request_id: req.request_id,
            version: req.version,
            compressor: req.compressor,
            serializer: req.serializer,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        if self.error.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.error).into_owned())
        }
    }

    /// # Errors
    pub fn calculate_header_length(&mut self) -> Result<()> {
        self.header_length = to_u32(FIXED_HEADER_LEN + self.error.len())?;
        Ok(())
    }

    /// # Errors
    pub fn calculate_body_length(&mut self) -> Result<()> {
        self.body_length = to_u32(self.data.len())?;
        Ok(())
    }

    /// Encodes the response into a frame, computing lengths from the content.
    ///
    /// # Errors
    ///
    /// Returns `SerializeFailed` if the frame would be too large.
    pub fn encode(&self) -> Result<Bytes> {
        let header_length = to_u32(FIXED_HEADER_LEN + self.error.len())?;
        let body_length = to_u32(self.data.len())?;
        to_u32(header_length as usize + body_length as usize)?;

        let mut buf = BytesMut::with_capacity(header_length as usize + body_length as usize);
        FixedHeader {
            header_length,
            body_length,
            request_id: self.request_id,
            version: self.version,
            compressor: self.compressor,
            serializer: self.serializer,
        }
        .write(&mut buf);
        buf.extend_from_slice(&self.error);
        buf.extend_from_slice(&self.data);
        Ok(buf.freeze())
    }

    /// Decodes a complete response frame.
    ///
    /// # Errors
    ///
    /// Returns `TcpParseMsgFailed` for truncated frames or inconsistent lengths.
    pub fn decode(frame: Bytes) -> Result<Self> {
        let fixed = FixedHeader::parse(&frame)?;
        let header_end = fixed.header_length as usize;
        Ok(Self {
            header_length: fixed.header_length,
            body_length: fixed.body_length,
            request_id: fixed.request_id,
            version: fixed.version,
            compressor: fixed.compressor,
            serializer: fixed.serializer,
            error: frame.slice(FIXED_HEADER_LEN..header_end),
            data: frame.slice(header_end..),
        })
    }
}
