use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use foldhash::fast::RandomState;

use super::{FIXED_HEADER_LEN, FixedHeader, PAIR_SPLITTER, SPLITTER, to_u32};
use crate::error::{Error, ErrorKind, Result};

/// Out-of-band request metadata.
pub type Meta = HashMap<String, String, RandomState>;

/// Meta key marking a call whose client does not wait for a response.
pub const ONEWAY_KEY: &str = "one-way";

/// A call frame sent from client to server.
///
/// Variable header layout:
///
/// ```text
/// service_name '\n' method_name '\n' (key '\r' value '\n')*
/// ```
///
/// None of the strings may contain `'\n'` or `'\r'`; [`Request::encode`]
/// refuses them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Request {
    pub header_length: u32,
    pub body_length: u32,
    pub request_id: u32,
    pub version: u8,
    pub compressor: u8,
    pub serializer: u8,

    pub service_name: String,
    pub method_name: String,
    pub meta: Meta,

    pub data: Bytes,
}

impl Request {
    #[must_use]
    pub fn new(service_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            method_name: method_name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn is_oneway(&self) -> bool {
        self.meta.get(ONEWAY_KEY).is_some_and(|v| v == "true")
    }

    pub fn set_oneway(&mut self) {
        self.meta.insert(ONEWAY_KEY.into(), "true".into());
    }

    fn variable_header_len(&self) -> usize {
        let meta_len: usize = self
            .meta
            .iter()
            .map(|(key, value)| key.len() + 1 + value.len() + 1)
            .sum();
        self.service_name.len() + 1 + self.method_name.len() + 1 + meta_len
    }

    /// # Errors
    pub fn calculate_header_length(&mut self) -> Result<()> {
        self.header_length = to_u32(FIXED_HEADER_LEN + self.variable_header_len())?;
        Ok(())
    }

    /// # Errors
    pub fn calculate_body_length(&mut self) -> Result<()> {
        self.body_length = to_u32(self.data.len())?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        check_text("service name", &self.service_name)?;
        check_text("method name", &self.method_name)?;
        for (key, value) in &self.meta {
            check_text("meta key", key)?;
            check_text("meta value", value)?;
        }
        Ok(())
    }

    /// Encodes the request into a frame.
    ///
    /// Lengths are computed from the content, so stale `header_length` and
    /// `body_length` fields do not affect the output.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a name or meta entry contains a delimiter
    /// byte, or `SerializeFailed` if the frame would be too large.
    pub fn encode(&self) -> Result<Bytes> {
        self.validate()?;

        let header_length = to_u32(FIXED_HEADER_LEN + self.variable_header_len())?;
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

        buf.extend_from_slice(self.service_name.as_bytes());
        buf.extend_from_slice(&[SPLITTER]);
        buf.extend_from_slice(self.method_name.as_bytes());
        buf.extend_from_slice(&[SPLITTER]);
        for (key, value) in &self.meta {
            buf.extend_from_slice(key.as_bytes());
            buf.extend_from_slice(&[PAIR_SPLITTER]);
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(&[SPLITTER]);
        }
        buf.extend_from_slice(&self.data);

        Ok(buf.freeze())
    }

    /// Decodes a complete request frame.
    ///
    /// # Errors
    ///
    /// Returns `TcpParseMsgFailed` for truncated frames, inconsistent lengths
    /// or a malformed variable header.
    pub fn decode(frame: Bytes) -> Result<Self> {
        let fixed = FixedHeader::parse(&frame)?;
        let header_end = fixed.header_length as usize;

        let mut header = &frame[FIXED_HEADER_LEN..header_end];
        let service_name = take_until(&mut header, SPLITTER, "service name")?;
        let method_name = take_until(&mut header, SPLITTER, "method name")?;

        let mut meta = Meta::default();
        while !header.is_empty() {
            let entry = take_until(&mut header, SPLITTER, "meta entry")?;
            let mut pair = entry.as_bytes();
            let key = take_until(&mut pair, PAIR_SPLITTER, "meta key")?;
            let value = utf8(pair, "meta value")?;
            meta.insert(key, value);
        }

        Ok(Self {
            header_length: fixed.header_length,
            body_length: fixed.body_length,
            request_id: fixed.request_id,
            version: fixed.version,
            compressor: fixed.compressor,
            serializer: fixed.serializer,
            service_name,
            method_name,
            meta,
            data: frame.slice(header_end..),
        })
    }
}

fn check_text(what: &str, value: &str) -> Result<()> {
    if value.bytes().any(|b| b == SPLITTER || b == PAIR_SPLITTER) {
        return Err(Error::new(
            ErrorKind::InvalidArgument,
            format!("{what} contains a frame delimiter: {value:?}"),
        ));
    }
    Ok(())
}

fn take_until(buf: &mut &[u8], delimiter: u8, what: &str) -> Result<String> {
    let Some(index) = buf.iter().position(|&b| b == delimiter) else {
        return Err(Error::new(
            ErrorKind::TcpParseMsgFailed,
            format!("unterminated {what}"),
        ));
    };
    let value = utf8(&buf[..index], what)?;
    *buf = &buf[index + 1..];
    Ok(value)
}

fn utf8(bytes: &[u8], what: &str) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| Error::new(ErrorKind::TcpParseMsgFailed, format!("invalid {what}: {e}")))
}
