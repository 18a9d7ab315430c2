//! Pluggable payload serializers.
//!
//! A [`Serializer`] turns call arguments and results into bytes. Every
//! serializer has a stable numeric code that travels in the frame header, so
//! the server can pick the same codec the client used.
//!
//! The trait is object safe: values cross it as `erased_serde` trait objects,
//! so each codec sees the caller's typed value and keeps its own data model.
//! [`SerializerExt`] layers the generic `encode_value`/`decode_value` on top,
//! which lets a [`SerializerRegistry`] hold `Arc<dyn Serializer>` values and
//! still decode into whatever argument type a method declares.

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use foldhash::fast::RandomState;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Error, ErrorKind, Result};

mod json;
pub use json::JsonSerializer;

mod msgpack;
pub use msgpack::MessagePackSerializer;

/// Receives the codec's deserializer for one payload.
pub type DecodeVisitor<'a> =
    dyn FnMut(&mut dyn erased_serde::Deserializer<'_>) -> Result<()> + 'a;

pub trait Serializer: Send + Sync + 'static {
    /// Identifier carried in the `serializer` byte of every frame.
    fn code(&self) -> u8;

    fn name(&self) -> &'static str;

    /// # Errors
    fn encode(&self, value: &dyn erased_serde::Serialize) -> Result<Vec<u8>>;

    /// Runs `visit` over a deserializer reading `data`.
    ///
    /// # Errors
    fn decode(&self, data: &[u8], visit: &mut DecodeVisitor<'_>) -> Result<()>;
}

/// Typed helpers available on every [`Serializer`], including trait objects.
pub trait SerializerExt: Serializer {
    /// # Errors
    ///
    /// Returns `SerializeFailed` if `value` cannot be represented.
    fn encode_value<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes> {
        let value: &dyn erased_serde::Serialize = &value;
        Ok(self.encode(value)?.into())
    }

    /// Decodes `data` into `T`. An empty payload is treated as `null`.
    ///
    /// # Errors
    ///
    /// Returns `DeserializeFailed` on malformed input or a shape mismatch.
    fn decode_value<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        if data.is_empty() {
            return serde_json::from_value(serde_json::Value::Null)
                .map_err(|e| Error::new(ErrorKind::DeserializeFailed, e.to_string()));
        }
        let mut value = None;
        self.decode(data, &mut |de| {
            value = Some(
                erased_serde::deserialize::<T>(de)
                    .map_err(|e| Error::new(ErrorKind::DeserializeFailed, e.to_string()))?,
            );
            Ok(())
        })?;
        value.ok_or_else(|| Error::new(ErrorKind::DeserializeFailed, "payload was not visited"))
    }
}

impl<S: Serializer + ?Sized> SerializerExt for S {}

/// Serializers known to a server, keyed by code. JSON is always present.
#[derive(Clone)]
pub struct SerializerRegistry {
    serializers: HashMap<u8, Arc<dyn Serializer>, RandomState>,
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        let mut registry = Self {
            serializers: HashMap::default(),
        };
        registry.register(JsonSerializer);
        registry
    }
}

impl SerializerRegistry {
    /// Registers a serializer, replacing any previous one with the same code.
    pub fn register(&mut self, serializer: impl Serializer) {
        self.register_arc(Arc::new(serializer));
    }

    pub fn register_arc(&mut self, serializer: Arc<dyn Serializer>) {
        if let Some(old) = self.serializers.insert(serializer.code(), serializer) {
            tracing::warn!("serializer {} replaced for code {}", old.name(), old.code());
        }
    }

    /// # Errors
    ///
    /// Returns `SerializerNotSupported` for an unregistered code.
    pub fn get(&self, code: u8) -> Result<Arc<dyn Serializer>> {
        self.serializers.get(&code).cloned().ok_or_else(|| {
            Error::new(
                ErrorKind::SerializerNotSupported,
                format!("serializer not supported: {code}"),
            )
        })
    }

    pub fn codes(&self) -> impl Iterator<Item = u8> + '_ {
        self.serializers.keys().copied()
    }
}

impl std::fmt::Debug for SerializerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.serializers.iter().map(|(code, s)| (code, s.name())))
            .finish()
    }
}
