use super::{DecodeVisitor, Serializer};
use crate::error::{Error, ErrorKind, Result};

/// JSON payloads, serializer code 1.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub const CODE: u8 = 1;
}

impl Serializer for JsonSerializer {
    fn code(&self) -> u8 {
        Self::CODE
    }

    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &dyn erased_serde::Serialize) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| Error::new(ErrorKind::SerializeFailed, e.to_string()))
    }

    fn decode(&self, data: &[u8], visit: &mut DecodeVisitor<'_>) -> Result<()> {
        let mut de = serde_json::Deserializer::from_slice(data);
        visit(&mut <dyn erased_serde::Deserializer>::erase(&mut de))?;
        de.end()
            .map_err(|e| Error::new(ErrorKind::DeserializeFailed, e.to_string()))
    }
}
