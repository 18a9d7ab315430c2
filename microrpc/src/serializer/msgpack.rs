use super::{DecodeVisitor, Serializer};
use crate::error::Result;

/// MessagePack payloads, serializer code 2.
///
/// Maps are written with field names (`to_vec_named`), so peers do not need
/// to agree on field order.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessagePackSerializer;

impl MessagePackSerializer {
    pub const CODE: u8 = 2;
}

impl Serializer for MessagePackSerializer {
    fn code(&self) -> u8 {
        Self::CODE
    }

    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn encode(&self, value: &dyn erased_serde::Serialize) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    fn decode(&self, data: &[u8], visit: &mut DecodeVisitor<'_>) -> Result<()> {
        let mut de = rmp_serde::Deserializer::from_read_ref(data);
        visit(&mut <dyn erased_serde::Deserializer>::erase(&mut de))
    }
}
