//! JSON codec using `serde_json`, the default [`Serializer`].

use crate::error::{CacheError, CacheResult};
use crate::traits::Serializer;

#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl Serializer for JsonCodec {
    fn encode(&self, value: &serde_json::Value) -> CacheResult<Vec<u8>> {
        serde_json::to_vec(value)
            .map_err(|e| CacheError::serialization(format!("json encode: {e}")))
    }

    fn decode(&self, bytes: &[u8]) -> CacheResult<serde_json::Value> {
        serde_json::from_slice(bytes)
            .map_err(|e| CacheError::serialization(format!("json decode: {e}")))
    }

    fn name(&self) -> &'static str {
        "serde_json"
    }
}
