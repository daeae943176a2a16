//! Process-wide map of `{u8 id -> (serializer, compressor)}` (§4.B).
//!
//! The registry is populated once at bootstrap and read-mostly afterwards,
//! mirroring how the config manager and method cache are built: load once,
//! then serve lookups without further locking contention.

use std::collections::HashMap;
use std::sync::Arc;

use common::errors::*;
use parking_lot::RwLock;

use crate::codec::{
    Compressor, GzipCompressor, JsonSerializer, NoneCompressor, Serializer, COMPRESSOR_NONE,
    SERIALIZER_JSON,
};

pub struct SerializerRegistry {
    serializers: RwLock<HashMap<u8, Arc<dyn Serializer>>>,
    compressors: RwLock<HashMap<u8, Arc<dyn Compressor>>>,
    default_serializer: RwLock<u8>,
    default_compressor: RwLock<u8>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        let registry = Self {
            serializers: RwLock::new(HashMap::new()),
            compressors: RwLock::new(HashMap::new()),
            default_serializer: RwLock::new(SERIALIZER_JSON),
            default_compressor: RwLock::new(COMPRESSOR_NONE),
        };
        registry.register_serializer(Arc::new(JsonSerializer));
        registry.register_serializer(Arc::new(crate::codec::CompactSerializer));
        registry.register_compressor(Arc::new(NoneCompressor));
        registry.register_compressor(Arc::new(GzipCompressor));
        registry
    }

    pub fn register_serializer(&self, serializer: Arc<dyn Serializer>) {
        self.serializers.write().insert(serializer.id(), serializer);
    }

    pub fn register_compressor(&self, compressor: Arc<dyn Compressor>) {
        self.compressors.write().insert(compressor.id(), compressor);
    }

    pub fn serializer(&self, id: u8) -> Result<Arc<dyn Serializer>> {
        self.serializers
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| format_err!("unknown serializer id {}", id))
    }

    pub fn compressor(&self, id: u8) -> Result<Arc<dyn Compressor>> {
        self.compressors
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| format_err!("unknown compressor id {}", id))
    }

    pub fn default_serializer_id(&self) -> u8 {
        *self.default_serializer.read()
    }

    pub fn default_compressor_id(&self) -> u8 {
        *self.default_compressor.read()
    }

    pub fn set_default_serializer(&self, id: u8) -> Result<()> {
        self.serializer(id)?;
        *self.default_serializer.write() = id;
        Ok(())
    }

    pub fn set_default_compressor(&self, id: u8) -> Result<()> {
        self.compressor(id)?;
        *self.default_compressor.write() = id;
        Ok(())
    }
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::RpcValue;

    #[test]
    fn round_trips_through_default_serializer() {
        let registry = SerializerRegistry::new();
        let serializer = registry.serializer(registry.default_serializer_id()).unwrap();
        let value = RpcValue::Str("hello".into());
        let bytes = serializer.encode(&value).unwrap();
        assert_eq!(serializer.decode(&bytes).unwrap(), value);
    }

    #[test]
    fn unknown_id_is_an_error() {
        let registry = SerializerRegistry::new();
        assert!(registry.serializer(250).is_err());
    }

    #[test]
    fn compact_round_trips_nested_structures() {
        let registry = SerializerRegistry::new();
        let serializer = registry
            .serializer(crate::codec::SERIALIZER_COMPACT)
            .unwrap();
        let mut map = std::collections::BTreeMap::new();
        map.insert("a".to_string(), RpcValue::Int(-7));
        map.insert(
            "b".to_string(),
            RpcValue::List(vec![RpcValue::Bool(true), RpcValue::Null]),
        );
        let value = RpcValue::Map(map);
        let bytes = serializer.encode(&value).unwrap();
        assert_eq!(serializer.decode(&bytes).unwrap(), value);
    }

    #[test]
    fn gzip_round_trips() {
        let registry = SerializerRegistry::new();
        let compressor = registry.compressor(crate::codec::COMPRESSOR_GZIP).unwrap();
        let data = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        let compressed = compressor.compress(data).unwrap();
        assert_eq!(compressor.decompress(&compressed).unwrap(), data);
    }
}
