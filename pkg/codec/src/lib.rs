pub mod frame;

use common::errors::*;
use serialize::{RpcValue, SerializerRegistry};
use std::sync::Arc;

pub use frame::{CodecOptions, Frame, FrameHeader, MessageType, MAGIC, PREAMBLE_LEN, VERSION};

/// Encodes an [`RpcValue`] into a payload ready to be placed on a [`Frame`],
/// applying the registry's default serializer/compressor, skipping
/// compression below `opts.compress_threshold` (§4.A).
pub fn encode_payload(
    registry: &SerializerRegistry,
    value: &RpcValue,
    opts: &CodecOptions,
) -> Result<(u8, u8, Vec<u8>)> {
    let serializer_id = registry.default_serializer_id();
    let serializer = registry.serializer(serializer_id)?;
    let encoded = serializer.encode(value)?;

    if encoded.len() < opts.compress_threshold {
        return Ok((serializer_id, serialize::codec::COMPRESSOR_NONE, encoded));
    }

    let compressor_id = registry.default_compressor_id();
    let compressor = registry.compressor(compressor_id)?;
    let compressed = compressor.compress(&encoded)?;
    Ok((serializer_id, compressor_id, compressed))
}

pub fn decode_payload(
    registry: &SerializerRegistry,
    serializer_id: u8,
    compressor_id: u8,
    bytes: &[u8],
) -> Result<RpcValue> {
    let compressor = registry.compressor(compressor_id)?;
    let decompressed = compressor.decompress(bytes)?;
    let serializer = registry.serializer(serializer_id)?;
    serializer.decode(&decompressed)
}

pub fn default_registry() -> Arc<SerializerRegistry> {
    Arc::new(SerializerRegistry::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_payloads_skip_compression() {
        let registry = SerializerRegistry::new();
        let opts = CodecOptions::default();
        let value = RpcValue::Str("hi".into());
        let (_, compressor_id, _) = encode_payload(&registry, &value, &opts).unwrap();
        assert_eq!(compressor_id, serialize::codec::COMPRESSOR_NONE);
    }

    #[test]
    fn large_payloads_compress_and_round_trip() {
        let registry = SerializerRegistry::new();
        registry
            .set_default_compressor(serialize::codec::COMPRESSOR_GZIP)
            .unwrap();
        let opts = CodecOptions {
            max_frame_len: CodecOptions::default().max_frame_len,
            compress_threshold: 8,
        };
        let value = RpcValue::Str("x".repeat(4096));
        let (serializer_id, compressor_id, bytes) =
            encode_payload(&registry, &value, &opts).unwrap();
        assert_eq!(compressor_id, serialize::codec::COMPRESSOR_GZIP);
        let decoded = decode_payload(&registry, serializer_id, compressor_id, &bytes).unwrap();
        assert_eq!(decoded, value);
    }
}
