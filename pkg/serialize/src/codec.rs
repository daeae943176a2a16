//! Named, stateless serializer/compressor implementations selected by the
//! single-byte id carried in the wire frame preamble (component B, §4.B).

use common::errors::*;

use crate::value::RpcValue;

/// A pure byte-array <-> `RpcValue` transform, with no hidden state so a
/// single instance can be shared (behind an `Arc`) across every connection.
pub trait Serializer: Send + Sync {
    fn id(&self) -> u8;
    fn name(&self) -> &'static str;
    fn encode(&self, value: &RpcValue) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<RpcValue>;
}

/// A pure byte-array <-> byte-array transform.
pub trait Compressor: Send + Sync {
    fn id(&self) -> u8;
    fn name(&self) -> &'static str;
    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>>;
    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>>;
}

pub const SERIALIZER_JSON: u8 = 1;
pub const SERIALIZER_COMPACT: u8 = 2;

pub const COMPRESSOR_NONE: u8 = 0;
pub const COMPRESSOR_GZIP: u8 = 1;

pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn id(&self) -> u8 {
        SERIALIZER_JSON
    }

    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &RpcValue) -> Result<Vec<u8>> {
        let json: serde_json::Value = value.clone().into();
        Ok(serde_json::to_vec(&json)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<RpcValue> {
        let json: serde_json::Value = serde_json::from_slice(bytes)?;
        Ok(json.into())
    }
}

/// Compact self-describing binary format: a type tag byte followed by a
/// length-prefixed payload. Smaller on the wire than JSON for the mostly
/// numeric/string-keyed payloads that business RPC calls exchange, at the
/// cost of being opaque to `tcpdump`-style debugging (hence JSON staying
/// the configured default).
pub struct CompactSerializer;

mod tag {
    pub const NULL: u8 = 0;
    pub const BOOL_FALSE: u8 = 1;
    pub const BOOL_TRUE: u8 = 2;
    pub const INT: u8 = 3;
    pub const UINT: u8 = 4;
    pub const FLOAT: u8 = 5;
    pub const STR: u8 = 6;
    pub const BYTES: u8 = 7;
    pub const LIST: u8 = 8;
    pub const MAP: u8 = 9;
}

impl Serializer for CompactSerializer {
    fn id(&self) -> u8 {
        SERIALIZER_COMPACT
    }

    fn name(&self) -> &'static str {
        "compact"
    }

    fn encode(&self, value: &RpcValue) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        encode_value(value, &mut out);
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<RpcValue> {
        let mut cursor = 0usize;
        let value = decode_value(bytes, &mut cursor)?;
        Ok(value)
    }
}

fn encode_value(value: &RpcValue, out: &mut Vec<u8>) {
    match value {
        RpcValue::Null => out.push(tag::NULL),
        RpcValue::Bool(false) => out.push(tag::BOOL_FALSE),
        RpcValue::Bool(true) => out.push(tag::BOOL_TRUE),
        RpcValue::Int(i) => {
            out.push(tag::INT);
            out.extend_from_slice(&i.to_le_bytes());
        }
        RpcValue::UInt(u) => {
            out.push(tag::UINT);
            out.extend_from_slice(&u.to_le_bytes());
        }
        RpcValue::Float(f) => {
            out.push(tag::FLOAT);
            out.extend_from_slice(&f.to_le_bytes());
        }
        RpcValue::Str(s) => {
            out.push(tag::STR);
            out.extend_from_slice(&(s.len() as u32).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        RpcValue::Bytes(b) => {
            out.push(tag::BYTES);
            out.extend_from_slice(&(b.len() as u32).to_le_bytes());
            out.extend_from_slice(b);
        }
        RpcValue::List(items) => {
            out.push(tag::LIST);
            out.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                encode_value(item, out);
            }
        }
        RpcValue::Map(map) => {
            out.push(tag::MAP);
            out.extend_from_slice(&(map.len() as u32).to_le_bytes());
            for (k, v) in map {
                out.extend_from_slice(&(k.len() as u32).to_le_bytes());
                out.extend_from_slice(k.as_bytes());
                encode_value(v, out);
            }
        }
    }
}

fn take<'a>(bytes: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
    if *cursor + len > bytes.len() {
        return Err(err_msg("truncated compact payload"));
    }
    let slice = &bytes[*cursor..*cursor + len];
    *cursor += len;
    Ok(slice)
}

fn take_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    let slice = take(bytes, cursor, 4)?;
    Ok(u32::from_le_bytes(slice.try_into().unwrap()))
}

fn decode_value(bytes: &[u8], cursor: &mut usize) -> Result<RpcValue> {
    let tag = *take(bytes, cursor, 1)?.first().unwrap();
    Ok(match tag {
        tag::NULL => RpcValue::Null,
        tag::BOOL_FALSE => RpcValue::Bool(false),
        tag::BOOL_TRUE => RpcValue::Bool(true),
        tag::INT => RpcValue::Int(i64::from_le_bytes(take(bytes, cursor, 8)?.try_into().unwrap())),
        tag::UINT => RpcValue::UInt(u64::from_le_bytes(take(bytes, cursor, 8)?.try_into().unwrap())),
        tag::FLOAT => RpcValue::Float(f64::from_le_bytes(take(bytes, cursor, 8)?.try_into().unwrap())),
        tag::STR => {
            let len = take_u32(bytes, cursor)? as usize;
            let slice = take(bytes, cursor, len)?;
            RpcValue::Str(String::from_utf8(slice.to_vec())?)
        }
        tag::BYTES => {
            let len = take_u32(bytes, cursor)? as usize;
            RpcValue::Bytes(take(bytes, cursor, len)?.to_vec())
        }
        tag::LIST => {
            let len = take_u32(bytes, cursor)? as usize;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(decode_value(bytes, cursor)?);
            }
            RpcValue::List(items)
        }
        tag::MAP => {
            let len = take_u32(bytes, cursor)? as usize;
            let mut map = std::collections::BTreeMap::new();
            for _ in 0..len {
                let klen = take_u32(bytes, cursor)? as usize;
                let key = String::from_utf8(take(bytes, cursor, klen)?.to_vec())?;
                let value = decode_value(bytes, cursor)?;
                map.insert(key, value);
            }
            RpcValue::Map(map)
        }
        other => return Err(format_err!("unknown compact type tag {}", other)),
    })
}

pub struct NoneCompressor;

impl Compressor for NoneCompressor {
    fn id(&self) -> u8 {
        COMPRESSOR_NONE
    }
    fn name(&self) -> &'static str {
        "none"
    }
    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

pub struct GzipCompressor;

impl Compressor for GzipCompressor {
    fn id(&self) -> u8 {
        COMPRESSOR_GZIP
    }
    fn name(&self) -> &'static str {
        "gzip"
    }
    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(bytes)?;
        Ok(encoder.finish()?)
    }
    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        use flate2::read::GzDecoder;
        use std::io::Read;
        let mut decoder = GzDecoder::new(bytes);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }
}
