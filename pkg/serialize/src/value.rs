//! Dynamically typed value carried inside RPC request parameters and
//! response results. The RPC layer has no per-method code generation, so
//! parameter/result payloads travel as `RpcValue` trees rather than as
//! concrete Rust types; serializers convert between this tree and bytes.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum RpcValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<RpcValue>),
    Map(BTreeMap<String, RpcValue>),
}

impl RpcValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RpcValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RpcValue::Int(v) => Some(*v),
            RpcValue::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for RpcValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => RpcValue::Null,
            serde_json::Value::Bool(b) => RpcValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    RpcValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    RpcValue::UInt(u)
                } else {
                    RpcValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => RpcValue::Str(s),
            serde_json::Value::Array(a) => RpcValue::List(a.into_iter().map(Into::into).collect()),
            serde_json::Value::Object(o) => {
                RpcValue::Map(o.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<RpcValue> for serde_json::Value {
    fn from(v: RpcValue) -> Self {
        match v {
            RpcValue::Null => serde_json::Value::Null,
            RpcValue::Bool(b) => serde_json::Value::Bool(b),
            RpcValue::Int(i) => serde_json::Value::from(i),
            RpcValue::UInt(u) => serde_json::Value::from(u),
            RpcValue::Float(f) => serde_json::json!(f),
            RpcValue::Str(s) => serde_json::Value::String(s),
            RpcValue::Bytes(b) => {
                serde_json::Value::String(base16(&b))
            }
            RpcValue::List(l) => serde_json::Value::Array(l.into_iter().map(Into::into).collect()),
            RpcValue::Map(m) => {
                serde_json::Value::Object(m.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

fn base16(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
