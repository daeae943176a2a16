//! Request/response envelopes carried inside a [`codec::Frame`] payload.
//! The frame header already carries the request id and message type; the
//! payload only needs enough structure for the server to resolve a service
//! object and method, and for the client to tell success from failure.

use std::collections::BTreeMap;

use common::errors::*;
use common::{ErrorKind, TaggedError};
use serialize::RpcValue;

pub struct RequestBody {
    pub service_key: String,
    pub method: String,
    pub params: RpcValue,
}

impl RequestBody {
    pub fn into_value(self) -> RpcValue {
        let mut map = BTreeMap::new();
        map.insert("service_key".to_string(), RpcValue::Str(self.service_key));
        map.insert("method".to_string(), RpcValue::Str(self.method));
        map.insert("params".to_string(), self.params);
        RpcValue::Map(map)
    }

    pub fn from_value(value: RpcValue) -> Result<Self> {
        let map = match value {
            RpcValue::Map(m) => m,
            _ => return Err(bad_request("request body must be a map")),
        };
        let service_key = map
            .get("service_key")
            .and_then(|v| v.as_str())
            .ok_or_else(|| bad_request("missing service_key"))?
            .to_string();
        let method = map
            .get("method")
            .and_then(|v| v.as_str())
            .ok_or_else(|| bad_request("missing method"))?
            .to_string();
        let params = map.get("params").cloned().unwrap_or(RpcValue::Null);
        Ok(Self { service_key, method, params })
    }
}

pub enum ResponseBody {
    Ok(RpcValue),
    Err { kind: ErrorKind, message: String },
}

impl ResponseBody {
    pub fn into_value(self) -> RpcValue {
        let mut map = BTreeMap::new();
        match self {
            ResponseBody::Ok(value) => {
                map.insert("ok".to_string(), RpcValue::Bool(true));
                map.insert("result".to_string(), value);
            }
            ResponseBody::Err { kind, message } => {
                map.insert("ok".to_string(), RpcValue::Bool(false));
                map.insert("error_kind".to_string(), RpcValue::Str(kind.as_str().to_string()));
                map.insert("error_message".to_string(), RpcValue::Str(message));
            }
        }
        RpcValue::Map(map)
    }

    pub fn from_value(value: RpcValue) -> Result<Self> {
        let map = match value {
            RpcValue::Map(m) => m,
            _ => return Err(bad_request("response body must be a map")),
        };
        let ok = matches!(map.get("ok"), Some(RpcValue::Bool(true)));
        if ok {
            Ok(ResponseBody::Ok(map.get("result").cloned().unwrap_or(RpcValue::Null)))
        } else {
            let kind = map
                .get("error_kind")
                .and_then(|v| v.as_str())
                .map(ErrorKind::parse)
                .unwrap_or(ErrorKind::Internal);
            let message = map
                .get("error_message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error")
                .to_string();
            Ok(ResponseBody::Err { kind, message })
        }
    }

    /// Converts a response body carrying an error into a `failure::Error`,
    /// leaving `Ok` bodies to the caller to unwrap.
    pub fn into_result(self) -> Result<RpcValue> {
        match self {
            ResponseBody::Ok(value) => Ok(value),
            ResponseBody::Err { kind, message } => Err(TaggedError::new(kind, message).into()),
        }
    }
}

fn bad_request(message: &str) -> Error {
    TaggedError::new(ErrorKind::SerializeFail, message).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_round_trips() {
        let body = RequestBody {
            service_key: "com.slg.Game#1".to_string(),
            method: "attack".to_string(),
            params: RpcValue::Int(7),
        };
        let value = body.into_value();
        let decoded = RequestBody::from_value(value).unwrap();
        assert_eq!(decoded.service_key, "com.slg.Game#1");
        assert_eq!(decoded.method, "attack");
        assert_eq!(decoded.params, RpcValue::Int(7));
    }

    #[test]
    fn error_response_round_trips_its_kind() {
        let body = ResponseBody::Err { kind: ErrorKind::NotFound, message: "no such player".to_string() };
        let value = body.into_value();
        let decoded = ResponseBody::from_value(value).unwrap();
        match decoded.into_result() {
            Err(e) => assert_eq!(common::errors::kind_of(&e), ErrorKind::NotFound),
            Ok(_) => panic!("expected error"),
        }
    }
}
