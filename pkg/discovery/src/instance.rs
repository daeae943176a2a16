//! Service instance identity and the canonical `<interfaceFQN>#<serverId>`
//! service-key format (§3 "Service instance", GLOSSARY).

use std::collections::HashMap;

pub const ZONE_METADATA_KEY: &str = "zone-id";
pub const LOAD_METADATA_KEY: &str = "load";
pub const DEFAULT_WEIGHT: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInstance {
    pub service_key: String,
    pub address: String,
    pub weight: u32,
    pub metadata: HashMap<String, String>,
}

impl ServiceInstance {
    pub fn new(service_key: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            service_key: service_key.into(),
            address: address.into(),
            weight: DEFAULT_WEIGHT,
            metadata: HashMap::new(),
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn zone(&self) -> Option<&str> {
        self.metadata.get(ZONE_METADATA_KEY).map(|s| s.as_str())
    }

    /// Parses the `load` metadata entry as an integer; missing/unparseable
    /// values sort last in least-load selection (§4.D).
    pub fn load(&self) -> i64 {
        self.metadata
            .get(LOAD_METADATA_KEY)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(i64::MAX)
    }

    /// Identity key: (service-key, address).
    pub fn identity(&self) -> (String, String) {
        (self.service_key.clone(), self.address.clone())
    }
}

/// Splits a service key into `(interface_fqn, server_id)`. `server_id == 0`
/// means "any instance of this interface" (GLOSSARY).
pub fn parse_service_key(service_key: &str) -> Option<(&str, u32)> {
    let (iface, id) = service_key.rsplit_once('#')?;
    let server_id = id.parse::<u32>().ok()?;
    Some((iface, server_id))
}

pub fn make_service_key(interface_fqn: &str, server_id: u32) -> String {
    format!("{}#{}", interface_fqn, server_id)
}

/// `register_path` of `<root>/<serviceKey>/<address>` (§6 service registration path).
pub fn registration_path(root: &str, service_key: &str, address: &str) -> String {
    format!("{}/{}/{}", root.trim_end_matches('/'), service_key, address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_service_key() {
        assert_eq!(
            parse_service_key("com.slg.LoginService#3"),
            Some(("com.slg.LoginService", 3))
        );
        assert_eq!(parse_service_key("malformed"), None);
    }

    #[test]
    fn missing_load_sorts_as_infinite() {
        let instance = ServiceInstance::new("I#1", "127.0.0.1:1");
        assert_eq!(instance.load(), i64::MAX);
    }
}
