//! Top-level settings document (§6 "Server bootstrap configuration"): host,
//! coordination/Redis/database addresses, then the instance fleet. Each
//! instance names a `module`, its logical `serverId`, its `rpcPort` and
//! `webPort`, and a free-form `extra` map for module-specific settings.

use std::collections::HashMap;

use common::errors::*;
use serde::Deserialize;

pub const DEFAULT_SETTINGS_PATH: &str = "serverconfig/server.yaml";
pub const DEFAULT_CONFIG_ROOT: &str = "serverconfig/gamedata";

#[derive(Debug, Clone, Deserialize)]
pub struct InstanceSettings {
    pub module: String,
    #[serde(rename = "serverId")]
    pub server_id: u32,
    #[serde(rename = "rpcPort")]
    pub rpc_port: u16,
    #[serde(rename = "webPort", default)]
    pub web_port: Option<u16>,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub host: String,
    #[serde(rename = "coordinationAddr")]
    pub coordination_addr: String,
    #[serde(rename = "redisAddr")]
    pub redis_addr: String,
    #[serde(rename = "databaseDsn")]
    pub database_dsn: String,
    #[serde(rename = "configRoot", default = "default_config_root")]
    pub config_root: String,
    #[serde(rename = "configPackage", default)]
    pub config_package: Option<String>,
    pub instances: Vec<InstanceSettings>,
}

fn default_config_root() -> String {
    DEFAULT_CONFIG_ROOT.to_string()
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| format_err!("reading {}: {}", path, e))?;
        serde_yaml::from_str(&raw).map_err(|e| format_err!("parsing {}: {}", path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_settings_document() {
        let yaml = r#"
host: 0.0.0.0
coordinationAddr: 127.0.0.1:2379
redisAddr: 127.0.0.1:6379
databaseDsn: postgres://localhost/slg
instances:
  - module: login
    serverId: 1
    rpcPort: 9001
    webPort: 9101
  - module: game
    serverId: 1
    rpcPort: 9002
    extra:
      shardCount: "4"
"#;
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.instances.len(), 2);
        assert_eq!(settings.config_root, DEFAULT_CONFIG_ROOT);
        assert_eq!(settings.instances[0].web_port, Some(9101));
        assert_eq!(settings.instances[1].web_port, None);
        assert_eq!(settings.instances[1].extra.get("shardCount").unwrap(), "4");
    }
}
