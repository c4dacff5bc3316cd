//! Configuration schema and validation.
//!
//! Parsed from TOML. Unknown keys are ignored (`serde`'s default behaviour
//! for structs without `deny_unknown_fields`). Validation failure is a
//! `Error::Configuration` and aborts startup in `main.rs` with exit code 1.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub discovery: DiscoveryConfig,
    pub actor_system: ActorSystemConfig,
    pub lua_vm_pool: LuaVmPoolConfig,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        self.discovery.validate()?;
        self.actor_system.validate()?;
        self.lua_vm_pool.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryBackendKind {
    Local,
    Etcd,
    Consul,
    Nacos,
    Redis,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    #[serde(rename = "type")]
    pub kind: DiscoveryBackendKind,
    #[serde(default)]
    pub local: LocalDiscoveryConfig,
    #[serde(default)]
    pub etcd: EtcdDiscoveryConfig,
    #[serde(default)]
    pub consul: ConsulDiscoveryConfig,
    #[serde(default)]
    pub nacos: NacosDiscoveryConfig,
    #[serde(default)]
    pub redis: RedisDiscoveryConfig,
}

impl DiscoveryConfig {
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            DiscoveryBackendKind::Etcd if self.etcd.endpoints.is_empty() => {
                Err(Error::Configuration(
                    "discovery.etcd.endpoints must not be empty when discovery.type = etcd"
                        .into(),
                ))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocalDiscoveryConfig {
    pub cleanup_interval_seconds: u64,
    pub persistence_file_path: Option<String>,
}

impl Default for LocalDiscoveryConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_seconds: 300,
            persistence_file_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EtcdDiscoveryConfig {
    #[serde(default)]
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsulDiscoveryConfig {
    pub host: String,
    pub port: u16,
    pub check_interval_seconds: u64,
}

impl Default for ConsulDiscoveryConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8500,
            check_interval_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NacosDiscoveryConfig {
    pub server_addr: String,
    pub heartbeat_interval_seconds: u64,
}

impl Default for NacosDiscoveryConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8848".into(),
            heartbeat_interval_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisDiscoveryConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: u32,
    pub heartbeat_interval_seconds: u64,
}

impl Default for RedisDiscoveryConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 6379,
            password: None,
            db: 0,
            heartbeat_interval_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActorSystemConfig {
    /// "auto" resolves at startup to `hostname_pid_millis`.
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default = "default_heartbeat_interval_seconds")]
    pub heartbeat_interval_seconds: u64,
    #[serde(default = "default_discovery_interval_seconds")]
    pub discovery_interval_seconds: u64,
}

fn default_node_id() -> String {
    "auto".into()
}
fn default_worker_threads() -> usize {
    4
}
fn default_heartbeat_interval_seconds() -> u64 {
    30
}
fn default_discovery_interval_seconds() -> u64 {
    60
}

impl Default for ActorSystemConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            worker_threads: default_worker_threads(),
            heartbeat_interval_seconds: default_heartbeat_interval_seconds(),
            discovery_interval_seconds: default_discovery_interval_seconds(),
        }
    }
}

impl ActorSystemConfig {
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(Error::Configuration(
                "actor_system.worker_threads must be >= 1".into(),
            ));
        }
        if self.heartbeat_interval_seconds == 0 {
            return Err(Error::Configuration(
                "actor_system.heartbeat_interval_seconds must be >= 1".into(),
            ));
        }
        if self.discovery_interval_seconds == 0 {
            return Err(Error::Configuration(
                "actor_system.discovery_interval_seconds must be >= 1".into(),
            ));
        }
        Ok(())
    }

    /// Resolves "auto" into a concrete node id, stable for process lifetime.
    pub fn resolve_node_id(&self) -> String {
        if self.node_id != "auto" {
            return self.node_id.clone();
        }
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "node".into());
        let pid = std::process::id();
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        format!("{hostname}_{pid}_{millis}")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LuaVmPoolConfig {
    #[serde(default = "default_initial_size")]
    pub initial_size: usize,
    #[serde(default = "default_min_size")]
    pub min_size: usize,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    #[serde(default)]
    pub preload_scripts: bool,
    #[serde(default)]
    pub script_paths: Vec<String>,
}

fn default_initial_size() -> usize {
    2
}
fn default_min_size() -> usize {
    1
}
fn default_max_size() -> usize {
    8
}
fn default_idle_timeout_ms() -> u64 {
    60_000
}
fn default_acquire_timeout_ms() -> u64 {
    5_000
}

impl Default for LuaVmPoolConfig {
    fn default() -> Self {
        Self {
            initial_size: default_initial_size(),
            min_size: default_min_size(),
            max_size: default_max_size(),
            idle_timeout_ms: default_idle_timeout_ms(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            preload_scripts: false,
            script_paths: Vec::new(),
        }
    }
}

impl LuaVmPoolConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.min_size <= self.initial_size && self.initial_size <= self.max_size) {
            return Err(Error::Configuration(format!(
                "lua_vm_pool sizes must satisfy min <= initial <= max, got {} <= {} <= {}",
                self.min_size, self.initial_size, self.max_size
            )));
        }
        if self.max_size == 0 {
            return Err(Error::Configuration(
                "lua_vm_pool.max_size must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml = r#"
            [discovery]
            type = "local"

            [actor_system]
            node_id = "n1"

            [lua_vm_pool]
            initial_size = 2
            min_size = 1
            max_size = 4
        "#;
        let cfg = Config::from_toml_str(toml).unwrap();
        assert_eq!(cfg.discovery.kind, DiscoveryBackendKind::Local);
        assert_eq!(cfg.actor_system.node_id, "n1");
        assert_eq!(cfg.lua_vm_pool.max_size, 4);
    }

    #[test]
    fn rejects_bad_pool_sizes() {
        let cfg = LuaVmPoolConfig {
            initial_size: 10,
            min_size: 1,
            max_size: 4,
            ..LuaVmPoolConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_etcd_without_endpoints() {
        let toml = r#"
            [discovery]
            type = "etcd"

            [actor_system]

            [lua_vm_pool]
        "#;
        let err = Config::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn auto_node_id_resolves_non_empty() {
        let cfg = ActorSystemConfig::default();
        assert_eq!(cfg.node_id, "auto");
        assert!(!cfg.resolve_node_id().is_empty());
    }
}
