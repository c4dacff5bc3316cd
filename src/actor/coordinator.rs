//! Coordinator: the single facade wiring discovery, the distributed
//! runtime, and the scripting VM pool.
//!
//! Grounded in full on
//! `original_source/src/actor/actor_system_coordinator.cpp`: discovery
//! backend selection by config kind, the wiring order (discovery → actor
//! system → distributed system → start), `status()` as a flat string map,
//! and `emit_status`'s callback containment.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use super::runtime::{ClusterEvent, DistributedRuntime, EventCallback};
use super::{ActorHandle, ActorType, MailboxSender};
use crate::config::{Config, DiscoveryBackendKind};
use crate::discovery::local::LocalDiscovery;
use crate::discovery::remote::{ConsulDiscovery, EtcdDiscovery, NacosDiscovery, RedisDiscovery};
use crate::discovery::ServiceDiscovery;
use crate::error::{Error, Result};
use crate::vmpool::VmPool;

pub type StatusCallback = Arc<dyn Fn(String, bool) + Send + Sync>;

async fn create_discovery_service(config: &Config) -> Result<Arc<dyn ServiceDiscovery>> {
    match config.discovery.kind {
        DiscoveryBackendKind::Local => {
            let local = &config.discovery.local;
            let discovery = LocalDiscovery::new(
                Duration::from_secs(local.cleanup_interval_seconds),
                local.persistence_file_path.clone().map(Into::into),
            )
            .await;
            Ok(Arc::new(discovery))
        }
        DiscoveryBackendKind::Etcd => {
            if config.discovery.etcd.endpoints.is_empty() {
                return Err(Error::Configuration(
                    "discovery.etcd.endpoints must not be empty".into(),
                ));
            }
            Ok(Arc::new(EtcdDiscovery::new(config.discovery.etcd.clone())))
        }
        DiscoveryBackendKind::Consul => Ok(Arc::new(ConsulDiscovery::new(config.discovery.consul.clone()))),
        DiscoveryBackendKind::Nacos => Ok(Arc::new(NacosDiscovery::new(config.discovery.nacos.clone()))),
        DiscoveryBackendKind::Redis => Ok(Arc::new(RedisDiscovery::new(config.discovery.redis.clone()))),
    }
}

pub struct Coordinator {
    node_id: String,
    config: Config,
    discovery: Arc<dyn ServiceDiscovery>,
    runtime: Arc<DistributedRuntime>,
    vm_pool: Option<VmPool>,
    running: AtomicBool,
    total_actors_registered: AtomicU64,
    total_messages_sent: AtomicU64,
    status_callback: Option<StatusCallback>,
}

impl Coordinator {
    /// Builds discovery, the distributed runtime, and (if configured) the
    /// VM pool. Does not start background workers yet; call `start()`.
    pub async fn initialize(
        config: Config,
        status_callback: Option<StatusCallback>,
        enable_scripting: bool,
    ) -> Result<Self> {
        let node_id = config.actor_system.resolve_node_id();
        let discovery = create_discovery_service(&config).await?;

        let status_cb_for_events = status_callback.clone();
        let on_event: EventCallback = Arc::new(move |event: ClusterEvent| {
            let msg = match &event {
                ClusterEvent::NodeJoined(n) => format!("node joined: {n}"),
                ClusterEvent::NodeLeft(n) => format!("node left: {n}"),
                ClusterEvent::ActorDiscovered { name, node_id } => {
                    format!("actor discovered: {name} on {node_id}")
                }
                ClusterEvent::ActorLost { name } => format!("actor lost: {name}"),
                ClusterEvent::ClusterChanged => "cluster topology changed".to_string(),
            };
            if let Some(cb) = &status_cb_for_events {
                cb(msg, false);
            }
        });

        let runtime = DistributedRuntime::new(
            node_id.clone(),
            discovery.clone(),
            Duration::from_secs(config.actor_system.heartbeat_interval_seconds),
            Duration::from_secs(config.actor_system.discovery_interval_seconds),
            Some(on_event),
        );

        let vm_pool = if enable_scripting {
            Some(VmPool::new(config.lua_vm_pool.clone()).await?)
        } else {
            None
        };

        Ok(Self {
            node_id,
            config,
            discovery,
            runtime,
            vm_pool,
            running: AtomicBool::new(false),
            total_actors_registered: AtomicU64::new(0),
            total_messages_sent: AtomicU64::new(0),
            status_callback,
        })
    }

    pub fn start(&self) {
        self.runtime.initialize();
        self.running.store(true, Ordering::SeqCst);
        self.emit_status(format!("coordinator started for node '{}'", self.node_id), false);
    }

    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return; // idempotent
        }
        self.runtime.shutdown().await;
        if let Some(pool) = &self.vm_pool {
            pool.shutdown().await;
        }
        self.emit_status("coordinator stopped".to_string(), false);
    }

    pub async fn spawn_and_register(
        &self,
        actor_type: ActorType,
        name: impl Into<String>,
        group: impl Into<String>,
        tags: HashMap<String, String>,
        mailbox: MailboxSender,
    ) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(Error::Configuration("coordinator is not running".into()));
        }
        self.runtime
            .register_actor(actor_type, name, group, tags, 100, mailbox)
            .await?;
        self.total_actors_registered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub async fn find(&self, name: &str) -> Option<ActorHandle> {
        if !self.running.load(Ordering::SeqCst) {
            return None;
        }
        self.runtime.find(name).await
    }

    pub async fn find_by_type(&self, actor_type: ActorType) -> Vec<(String, ActorHandle)> {
        if !self.running.load(Ordering::SeqCst) {
            return Vec::new();
        }
        self.runtime.find_by_type(actor_type, true, true).await
    }

    pub async fn send_to(&self, name: &str, msg_type: impl Into<String>, payload: serde_json::Value) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        let delivered = self.runtime.send_to(name, msg_type, payload).await;
        if delivered {
            self.total_messages_sent.fetch_add(1, Ordering::Relaxed);
        }
        delivered
    }

    pub async fn broadcast_to_type(
        &self,
        actor_type: ActorType,
        msg_type: impl Into<String> + Clone,
        payload: serde_json::Value,
    ) -> usize {
        if !self.running.load(Ordering::SeqCst) {
            return 0;
        }
        let count = self
            .runtime
            .broadcast_to_type(actor_type, msg_type, payload, true, true)
            .await;
        self.total_messages_sent.fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    pub fn vm_pool(&self) -> Option<&VmPool> {
        self.vm_pool.as_ref()
    }

    pub fn discovery(&self) -> &Arc<dyn ServiceDiscovery> {
        &self.discovery
    }

    pub fn runtime(&self) -> &Arc<DistributedRuntime> {
        &self.runtime
    }

    pub async fn status(&self) -> HashMap<String, String> {
        let running = self.running.load(Ordering::SeqCst);
        let mut status = HashMap::new();
        status.insert("node_id".to_string(), self.node_id.clone());
        status.insert(
            "discovery_type".to_string(),
            self.discovery.name().to_string(),
        );
        status.insert("running".to_string(), running.to_string());
        status.insert(
            "total_actors_registered".to_string(),
            self.total_actors_registered.load(Ordering::Relaxed).to_string(),
        );
        status.insert(
            "total_messages_sent".to_string(),
            self.total_messages_sent.load(Ordering::Relaxed).to_string(),
        );

        if running {
            let stats = self.runtime.cluster_stats().await;
            status.insert("cluster_total_nodes".to_string(), stats.total_nodes.to_string());
            status.insert("cluster_total_actors".to_string(), stats.total_actors.to_string());
            status.insert("cluster_local_actors".to_string(), stats.local_actors.to_string());
            status.insert("cluster_remote_actors".to_string(), stats.remote_actors.to_string());
            status.insert("healthy".to_string(), "true".to_string());
        }

        status
    }

    fn emit_status(&self, message: String, is_error: bool) {
        if is_error {
            error!("{message}");
        } else {
            info!("{message}");
        }
        if let Some(cb) = &self.status_callback {
            let cb = cb.clone();
            let msg = message.clone();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                cb(msg, is_error);
            }));
            if result.is_err() {
                error!("status callback panicked, message swallowed");
            }
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ActorSystemConfig, DiscoveryConfig, LocalDiscoveryConfig, LuaVmPoolConfig};

    fn test_config() -> Config {
        Config {
            discovery: DiscoveryConfig {
                kind: DiscoveryBackendKind::Local,
                local: LocalDiscoveryConfig {
                    cleanup_interval_seconds: 300,
                    persistence_file_path: None,
                },
                etcd: Default::default(),
                consul: Default::default(),
                nacos: Default::default(),
                redis: Default::default(),
            },
            actor_system: ActorSystemConfig {
                node_id: "test-node".to_string(),
                worker_threads: 2,
                heartbeat_interval_seconds: 30,
                discovery_interval_seconds: 60,
            },
            lua_vm_pool: LuaVmPoolConfig::default(),
        }
    }

    #[tokio::test]
    async fn lifecycle_start_stop_is_idempotent() {
        let coordinator = Coordinator::initialize(test_config(), None, false).await.unwrap();
        coordinator.start();
        let status = coordinator.status().await;
        assert_eq!(status.get("running").map(String::as_str), Some("true"));
        coordinator.stop().await;
        coordinator.stop().await; // idempotent
        let status = coordinator.status().await;
        assert_eq!(status.get("running").map(String::as_str), Some("false"));
    }

    #[tokio::test]
    async fn spawn_and_send_roundtrip() {
        let coordinator = Coordinator::initialize(test_config(), None, false).await.unwrap();
        coordinator.start();

        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        coordinator
            .spawn_and_register(ActorType::Logic, "alice", "", HashMap::new(), tx)
            .await
            .unwrap();

        let delivered = coordinator
            .send_to("alice", "ping", serde_json::json!({}))
            .await;
        assert!(delivered);
        assert!(rx.recv().await.is_some());
        coordinator.stop().await;
    }

    #[tokio::test]
    async fn operations_before_start_are_no_ops() {
        let coordinator = Coordinator::initialize(test_config(), None, false).await.unwrap();
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let err = coordinator
            .spawn_and_register(ActorType::Logic, "bob", "", HashMap::new(), tx)
            .await;
        assert!(err.is_err());
    }
}
