//! Distributed Actor Runtime: stamps registrations with this node's id,
//! runs the cluster discovery worker, aggregates cluster statistics, and
//! exposes the fanout/addressing API.
//!
//! Grounded in full on
//! `original_source/src/actor/distributed_actor_system.cpp`: the
//! discovery-worker loop diffing `discover_cluster_nodes()` against
//! `known_nodes`, `discover_cluster_nodes` as the union of `node_id`
//! attributes across every `actor:*` bucket (including self), and
//! `emit_event`'s try/catch containment around the user callback.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use super::registry::ActorRegistry;
use super::{ActorHandle, ActorType};
use crate::discovery::ServiceDiscovery;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    NodeJoined(String),
    NodeLeft(String),
    ActorDiscovered { name: String, node_id: String },
    ActorLost { name: String },
    ClusterChanged,
}

pub type EventCallback = Arc<dyn Fn(ClusterEvent) + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct ClusterStats {
    pub total_nodes: usize,
    pub local_actors: usize,
    pub remote_actors: usize,
    pub total_actors: usize,
    pub actors_by_type: HashMap<String, usize>,
    pub actors_by_node: HashMap<String, usize>,
}

pub struct DistributedRuntime {
    node_id: String,
    registry: Arc<ActorRegistry>,
    discovery: Arc<dyn ServiceDiscovery>,
    heartbeat_interval: Duration,
    discovery_interval: Duration,
    known_nodes: Mutex<HashSet<String>>,
    on_event: Option<EventCallback>,
    shutdown: Arc<Notify>,
}

impl DistributedRuntime {
    pub fn new(
        node_id: impl Into<String>,
        discovery: Arc<dyn ServiceDiscovery>,
        heartbeat_interval: Duration,
        discovery_interval: Duration,
        on_event: Option<EventCallback>,
    ) -> Arc<Self> {
        let node_id = node_id.into();
        let registry = Arc::new(ActorRegistry::new(
            node_id.clone(),
            discovery.clone(),
            None,
            None,
        ));

        Arc::new(Self {
            node_id,
            registry,
            discovery,
            heartbeat_interval,
            discovery_interval,
            known_nodes: Mutex::new(HashSet::new()),
            on_event,
            shutdown: Arc::new(Notify::new()),
        })
    }

    fn emit(&self, event: ClusterEvent) {
        if let Some(cb) = &self.on_event {
            let cb = cb.clone();
            let event_clone = event.clone();
            // Mirrors the original's emit_event try/catch: a panicking
            // callback must never bring down the runtime.
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                cb(event_clone);
            }));
            if result.is_err() {
                error!("cluster event callback panicked, event swallowed");
            }
        } else {
            let _ = event;
        }
    }

    /// Builds the registry, starts heartbeat + discovery worker, and emits
    /// this node's own `NodeJoined`.
    pub fn initialize(self: &Arc<Self>) {
        self.known_nodes.lock().insert(self.node_id.clone());
        self.emit(ClusterEvent::NodeJoined(self.node_id.clone()));
        self.spawn_heartbeat();
        self.spawn_discovery_worker();
        info!("distributed actor runtime initialized for node '{}'", self.node_id);
    }

    fn spawn_heartbeat(self: &Arc<Self>) {
        let this = self.clone();
        let shutdown = self.shutdown.clone();
        let interval = self.heartbeat_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.notified() => break,
                }
                this.registry.heartbeat_once(interval).await;
            }
        });
    }

    fn spawn_discovery_worker(self: &Arc<Self>) {
        let this = self.clone();
        let shutdown = self.shutdown.clone();
        let interval = self.discovery_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.notified() => break,
                }
                this.discovery_tick().await;
            }
        });
    }

    async fn discovery_tick(self: &Arc<Self>) {
        let current = self.discover_cluster_nodes().await;
        let mut known = self.known_nodes.lock();
        let joined: Vec<String> = current.difference(&known).cloned().collect();
        let left: Vec<String> = known.difference(&current).cloned().collect();
        *known = current;
        drop(known);

        for node in joined {
            self.emit(ClusterEvent::NodeJoined(node));
        }
        for node in left {
            self.emit(ClusterEvent::NodeLeft(node));
        }
    }

    /// Union of distinct `node_id` custom attributes across every
    /// `actor:*` service bucket, plus self.
    async fn discover_cluster_nodes(&self) -> HashSet<String> {
        let mut nodes = HashSet::new();
        nodes.insert(self.node_id.clone());
        for actor_type in ActorType::ALL {
            let service_name = actor_type.service_name();
            match self.discovery.query_all(&service_name).await {
                Ok(instances) => {
                    for instance in instances {
                        if let Some(n) = instance.metadata.custom_attributes.get("node_id") {
                            nodes.insert(n.clone());
                        }
                    }
                }
                Err(e) => warn!("discovery query_all({service_name}) failed: {e}"),
            }
        }
        nodes
    }

    pub async fn register_actor(
        &self,
        actor_type: ActorType,
        name: impl Into<String>,
        service_group: impl Into<String>,
        tags: HashMap<String, String>,
        load_weight: u32,
        mailbox: super::MailboxSender,
    ) -> Result<()> {
        let registered = self
            .registry
            .register_actor(
                actor_type,
                name,
                service_group,
                tags,
                load_weight,
                mailbox,
                self.heartbeat_interval,
            )
            .await?;
        self.emit(ClusterEvent::ActorDiscovered {
            name: registered.metadata.name.clone(),
            node_id: registered.metadata.node_id.clone(),
        });
        Ok(())
    }

    pub async fn unregister_actor(&self, name: &str) {
        self.registry.unregister_actor(name).await;
        self.emit(ClusterEvent::ActorLost {
            name: name.to_string(),
        });
    }

    pub async fn find(&self, name: &str) -> Option<ActorHandle> {
        if let Some(h) = self.registry.find_local(name) {
            return Some(h);
        }
        self.registry.discover_remote(name).await
    }

    pub async fn find_by_type(
        &self,
        actor_type: ActorType,
        include_local: bool,
        include_remote: bool,
    ) -> Vec<(String, ActorHandle)> {
        let mut out = Vec::new();
        if include_local {
            out.extend(self.registry.find_local_by_type(actor_type));
        }
        if include_remote {
            let service_name = actor_type.service_name();
            if let Ok(instances) = self.discovery.query_all(&service_name).await {
                for instance in instances {
                    if instance.metadata.custom_attributes.get("node_id") == Some(&self.node_id) {
                        continue;
                    }
                    if let Some(handle) = self.registry.discover_remote(&instance.instance_id).await {
                        out.push((instance.instance_id, handle));
                    }
                }
            }
        }
        out
    }

    pub async fn find_by_group(&self, group: &str) -> Vec<(String, ActorHandle)> {
        self.registry.discover_by_group(group).await
    }

    /// Finds then one-way-sends. Returns whether delivery was attempted.
    pub async fn send_to(
        &self,
        name: &str,
        msg_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> bool {
        match self.find(name).await {
            Some(handle) => handle.send(msg_type, payload).await,
            None => false,
        }
    }

    /// Fanout to every actor of a type; returns count dispatched.
    pub async fn broadcast_to_type(
        &self,
        actor_type: ActorType,
        msg_type: impl Into<String> + Clone,
        payload: serde_json::Value,
        include_local: bool,
        include_remote: bool,
    ) -> usize {
        let targets = self.find_by_type(actor_type, include_local, include_remote).await;
        let mut count = 0;
        for (_, handle) in targets {
            if handle.send(msg_type.clone(), payload.clone()).await {
                count += 1;
            }
        }
        count
    }

    pub async fn broadcast_to_group(
        &self,
        group: &str,
        msg_type: impl Into<String> + Clone,
        payload: serde_json::Value,
    ) -> usize {
        let targets = self.find_by_group(group).await;
        let mut count = 0;
        for (_, handle) in targets {
            if handle.send(msg_type.clone(), payload.clone()).await {
                count += 1;
            }
        }
        count
    }

    pub async fn cluster_stats(&self) -> ClusterStats {
        let nodes = self.discover_cluster_nodes().await;
        let mut actors_by_type = HashMap::new();
        let mut actors_by_node = HashMap::new();
        let mut total_actors = 0usize;

        for actor_type in ActorType::ALL {
            let service_name = actor_type.service_name();
            if let Ok(instances) = self.discovery.query_all(&service_name).await {
                if !instances.is_empty() {
                    actors_by_type.insert(actor_type.as_str().to_string(), instances.len());
                }
                total_actors += instances.len();
                for instance in instances {
                    if let Some(n) = instance.metadata.custom_attributes.get("node_id") {
                        *actors_by_node.entry(n.clone()).or_insert(0) += 1;
                    }
                }
            }
        }

        let local_actors = self.registry.local_len();
        ClusterStats {
            total_nodes: nodes.len(),
            local_actors,
            remote_actors: total_actors.saturating_sub(local_actors),
            total_actors,
            actors_by_type,
            actors_by_node,
        }
    }

    pub fn registry(&self) -> &Arc<ActorRegistry> {
        &self.registry
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Stops discovery/heartbeat workers, emits `NodeLeft`, and deregisters
    /// every local actor.
    pub async fn shutdown(&self) {
        self.shutdown.notify_waiters();
        self.registry.deregister_all().await;
        self.emit(ClusterEvent::NodeLeft(self.node_id.clone()));
        info!("distributed actor runtime for node '{}' shut down", self.node_id);
    }
}
