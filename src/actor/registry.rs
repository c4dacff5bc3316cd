//! Actor Registry: authoritative local catalog plus a best-effort remote
//! lookup cache, backed by a discovery service.
//!
//! Grounded in full on `original_source/src/actor/actor_registry.cpp`:
//! URI generation via a port-0 bind, the `ServiceInstance` projection
//! (`custom_attributes{node_id,service_group,actor_type}`), remote
//! discovery scanning every `actor:<type>` bucket (there is no secondary
//! index from name to type), group discovery via
//! `custom_attributes["service_group"]`, and heartbeats re-registering
//! with `ttl = 2 * heartbeat_interval`.

use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{error, info, warn};

use super::{ActorHandle, ActorMetadata, ActorType, MailboxSender, RegisteredActor, RemoteHandle};
use crate::discovery::{Expiration, ServiceDiscovery, ServiceInstance, ServiceMetadata};
use crate::error::Result;

pub type DiscoveredCallback = Arc<dyn Fn(RegisteredActor) + Send + Sync>;
pub type RemovedCallback = Arc<dyn Fn(RegisteredActor) + Send + Sync>;

pub struct ActorRegistry {
    node_id: String,
    discovery: Arc<dyn ServiceDiscovery>,
    local: Mutex<HashMap<String, RegisteredActor>>,
    remote_cache: Mutex<HashMap<String, RegisteredActor>>,
    on_discovered: Option<DiscoveredCallback>,
    on_removed: Option<RemovedCallback>,
}

fn allocate_uri() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(format!("tcp://localhost:{port}"))
}

fn metadata_to_service_instance(metadata: &ActorMetadata, uri: &str) -> ServiceInstance {
    let mut custom_attributes = HashMap::new();
    custom_attributes.insert("node_id".to_string(), metadata.node_id.clone());
    custom_attributes.insert("service_group".to_string(), metadata.service_group.clone());
    custom_attributes.insert("actor_type".to_string(), metadata.actor_type.as_str().to_string());
    for (k, v) in &metadata.tags {
        custom_attributes.insert(k.clone(), v.clone());
    }

    ServiceInstance {
        service_name: metadata.actor_type.service_name(),
        instance_id: metadata.name.clone(),
        address: uri.to_string(),
        metadata: ServiceMetadata {
            version: "1.0.0".to_string(),
            region: "local".to_string(),
            environment: "prod".to_string(),
            weight: metadata.load_weight,
            tags: vec!["actor".to_string(), metadata.actor_type.as_str().to_string()],
            custom_attributes,
        },
        expiration_time: Expiration::Never,
    }
}

impl ActorRegistry {
    pub fn new(
        node_id: impl Into<String>,
        discovery: Arc<dyn ServiceDiscovery>,
        on_discovered: Option<DiscoveredCallback>,
        on_removed: Option<RemovedCallback>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            discovery,
            local: Mutex::new(HashMap::new()),
            remote_cache: Mutex::new(HashMap::new()),
            on_discovered,
            on_removed,
        }
    }

    pub async fn register_actor(
        &self,
        actor_type: ActorType,
        name: impl Into<String>,
        service_group: impl Into<String>,
        tags: HashMap<String, String>,
        load_weight: u32,
        mailbox: MailboxSender,
        heartbeat_interval: Duration,
    ) -> Result<RegisteredActor> {
        let name = name.into();
        {
            let local = self.local.lock();
            if local.contains_key(&name) {
                return Err(crate::error::Error::Configuration(format!(
                    "actor '{name}' already registered on this node"
                )));
            }
        }

        let uri = allocate_uri()?;
        let mut metadata = ActorMetadata::new(actor_type, name.clone(), self.node_id.clone())
            .with_group(service_group)
            .with_tags(tags)
            .with_load_weight(load_weight);
        metadata.last_heartbeat = Instant::now();

        let instance = metadata_to_service_instance(&metadata, &uri);
        let ttl = heartbeat_interval * 2;
        self.discovery.register(instance, Some(ttl)).await?;

        let registered = RegisteredActor {
            metadata,
            handle: ActorHandle::Local(mailbox),
            uri,
            is_local: true,
        };

        self.local.lock().insert(name, registered.clone());
        info!("registered local actor '{}'", registered.metadata.name);
        Ok(registered)
    }

    pub async fn unregister_actor(&self, name: &str) {
        let removed = self.local.lock().remove(name);
        if let Some(actor) = removed {
            let service_name = actor.metadata.actor_type.service_name();
            match self.discovery.deregister(&service_name, name).await {
                Ok(_) => {}
                Err(e) => warn!("deregister of '{name}' failed (continuing): {e}"),
            }
            if let Some(cb) = &self.on_removed {
                cb(actor);
            }
        }
    }

    pub fn find_local(&self, name: &str) -> Option<ActorHandle> {
        self.local.lock().get(name).map(|a| a.handle.clone())
    }

    pub fn find_local_by_type(&self, actor_type: ActorType) -> Vec<(String, ActorHandle)> {
        self.local
            .lock()
            .values()
            .filter(|a| a.metadata.actor_type == actor_type)
            .map(|a| (a.metadata.name.clone(), a.handle.clone()))
            .collect()
    }

    /// Checks the remote cache first; otherwise scans every `actor:<type>`
    /// bucket for a matching `instance_id`. An unreachable/missing remote
    /// is reported as a miss, never cached as negative.
    pub async fn discover_remote(&self, name: &str) -> Option<ActorHandle> {
        if let Some(cached) = self.remote_cache.lock().get(name) {
            return Some(cached.handle.clone());
        }

        for actor_type in ActorType::ALL {
            let service_name = actor_type.service_name();
            let instances = match self.discovery.query_all(&service_name).await {
                Ok(v) => v,
                Err(e) => {
                    warn!("discovery query_all({service_name}) failed: {e}");
                    continue;
                }
            };
            if let Some(instance) = instances.into_iter().find(|i| i.instance_id == name) {
                let node_id = instance
                    .metadata
                    .custom_attributes
                    .get("node_id")
                    .cloned()
                    .unwrap_or_default();
                let service_group = instance
                    .metadata
                    .custom_attributes
                    .get("service_group")
                    .cloned()
                    .unwrap_or_default();
                let metadata = ActorMetadata::new(actor_type, name, node_id).with_group(service_group);
                let registered = RegisteredActor {
                    metadata,
                    handle: ActorHandle::Remote(RemoteHandle {
                        uri: instance.address.clone(),
                    }),
                    uri: instance.address,
                    is_local: false,
                };
                self.remote_cache
                    .lock()
                    .insert(name.to_string(), registered.clone());
                if let Some(cb) = &self.on_discovered {
                    cb(registered.clone());
                }
                return Some(registered.handle);
            }
        }

        warn!("remote actor '{name}' not found in any service bucket");
        None
    }

    /// Iterates every type bucket, filters on `custom_attributes.service_group`,
    /// resolving local entries to their owned handle and remote entries via
    /// the same connect-and-cache path as `discover_remote`.
    pub async fn discover_by_group(&self, group: &str) -> Vec<(String, ActorHandle)> {
        let mut found = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for (name, actor) in self.local.lock().iter() {
            if actor.metadata.service_group == group {
                found.push((name.clone(), actor.handle.clone()));
                seen.insert(name.clone());
            }
        }

        for actor_type in ActorType::ALL {
            let service_name = actor_type.service_name();
            let instances = match self.discovery.query_all(&service_name).await {
                Ok(v) => v,
                Err(_) => continue,
            };
            for instance in instances {
                if seen.contains(&instance.instance_id) {
                    continue;
                }
                let matches_group = instance
                    .metadata
                    .custom_attributes
                    .get("service_group")
                    .map(|g| g == group)
                    .unwrap_or(false);
                if matches_group {
                    if let Some(handle) = self.discover_remote(&instance.instance_id).await {
                        seen.insert(instance.instance_id.clone());
                        found.push((instance.instance_id, handle));
                    }
                }
            }
        }

        found
    }

    /// Snapshot of local actor names, for the heartbeat worker and cluster
    /// stats aggregation.
    pub fn local_actor_names(&self) -> Vec<String> {
        self.local.lock().keys().cloned().collect()
    }

    pub fn local_len(&self) -> usize {
        self.local.lock().len()
    }

    pub fn local_actors_by_type(&self) -> HashMap<ActorType, usize> {
        let mut out = HashMap::new();
        for actor in self.local.lock().values() {
            *out.entry(actor.metadata.actor_type).or_insert(0) += 1;
        }
        out
    }

    /// Re-registers every local actor's discovery entry with a fresh TTL
    /// and bumps `last_heartbeat`. Run periodically by the runtime.
    pub async fn heartbeat_once(&self, heartbeat_interval: Duration) {
        let snapshot: Vec<(String, ActorMetadata, String)> = {
            let mut local = self.local.lock();
            local
                .iter_mut()
                .map(|(name, actor)| {
                    actor.metadata.last_heartbeat = Instant::now();
                    (name.clone(), actor.metadata.clone(), actor.uri.clone())
                })
                .collect()
        };

        for (name, metadata, uri) in snapshot {
            let instance = metadata_to_service_instance(&metadata, &uri);
            if let Err(e) = self
                .discovery
                .register(instance, Some(heartbeat_interval * 2))
                .await
            {
                error!("heartbeat re-register for '{name}' failed: {e}");
            }
        }
    }

    /// Deregisters every local actor. Run on runtime shutdown.
    pub async fn deregister_all(&self) {
        let names: Vec<String> = self.local_actor_names();
        for name in names {
            self.unregister_actor(&name).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::local::LocalDiscovery;

    async fn registry() -> ActorRegistry {
        let discovery = Arc::new(LocalDiscovery::new(Duration::from_secs(300), None).await);
        ActorRegistry::new("node-a", discovery, None, None)
    }

    #[tokio::test]
    async fn register_then_find_local() {
        let reg = registry().await;
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        reg.register_actor(
            ActorType::Logic,
            "player_alice",
            "",
            HashMap::new(),
            100,
            tx,
            Duration::from_secs(30),
        )
        .await
        .unwrap();

        assert!(reg.find_local("player_alice").is_some());
        assert_eq!(reg.local_len(), 1);
    }

    #[tokio::test]
    async fn duplicate_local_registration_rejected() {
        let reg = registry().await;
        let (tx1, _rx1) = tokio::sync::mpsc::channel(8);
        let (tx2, _rx2) = tokio::sync::mpsc::channel(8);
        reg.register_actor(
            ActorType::Logic,
            "dup",
            "",
            HashMap::new(),
            100,
            tx1,
            Duration::from_secs(30),
        )
        .await
        .unwrap();

        let err = reg
            .register_actor(
                ActorType::Logic,
                "dup",
                "",
                HashMap::new(),
                100,
                tx2,
                Duration::from_secs(30),
            )
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn unregister_removes_local_entry() {
        let reg = registry().await;
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        reg.register_actor(
            ActorType::Logic,
            "temp",
            "",
            HashMap::new(),
            100,
            tx,
            Duration::from_secs(30),
        )
        .await
        .unwrap();
        reg.unregister_actor("temp").await;
        assert!(reg.find_local("temp").is_none());
    }
}
