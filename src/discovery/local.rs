//! Local (in-process) service discovery: the authoritative implementation.
//!
//! Grounded on `shield::discovery::LocalServiceDiscovery`
//! (`original_source/src/discovery/local_discovery.cpp`): upsert-by-TTL,
//! idempotent deregister, background cleanup that drops expired entries
//! then persists a snapshot outside the write lock, and random selection
//! via a PRNG kept separate from the directory lock.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::{Expiration, ServiceDiscovery, ServiceInstance};
use crate::error::Result;

type ServiceTable = HashMap<String, HashMap<String, ServiceInstance>>;

/// On-disk representation. `expiration_time` is deliberately not persisted
/// (it is a `std::time::Instant`, meaningless across a restart); entries
/// reloaded from disk start out never-expiring until next renewed.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedInstance {
    instance_id: String,
    address: String,
    metadata: super::ServiceMetadata,
}

pub struct LocalDiscovery {
    services: Arc<RwLock<ServiceTable>>,
    rng: Arc<Mutex<StdRng>>,
    persistence_file_path: Option<PathBuf>,
    shutdown: Arc<tokio::sync::Notify>,
}

impl LocalDiscovery {
    pub async fn new(
        cleanup_interval: Duration,
        persistence_file_path: Option<PathBuf>,
    ) -> Self {
        let services: Arc<RwLock<ServiceTable>> = Arc::new(RwLock::new(HashMap::new()));

        if let Some(path) = &persistence_file_path {
            Self::load_from_file(&services, path);
        }

        let discovery = Self {
            services: services.clone(),
            rng: Arc::new(Mutex::new(StdRng::from_os_rng())),
            persistence_file_path: persistence_file_path.clone(),
            shutdown: Arc::new(tokio::sync::Notify::new()),
        };

        discovery.spawn_cleanup_task(cleanup_interval);
        discovery
    }

    fn spawn_cleanup_task(&self, cleanup_interval: Duration) {
        let services = self.services.clone();
        let persistence_file_path = self.persistence_file_path.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(cleanup_interval) => {}
                    _ = shutdown.notified() => break,
                }
                Self::cleanup_pass(&services, persistence_file_path.as_deref());
            }
        });
    }

    fn cleanup_pass(services: &Arc<RwLock<ServiceTable>>, persistence_file_path: Option<&std::path::Path>) {
        let now = Instant::now();
        {
            let mut table = services.write();
            table.retain(|_, instances| {
                instances.retain(|_, inst| !inst.expiration_time.is_expired(now));
                !instances.is_empty()
            });
        }
        if let Some(path) = persistence_file_path {
            Self::save_to_file(services, path);
        }
    }

    fn save_to_file(services: &Arc<RwLock<ServiceTable>>, path: &std::path::Path) {
        let snapshot: HashMap<String, Vec<PersistedInstance>> = {
            let table = services.read();
            table
                .iter()
                .map(|(name, instances)| {
                    let list = instances
                        .values()
                        .map(|i| PersistedInstance {
                            instance_id: i.instance_id.clone(),
                            address: i.address.clone(),
                            metadata: i.metadata.clone(),
                        })
                        .collect();
                    (name.clone(), list)
                })
                .collect()
        };

        let json = match serde_json::to_string_pretty(&snapshot) {
            Ok(j) => j,
            Err(e) => {
                error!("failed to serialize discovery snapshot: {e}");
                return;
            }
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                error!("failed to create directories for {}: {e}", parent.display());
                return;
            }
        }

        let tmp_path = path.with_extension("tmp");
        if let Err(e) = std::fs::write(&tmp_path, json) {
            error!("could not write temporary persistence file {}: {e}", tmp_path.display());
            return;
        }
        if let Err(e) = std::fs::rename(&tmp_path, path) {
            error!("failed to rename {} to {}: {e}", tmp_path.display(), path.display());
        }
    }

    fn load_from_file(services: &Arc<RwLock<ServiceTable>>, path: &std::path::Path) {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => {
                warn!(
                    "persistence file not found or unreadable: {}. starting with empty registry",
                    path.display()
                );
                return;
            }
        };
        let parsed: HashMap<String, Vec<PersistedInstance>> = match serde_json::from_str(&contents) {
            Ok(p) => p,
            Err(e) => {
                error!("json parse error loading persistence file {}: {e}", path.display());
                return;
            }
        };

        let mut table = services.write();
        table.clear();
        for (service_name, instances) in parsed {
            let bucket = table.entry(service_name.clone()).or_default();
            for inst in instances {
                bucket.insert(
                    inst.instance_id.clone(),
                    ServiceInstance {
                        service_name: service_name.clone(),
                        instance_id: inst.instance_id,
                        address: inst.address,
                        metadata: inst.metadata,
                        expiration_time: Expiration::Never,
                    },
                );
            }
        }
    }

    /// Stops the background cleanup task and flushes a final snapshot.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
        if let Some(path) = &self.persistence_file_path {
            Self::save_to_file(&self.services, path);
        }
    }
}

#[async_trait]
impl ServiceDiscovery for LocalDiscovery {
    async fn register(&self, instance: ServiceInstance, ttl: Option<Duration>) -> Result<bool> {
        if instance.service_name.is_empty() || instance.instance_id.is_empty() {
            return Ok(false);
        }
        let mut instance = instance;
        instance.expiration_time = Expiration::from_ttl(ttl);

        let mut table = self.services.write();
        table
            .entry(instance.service_name.clone())
            .or_default()
            .insert(instance.instance_id.clone(), instance);
        Ok(true)
    }

    async fn deregister(&self, service_name: &str, instance_id: &str) -> Result<bool> {
        if service_name.is_empty() || instance_id.is_empty() {
            return Ok(false);
        }
        let mut table = self.services.write();
        if let Some(instances) = table.get_mut(service_name) {
            instances.remove(instance_id);
            if instances.is_empty() {
                table.remove(service_name);
            }
        }
        Ok(true)
    }

    async fn query_service(&self, service_name: &str) -> Result<Option<ServiceInstance>> {
        let now = Instant::now();
        let available: Vec<ServiceInstance> = {
            let table = self.services.read();
            match table.get(service_name) {
                Some(instances) => instances
                    .values()
                    .filter(|i| !i.expiration_time.is_expired(now))
                    .cloned()
                    .collect(),
                None => return Ok(None),
            }
        };
        if available.is_empty() {
            return Ok(None);
        }
        let idx = {
            let mut rng = self.rng.lock();
            rng.random_range(0..available.len())
        };
        debug!("query_service({service_name}) -> {} candidates, picked index {idx}", available.len());
        Ok(Some(available[idx].clone()))
    }

    async fn query_all(&self, service_name: &str) -> Result<Vec<ServiceInstance>> {
        let now = Instant::now();
        let table = self.services.read();
        Ok(match table.get(service_name) {
            Some(instances) => instances
                .values()
                .filter(|i| !i.expiration_time.is_expired(now))
                .cloned()
                .collect(),
            None => Vec::new(),
        })
    }

    async fn query_by_metadata(
        &self,
        filters: &HashMap<String, String>,
    ) -> Result<Vec<ServiceInstance>> {
        let now = Instant::now();
        let table = self.services.read();
        Ok(table
            .values()
            .flat_map(|instances| instances.values())
            .filter(|i| !i.expiration_time.is_expired(now))
            .filter(|i| i.metadata.matches_filters(filters))
            .cloned()
            .collect())
    }

    async fn query_by_criteria(
        &self,
        service_name: &str,
        version_filter: &str,
        region_filter: &str,
        environment_filter: &str,
        required_tags: &[String],
    ) -> Result<Vec<ServiceInstance>> {
        let all = self.query_all(service_name).await?;
        Ok(all
            .into_iter()
            .filter(|i| version_filter.is_empty() || i.metadata.version == version_filter)
            .filter(|i| region_filter.is_empty() || i.metadata.region == region_filter)
            .filter(|i| environment_filter.is_empty() || i.metadata.environment == environment_filter)
            .filter(|i| required_tags.iter().all(|t| i.metadata.tags.contains(t)))
            .collect())
    }

    fn name(&self) -> &str {
        "local"
    }
}

impl Drop for LocalDiscovery {
    fn drop(&mut self) {
        info!("local discovery shutting down");
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::ServiceMetadata;

    fn instance(service_name: &str, instance_id: &str) -> ServiceInstance {
        ServiceInstance {
            service_name: service_name.into(),
            instance_id: instance_id.into(),
            address: "tcp://127.0.0.1:9001".into(),
            metadata: ServiceMetadata::default(),
            expiration_time: Expiration::Never,
        }
    }

    #[tokio::test]
    async fn register_query_round_trip() {
        let d = LocalDiscovery::new(Duration::from_secs(300), None).await;
        d.register(instance("auth", "i1"), None).await.unwrap();
        let found = d.query_service("auth").await.unwrap().unwrap();
        assert_eq!(found.instance_id, "i1");
        d.deregister("auth", "i1").await.unwrap();
        assert!(d.query_all("auth").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deregister_is_idempotent() {
        let d = LocalDiscovery::new(Duration::from_secs(300), None).await;
        assert!(d.deregister("nope", "nope").await.unwrap());
    }

    #[tokio::test]
    async fn register_rejects_empty_names() {
        let d = LocalDiscovery::new(Duration::from_secs(300), None).await;
        let mut bad = instance("", "i1");
        assert!(!d.register(bad.clone(), None).await.unwrap());
        bad.service_name = "svc".into();
        bad.instance_id = "".into();
        assert!(!d.register(bad, None).await.unwrap());
    }

    #[tokio::test]
    async fn ttl_expiry() {
        let d = LocalDiscovery::new(Duration::from_millis(20), None).await;
        d.register(instance("t", "a"), Some(Duration::from_millis(1)))
            .await
            .unwrap();
        d.register(instance("t", "b"), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let live = d.query_all("t").await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].instance_id, "b");
    }

    #[tokio::test]
    async fn query_by_criteria_filters() {
        let d = LocalDiscovery::new(Duration::from_secs(300), None).await;
        let mut us = instance("svc", "i-us");
        us.metadata.region = "us".into();
        let mut eu = instance("svc", "i-eu");
        eu.metadata.region = "eu".into();
        d.register(us, None).await.unwrap();
        d.register(eu, None).await.unwrap();

        let matched = d
            .query_by_criteria("svc", "", "us", "", &[])
            .await
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].instance_id, "i-us");
    }

    #[tokio::test]
    async fn persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("services.json");

        {
            let d = LocalDiscovery::new(Duration::from_millis(10), Some(path.clone())).await;
            d.register(instance("auth", "i1"), None).await.unwrap();
            LocalDiscovery::cleanup_pass(&d.services, Some(&path));
        }

        let d2 = LocalDiscovery::new(Duration::from_secs(300), Some(path)).await;
        let found = d2.query_service("auth").await.unwrap();
        assert!(found.is_some());
    }
}
