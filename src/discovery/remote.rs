//! Remote discovery backends — interfaces only.
//!
//! Each struct below satisfies `ServiceDiscovery` but performs no real I/O;
//! the wire protocol and client library for etcd/Consul/Nacos/Redis are
//! out of scope (SPEC_FULL.md §1, "remote backends abstractly"). They exist
//! so `Coordinator` can select a backend by config kind without a missing
//! match arm, and so their config shape is exercised end to end.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use super::{ServiceDiscovery, ServiceInstance};
use crate::config::{ConsulDiscoveryConfig, EtcdDiscoveryConfig, NacosDiscoveryConfig, RedisDiscoveryConfig};
use crate::error::{Error, Result};

macro_rules! unavailable {
    ($name:expr) => {
        Err(Error::DiscoveryBackendUnavailable {
            backend: $name.to_string(),
            reason: "remote backend not implemented in this build".to_string(),
        })
    };
}

pub struct EtcdDiscovery {
    #[allow(dead_code)]
    config: EtcdDiscoveryConfig,
}

impl EtcdDiscovery {
    pub fn new(config: EtcdDiscoveryConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ServiceDiscovery for EtcdDiscovery {
    async fn register(&self, _instance: ServiceInstance, _ttl: Option<Duration>) -> Result<bool> {
        unavailable!("etcd")
    }
    async fn deregister(&self, _service_name: &str, _instance_id: &str) -> Result<bool> {
        unavailable!("etcd")
    }
    async fn query_service(&self, _service_name: &str) -> Result<Option<ServiceInstance>> {
        unavailable!("etcd")
    }
    async fn query_all(&self, _service_name: &str) -> Result<Vec<ServiceInstance>> {
        unavailable!("etcd")
    }
    async fn query_by_metadata(
        &self,
        _filters: &HashMap<String, String>,
    ) -> Result<Vec<ServiceInstance>> {
        unavailable!("etcd")
    }
    async fn query_by_criteria(
        &self,
        _service_name: &str,
        _version_filter: &str,
        _region_filter: &str,
        _environment_filter: &str,
        _required_tags: &[String],
    ) -> Result<Vec<ServiceInstance>> {
        unavailable!("etcd")
    }
    fn name(&self) -> &str {
        "etcd"
    }
}

pub struct ConsulDiscovery {
    #[allow(dead_code)]
    config: ConsulDiscoveryConfig,
}

impl ConsulDiscovery {
    pub fn new(config: ConsulDiscoveryConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ServiceDiscovery for ConsulDiscovery {
    async fn register(&self, _instance: ServiceInstance, _ttl: Option<Duration>) -> Result<bool> {
        unavailable!("consul")
    }
    async fn deregister(&self, _service_name: &str, _instance_id: &str) -> Result<bool> {
        unavailable!("consul")
    }
    async fn query_service(&self, _service_name: &str) -> Result<Option<ServiceInstance>> {
        unavailable!("consul")
    }
    async fn query_all(&self, _service_name: &str) -> Result<Vec<ServiceInstance>> {
        unavailable!("consul")
    }
    async fn query_by_metadata(
        &self,
        _filters: &HashMap<String, String>,
    ) -> Result<Vec<ServiceInstance>> {
        unavailable!("consul")
    }
    async fn query_by_criteria(
        &self,
        _service_name: &str,
        _version_filter: &str,
        _region_filter: &str,
        _environment_filter: &str,
        _required_tags: &[String],
    ) -> Result<Vec<ServiceInstance>> {
        unavailable!("consul")
    }
    fn name(&self) -> &str {
        "consul"
    }
}

pub struct NacosDiscovery {
    #[allow(dead_code)]
    config: NacosDiscoveryConfig,
}

impl NacosDiscovery {
    pub fn new(config: NacosDiscoveryConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ServiceDiscovery for NacosDiscovery {
    async fn register(&self, _instance: ServiceInstance, _ttl: Option<Duration>) -> Result<bool> {
        unavailable!("nacos")
    }
    async fn deregister(&self, _service_name: &str, _instance_id: &str) -> Result<bool> {
        unavailable!("nacos")
    }
    async fn query_service(&self, _service_name: &str) -> Result<Option<ServiceInstance>> {
        unavailable!("nacos")
    }
    async fn query_all(&self, _service_name: &str) -> Result<Vec<ServiceInstance>> {
        unavailable!("nacos")
    }
    async fn query_by_metadata(
        &self,
        _filters: &HashMap<String, String>,
    ) -> Result<Vec<ServiceInstance>> {
        unavailable!("nacos")
    }
    async fn query_by_criteria(
        &self,
        _service_name: &str,
        _version_filter: &str,
        _region_filter: &str,
        _environment_filter: &str,
        _required_tags: &[String],
    ) -> Result<Vec<ServiceInstance>> {
        unavailable!("nacos")
    }
    fn name(&self) -> &str {
        "nacos"
    }
}

pub struct RedisDiscovery {
    #[allow(dead_code)]
    config: RedisDiscoveryConfig,
}

impl RedisDiscovery {
    pub fn new(config: RedisDiscoveryConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ServiceDiscovery for RedisDiscovery {
    async fn register(&self, _instance: ServiceInstance, _ttl: Option<Duration>) -> Result<bool> {
        unavailable!("redis")
    }
    async fn deregister(&self, _service_name: &str, _instance_id: &str) -> Result<bool> {
        unavailable!("redis")
    }
    async fn query_service(&self, _service_name: &str) -> Result<Option<ServiceInstance>> {
        unavailable!("redis")
    }
    async fn query_all(&self, _service_name: &str) -> Result<Vec<ServiceInstance>> {
        unavailable!("redis")
    }
    async fn query_by_metadata(
        &self,
        _filters: &HashMap<String, String>,
    ) -> Result<Vec<ServiceInstance>> {
        unavailable!("redis")
    }
    async fn query_by_criteria(
        &self,
        _service_name: &str,
        _version_filter: &str,
        _region_filter: &str,
        _environment_filter: &str,
        _required_tags: &[String],
    ) -> Result<Vec<ServiceInstance>> {
        unavailable!("redis")
    }
    fn name(&self) -> &str {
        "redis"
    }
}
