//! Service Discovery Abstraction: uniform registration, TTL, and
//! query-by-name/metadata/criteria across a pluggable set of backends.

pub mod local;
pub mod remote;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// When a `ServiceInstance` stops being considered live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    At(Instant),
    Never,
}

impl Expiration {
    pub fn from_ttl(ttl: Option<Duration>) -> Self {
        match ttl {
            Some(d) => Expiration::At(Instant::now() + d),
            None => Expiration::Never,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        match self {
            Expiration::At(t) => *t <= now,
            Expiration::Never => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetadata {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom_attributes: HashMap<String, String>,
}

fn default_weight() -> u32 {
    100
}

impl ServiceMetadata {
    /// AND of all filter predicates. See SPEC_FULL.md §4.1 for the exact
    /// per-key semantics (well-known keys match typed fields, `tag` is
    /// set membership, anything else is a `custom_attributes` lookup).
    pub fn matches_filters(&self, filters: &HashMap<String, String>) -> bool {
        filters.iter().all(|(k, v)| self.matches_one(k, v))
    }

    fn matches_one(&self, key: &str, value: &str) -> bool {
        let skip_if_both_empty = |field: &str| field.is_empty() && value.is_empty();
        match key {
            "version" => skip_if_both_empty(&self.version) || self.version == value,
            "region" => skip_if_both_empty(&self.region) || self.region == value,
            "environment" => skip_if_both_empty(&self.environment) || self.environment == value,
            "weight" => value.is_empty() || self.weight.to_string() == value,
            "tag" => self.tags.iter().any(|t| t == value),
            other => match self.custom_attributes.get(other) {
                Some(v) => v == value,
                None => value.is_empty(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub service_name: String,
    pub instance_id: String,
    pub address: String,
    pub metadata: ServiceMetadata,
    #[serde(skip, default = "default_expiration")]
    pub expiration_time: Expiration,
}

fn default_expiration() -> Expiration {
    Expiration::Never
}

/// Capability set implemented once per discovery backend. One concrete
/// variant per backend, chosen at startup from configuration.
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    async fn register(&self, instance: ServiceInstance, ttl: Option<Duration>) -> Result<bool>;
    async fn deregister(&self, service_name: &str, instance_id: &str) -> Result<bool>;
    async fn query_service(&self, service_name: &str) -> Result<Option<ServiceInstance>>;
    async fn query_all(&self, service_name: &str) -> Result<Vec<ServiceInstance>>;
    async fn query_by_metadata(
        &self,
        filters: &HashMap<String, String>,
    ) -> Result<Vec<ServiceInstance>>;
    async fn query_by_criteria(
        &self,
        service_name: &str,
        version_filter: &str,
        region_filter: &str,
        environment_filter: &str,
        required_tags: &[String],
    ) -> Result<Vec<ServiceInstance>>;
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(version: &str, region: &str) -> ServiceMetadata {
        ServiceMetadata {
            version: version.into(),
            region: region.into(),
            environment: "prod".into(),
            weight: 100,
            tags: vec!["actor".into()],
            custom_attributes: HashMap::new(),
        }
    }

    #[test]
    fn matches_filters_well_known_keys() {
        let m = meta("1.0.0", "us");
        let mut f = HashMap::new();
        f.insert("region".to_string(), "us".to_string());
        assert!(m.matches_filters(&f));

        f.insert("version".to_string(), "2.0.0".to_string());
        assert!(!m.matches_filters(&f));
    }

    #[test]
    fn matches_filters_tag_membership() {
        let m = meta("1.0.0", "us");
        let mut f = HashMap::new();
        f.insert("tag".to_string(), "actor".to_string());
        assert!(m.matches_filters(&f));
        f.insert("tag".to_string(), "nope".to_string());
        assert!(!m.matches_filters(&f));
    }

    #[test]
    fn matches_filters_custom_attribute() {
        let mut m = meta("1.0.0", "us");
        m.custom_attributes
            .insert("service_group".to_string(), "squad-a".to_string());
        let mut f = HashMap::new();
        f.insert("service_group".to_string(), "squad-a".to_string());
        assert!(m.matches_filters(&f));
        f.insert("service_group".to_string(), "squad-b".to_string());
        assert!(!m.matches_filters(&f));
    }

    #[test]
    fn expiration_never_does_not_expire() {
        let e = Expiration::Never;
        assert!(!e.is_expired(Instant::now() + Duration::from_secs(1_000_000)));
    }

    #[test]
    fn expiration_at_expires_after_deadline() {
        let e = Expiration::from_ttl(Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(5));
        assert!(e.is_expired(Instant::now()));
    }
}
