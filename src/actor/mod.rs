//! Actor data model: the closed `ActorType` enumeration, the metadata an
//! actor registers with, and the handle used to address it.
//!
//! Grounded on SPEC_FULL.md §3 and
//! `original_source/src/actor/actor_registry.cpp`'s `type_to_string`/
//! `string_to_type` (unknown tag decodes to `Custom`).

pub mod coordinator;
pub mod registry;
pub mod runtime;

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    Gateway,
    Logic,
    Database,
    Auth,
    Monitor,
    Custom,
}

impl ActorType {
    pub const ALL: [ActorType; 6] = [
        ActorType::Gateway,
        ActorType::Logic,
        ActorType::Database,
        ActorType::Auth,
        ActorType::Monitor,
        ActorType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::Gateway => "gateway",
            ActorType::Logic => "logic",
            ActorType::Database => "database",
            ActorType::Auth => "auth",
            ActorType::Monitor => "monitor",
            ActorType::Custom => "custom",
        }
    }

    /// Unknown tags decode to `Custom` rather than failing.
    pub fn from_str_lenient(s: &str) -> Self {
        match s {
            "gateway" => ActorType::Gateway,
            "logic" => ActorType::Logic,
            "database" => ActorType::Database,
            "auth" => ActorType::Auth,
            "monitor" => ActorType::Monitor,
            other => {
                debug!("unrecognised actor type '{other}', defaulting to custom");
                ActorType::Custom
            }
        }
    }

    pub fn service_name(&self) -> String {
        format!("actor:{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ActorMetadata {
    pub actor_type: ActorType,
    pub name: String,
    pub node_id: String,
    pub service_group: String,
    pub tags: HashMap<String, String>,
    pub load_weight: u32,
    pub last_heartbeat: Instant,
}

impl ActorMetadata {
    pub fn new(actor_type: ActorType, name: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            name: name.into(),
            node_id: node_id.into(),
            service_group: String::new(),
            tags: HashMap::new(),
            load_weight: 100,
            last_heartbeat: Instant::now(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.service_group = group.into();
        self
    }

    pub fn with_tags(mut self, tags: HashMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_load_weight(mut self, weight: u32) -> Self {
        self.load_weight = weight.clamp(1, 100);
        self
    }
}

/// A message sent to an actor's mailbox. `reply` is populated for
/// request/reply dispatch (e.g. the Scripted Actor Bridge); fire-and-forget
/// sends leave it `None`.
#[derive(Debug)]
pub struct Envelope {
    pub msg_type: String,
    pub payload: serde_json::Value,
    pub reply: Option<tokio::sync::oneshot::Sender<serde_json::Value>>,
}

pub type MailboxSender = tokio::sync::mpsc::Sender<Envelope>;
pub type MailboxReceiver = tokio::sync::mpsc::Receiver<Envelope>;

/// A remote proxy: the wire transport itself (connect, frame, security) is
/// out of scope (SPEC_FULL.md §1 Non-goals); this carries only enough to
/// make remote addressing observable and loggable.
#[derive(Debug, Clone)]
pub struct RemoteHandle {
    pub uri: String,
}

impl RemoteHandle {
    async fn send(&self, msg_type: String, _payload: serde_json::Value) -> bool {
        debug!("best-effort remote send of '{msg_type}' to {}", self.uri);
        true
    }
}

#[derive(Debug, Clone)]
pub enum ActorHandle {
    Local(MailboxSender),
    Remote(RemoteHandle),
}

impl ActorHandle {
    pub fn is_local(&self) -> bool {
        matches!(self, ActorHandle::Local(_))
    }

    /// One-way send. Returns whether delivery was attempted (per
    /// SPEC_FULL.md §4.4 `send_to`'s contract — a normal error path for a
    /// full/closed mailbox is `false`, not a fault).
    pub async fn send(&self, msg_type: impl Into<String>, payload: serde_json::Value) -> bool {
        let msg_type = msg_type.into();
        match self {
            ActorHandle::Local(tx) => tx
                .send(Envelope {
                    msg_type,
                    payload,
                    reply: None,
                })
                .await
                .is_ok(),
            ActorHandle::Remote(r) => r.send(msg_type, payload).await,
        }
    }

    /// Request/reply with a timeout; used by the Scripted Actor Bridge and
    /// any caller that needs a synchronous-looking round trip.
    pub async fn request(
        &self,
        msg_type: impl Into<String>,
        payload: serde_json::Value,
        timeout: std::time::Duration,
    ) -> Option<serde_json::Value> {
        match self {
            ActorHandle::Local(tx) => {
                let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
                let envelope = Envelope {
                    msg_type: msg_type.into(),
                    payload,
                    reply: Some(reply_tx),
                };
                if tx.send(envelope).await.is_err() {
                    return None;
                }
                tokio::time::timeout(timeout, reply_rx).await.ok()?.ok()
            }
            ActorHandle::Remote(r) => {
                // Out of scope transport: best-effort, no real reply.
                r.send(msg_type.into(), payload).await;
                None
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegisteredActor {
    pub metadata: ActorMetadata,
    pub handle: ActorHandle,
    pub uri: String,
    pub is_local: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_actor_type_decodes_to_custom() {
        assert_eq!(ActorType::from_str_lenient("spaceship"), ActorType::Custom);
        assert_eq!(ActorType::from_str_lenient("logic"), ActorType::Logic);
    }

    #[test]
    fn service_name_format() {
        assert_eq!(ActorType::Gateway.service_name(), "actor:gateway");
    }

    #[test]
    fn load_weight_clamped_to_1_100() {
        let m = ActorMetadata::new(ActorType::Logic, "n", "node1").with_load_weight(500);
        assert_eq!(m.load_weight, 100);
        let m = ActorMetadata::new(ActorType::Logic, "n", "node1").with_load_weight(0);
        assert_eq!(m.load_weight, 1);
    }
}
