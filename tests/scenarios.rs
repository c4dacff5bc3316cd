//! End-to-end scenarios S1-S7 (SPEC_FULL.md §8).

use std::collections::HashMap;
use std::time::Duration;

use shieldrt::actor::runtime::DistributedRuntime;
use shieldrt::discovery::local::LocalDiscovery;
use shieldrt::discovery::{ServiceDiscovery, ServiceInstance, ServiceMetadata};
use shieldrt::{ActorType, VmPool};

fn instance(service_name: &str, instance_id: &str, address: &str) -> ServiceInstance {
    ServiceInstance {
        service_name: service_name.into(),
        instance_id: instance_id.into(),
        address: address.into(),
        metadata: ServiceMetadata::default(),
        expiration_time: shieldrt::discovery::Expiration::Never,
    }
}

/// S1 — Local registration + lookup.
#[tokio::test]
async fn s1_local_registration_and_lookup() {
    let discovery = LocalDiscovery::new(Duration::from_secs(300), None).await;
    discovery
        .register(instance("auth", "i1", "tcp://127.0.0.1:9001"), None)
        .await
        .unwrap();

    let found = discovery.query_service("auth").await.unwrap().unwrap();
    assert_eq!(found.instance_id, "i1");

    discovery.deregister("auth", "i1").await.unwrap();
    assert!(discovery.query_all("auth").await.unwrap().is_empty());
}

/// S2 — TTL expiry.
#[tokio::test]
async fn s2_ttl_expiry() {
    let discovery = LocalDiscovery::new(Duration::from_millis(50), None).await;
    discovery
        .register(
            instance("t", "a", "tcp://127.0.0.1:9002"),
            Some(Duration::from_millis(500)),
        )
        .await
        .unwrap();
    discovery
        .register(instance("t", "b", "tcp://127.0.0.1:9003"), None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(2_000)).await;

    let live = discovery.query_all("t").await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].instance_id, "b");
}

/// S3 — Metadata filter.
#[tokio::test]
async fn s3_metadata_filter() {
    let discovery = LocalDiscovery::new(Duration::from_secs(300), None).await;

    let mut us = instance("svc", "i-us", "tcp://127.0.0.1:9004");
    us.metadata.region = "us".into();
    let mut eu = instance("svc", "i-eu", "tcp://127.0.0.1:9005");
    eu.metadata.region = "eu".into();

    discovery.register(us, None).await.unwrap();
    discovery.register(eu, None).await.unwrap();

    let matched = discovery
        .query_by_criteria("svc", "", "us", "", &[])
        .await
        .unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].instance_id, "i-us");
}

/// S4 — Cluster discovery: node A registers an actor, node B sharing the
/// same backend observes it on its next discovery tick and emits
/// NodeJoined("A") exactly once.
#[tokio::test]
async fn s4_cluster_discovery_observes_new_node() {
    use shieldrt::ClusterEvent;
    use std::sync::{Arc, Mutex};

    let discovery = Arc::new(LocalDiscovery::new(Duration::from_secs(300), None).await);

    let node_a = DistributedRuntime::new(
        "node-a",
        discovery.clone(),
        Duration::from_secs(30),
        Duration::from_secs(60),
        None,
    );
    let (tx, _rx) = tokio::sync::mpsc::channel(8);
    node_a
        .register_actor(
            ActorType::Logic,
            "player_alice",
            "",
            HashMap::new(),
            100,
            tx,
        )
        .await
        .unwrap();

    let events: Arc<Mutex<Vec<ClusterEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let events_clone = events.clone();
    let node_b = DistributedRuntime::new(
        "node-b",
        discovery.clone(),
        Duration::from_secs(30),
        Duration::from_millis(50),
        Some(Arc::new(move |e| events_clone.lock().unwrap().push(e))),
    );
    node_b.initialize();

    tokio::time::sleep(Duration::from_millis(300)).await;

    let joined_a_count = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, ClusterEvent::NodeJoined(n) if n == "node-a"))
        .count();
    assert_eq!(joined_a_count, 1);
}

/// S5 — VM pool lease RAII.
#[tokio::test]
async fn s5_vm_pool_lease_exhaustion_and_recovery() {
    use shieldrt::config::LuaVmPoolConfig;

    let pool = VmPool::new(LuaVmPoolConfig {
        initial_size: 2,
        min_size: 2,
        max_size: 4,
        idle_timeout_ms: 60_000,
        acquire_timeout_ms: 1_000,
        preload_scripts: false,
        script_paths: Vec::new(),
    })
    .await
    .unwrap();

    let mut leases = Vec::new();
    for _ in 0..4 {
        leases.push(pool.acquire(Duration::from_millis(200)).await.unwrap());
    }

    let fifth = pool.acquire(Duration::from_millis(1_000)).await;
    assert!(fifth.is_none());
    assert_eq!(pool.stats().failed_acquisitions, 1);

    drop(leases.remove(0));
    let sixth = pool.acquire(Duration::from_millis(200)).await;
    assert!(sixth.is_some());
}

/// S6 — Scripted login round-trip.
#[tokio::test]
async fn s6_scripted_login_round_trip() {
    use shieldrt::config::LuaVmPoolConfig;
    use shieldrt::discovery::local::LocalDiscovery as LD;
    use shieldrt::ScriptedActorBridge;
    use std::sync::Arc;

    let discovery = Arc::new(LD::new(Duration::from_secs(300), None).await);
    let runtime = DistributedRuntime::new(
        "node-a",
        discovery,
        Duration::from_secs(30),
        Duration::from_secs(60),
        None,
    );

    let pool = VmPool::new(LuaVmPoolConfig::default()).await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let script_path = dir.path().join("login.lua");
    std::fs::write(
        &script_path,
        r#"
        state = {}
        function on_message(msg)
            if msg.type == "login" then
                state.player_name = msg.data.player_name
                state.level = msg.data.level
                return create_response(true, state, "")
            elseif msg.type == "get_status" then
                return create_response(true, state, "")
            end
            return create_response(false, {}, "unknown message type")
        end
        "#,
    )
    .unwrap();

    let bridge = ScriptedActorBridge::new(
        &pool,
        runtime,
        script_path.to_string_lossy().to_string(),
        None,
        Duration::from_secs(1),
    )
    .await
    .unwrap();

    let login_reply = bridge
        .dispatch("login", r#"{"player_name":"TestPlayer","level":"5"}"#)
        .await;
    assert!(login_reply.success);
    assert_eq!(login_reply.data.get("player_name").unwrap(), "TestPlayer");
    assert_eq!(login_reply.data.get("level").unwrap(), "5");

    let status_reply = bridge.dispatch("get_status", "").await;
    assert!(status_reply.success);
    assert_eq!(status_reply.data.get("player_name").unwrap(), "TestPlayer");
    assert_eq!(status_reply.data.get("level").unwrap(), "5");
}

/// S7 — Script error is contained; the actor survives and handles the
/// next message normally.
#[tokio::test]
async fn s7_script_error_is_contained() {
    use shieldrt::config::LuaVmPoolConfig;
    use shieldrt::discovery::local::LocalDiscovery as LD;
    use shieldrt::ScriptedActorBridge;
    use std::sync::Arc;

    let discovery = Arc::new(LD::new(Duration::from_secs(300), None).await);
    let runtime = DistributedRuntime::new(
        "node-a",
        discovery,
        Duration::from_secs(30),
        Duration::from_secs(60),
        None,
    );

    let pool = VmPool::new(LuaVmPoolConfig::default()).await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let script_path = dir.path().join("faulty.lua");
    std::fs::write(
        &script_path,
        r#"
        function on_message(msg)
            if msg.type == "boom" then
                error("kaboom")
            end
            return create_response(true, {}, "")
        end
        "#,
    )
    .unwrap();

    let bridge = ScriptedActorBridge::new(
        &pool,
        runtime,
        script_path.to_string_lossy().to_string(),
        None,
        Duration::from_secs(1),
    )
    .await
    .unwrap();

    let reply = bridge.dispatch("boom", "{}").await;
    assert!(!reply.success);
    assert!(reply.error_message.starts_with("Lua error:"));

    let next = bridge.dispatch("ping", "{}").await;
    assert!(next.success);
}
