//! Cluster synchronization integration tests.
//!
//! Drives two nodes' sync handlers against each other by hand-delivering
//! the diffs one node publishes to the other.

mod common;

use roomcast::cluster::{ClusterSync, MemoryCacheStore, RecordingTransport};
use roomcast::ledger::{
    FullStateSnapshot, HistorySettings, StateDiff, SyncHistoryBuffer,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn node(node_id: &str) -> (ClusterSync, RecordingTransport) {
    let transport = RecordingTransport::new();
    let history = SyncHistoryBuffer::new(node_id, Arc::new(MemoryCacheStore::new()));
    let sync = ClusterSync::new(node_id, history, Arc::new(transport.clone()));
    (sync, transport)
}

#[tokio::test]
async fn test_two_nodes_converge_on_subscription_changes() {
    let (mut a, _) = node("node-a");
    let (mut b, _) = node("node-b");

    let created = a
        .subscribe_local("r1", "idx", "col", &json!({"term": {"user": "u1"}}))
        .await
        .unwrap();
    b.apply_remote(&created).await.unwrap();
    assert_eq!(a.state().count_subscriptions("r1"), 1);
    assert_eq!(b.state().count_subscriptions("r1"), 1);

    let added = a
        .subscribe_local("r1", "idx", "col", &json!({}))
        .await
        .unwrap();
    b.apply_remote(&added).await.unwrap();
    assert_eq!(b.state().count_subscriptions("r1"), 2);

    // B gets its own local subscriber too; total is the cluster-wide count.
    let from_b = b
        .subscribe_local("r1", "idx", "col", &json!({}))
        .await
        .unwrap();
    a.apply_remote(&from_b).await.unwrap();
    assert_eq!(a.state().count_subscriptions("r1"), 3);
    assert_eq!(b.state().count_subscriptions("r1"), 3);

    // Filters are those of the creating node.
    let filters = a.state().get_filters("r1").unwrap();
    assert_eq!(filters.filter_spec["term"]["user"], "u1");
    assert_eq!(filters.target, "idx/col");
}

#[tokio::test]
async fn test_room_disappears_everywhere_when_last_node_leaves() {
    let (mut a, _) = node("node-a");
    let (mut b, _) = node("node-b");

    let created = a.subscribe_local("r1", "i", "c", &json!({})).await.unwrap();
    b.apply_remote(&created).await.unwrap();

    let removed = a.unsubscribe_local("r1").await.unwrap().unwrap();
    assert!(matches!(removed, StateDiff::RoomRemoved { .. }));
    b.apply_remote(&removed).await.unwrap();

    assert!(a.state().room("r1").is_none());
    assert!(b.state().room("r1").is_none());
    assert_eq!(b.state().room_count(), 0);
}

#[tokio::test]
async fn test_duplicate_delivery_is_ignored_without_desync() {
    let (mut a, _) = node("node-a");
    let (mut b, _) = node("node-b");

    let created = a.subscribe_local("r1", "i", "c", &json!({})).await.unwrap();
    let added = a.subscribe_local("r1", "i", "c", &json!({})).await.unwrap();

    b.apply_remote(&created).await.unwrap();
    b.apply_remote(&added).await.unwrap();

    // The transport redelivers; sequence staleness absorbs it.
    let outcome = b.apply_remote(&added).await.unwrap();
    assert!(!outcome.is_applied());
    assert!(!b.is_desynced());
    assert_eq!(b.state().count_subscriptions("r1"), 2);
}

#[tokio::test]
async fn test_desync_saves_forensic_history_to_cache() {
    let cache: Arc<dyn roomcast::cluster::CacheStore> = Arc::new(MemoryCacheStore::new());
    let history = SyncHistoryBuffer::new("node-b", Arc::clone(&cache));
    let transport = RecordingTransport::new();
    let mut b = ClusterSync::new("node-b", history, Arc::new(transport));
    b.history_mut().set_settings(HistorySettings {
        ttl: Some(Duration::from_secs(3600)),
        max_entries: 50,
    });

    let create = StateDiff::RoomCreated {
        room_id: "r1".into(),
        index: "i".into(),
        collection: "c".into(),
        filter_spec: json!({}),
        node: roomcast::ledger::NodeEntry::new("node-a", 1, 1),
    };
    b.apply_remote(&create).await.unwrap();

    // A duplicate room creation for an existing node entry is fatal.
    let error = b.apply_remote(&create).await.unwrap_err();
    assert!(b.is_desynced());
    assert_eq!(b.desync(), Some(&error));

    let persisted = cache.get("cluster/sync_history/node-b").await.unwrap();
    let entries: serde_json::Value = serde_json::from_str(&persisted).unwrap();
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["topic"], "room:created");
    // The second capture shows the state the fatal diff hit.
    assert_eq!(entries[1]["state"]["rooms"]["r1"]["nodes"]["node-a"]["sequence"], 1);
}

#[tokio::test]
async fn test_resync_from_peer_snapshot() {
    let (mut a, _) = node("node-a");
    let (mut b, _) = node("node-b");

    a.subscribe_local("r1", "i", "c", &json!({})).await.unwrap();
    a.register_auth_strategy("local", json!({"kind": "password"}))
        .await;

    // B desyncs on a stray diff.
    let stray = StateDiff::SubscriptionRemoved {
        room_id: "r1".into(),
        node_id: "node-b".into(),
        sequence: 1,
    };
    assert!(b.apply_remote(&stray).await.is_err());
    assert!(b.is_desynced());

    // A's snapshot is authoritative.
    let snapshot: FullStateSnapshot = a.state().snapshot();
    b.resync(snapshot);
    assert!(!b.is_desynced());
    assert_eq!(b.state().count_subscriptions("r1"), 1);
    assert_eq!(b.state().auth_strategy_names(), vec!["local".to_string()]);
}

#[tokio::test]
async fn test_auth_strategies_replicate() {
    let (mut a, _) = node("node-a");
    let (mut b, _) = node("node-b");

    a.register_auth_strategy("ldap", json!({"url": "ldap://dc1"}))
        .await;
    let diff = StateDiff::AuthStrategyAdded {
        name: "ldap".into(),
        definition: json!({"url": "ldap://dc1"}),
    };
    b.apply_remote(&diff).await.unwrap();
    assert_eq!(
        b.state().auth_strategy("ldap").unwrap()["url"],
        "ldap://dc1"
    );

    a.unregister_auth_strategy("ldap").await;
    b.apply_remote(&StateDiff::AuthStrategyRemoved {
        name: "ldap".into(),
    })
    .await
    .unwrap();
    assert!(b.state().auth_strategy("ldap").is_none());
}

#[tokio::test]
async fn test_node_eviction_purges_only_the_departed_node() {
    let (mut a, _) = node("node-a");
    let (mut b, _) = node("node-b");

    let created = a.subscribe_local("r1", "i", "c", &json!({})).await.unwrap();
    b.apply_remote(&created).await.unwrap();
    let from_b = b.subscribe_local("r1", "i", "c", &json!({})).await.unwrap();
    a.apply_remote(&from_b).await.unwrap();

    // A departs; B purges its entries but keeps its own.
    b.evict_node("node-a").await;
    assert_eq!(b.state().count_subscriptions("r1"), 1);
    assert!(b.state().room("r1").unwrap().nodes.contains_key("node-b"));
}
