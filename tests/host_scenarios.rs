//! Concrete scenarios from SPEC_FULL.md §8, driven through the public `HostManager`/`ClusterManager`
//! façade against a real (in-memory) `SqliteStore`, the way `internal/host/transition_test.go`
//! drives the original machine through its public handler.

use std::sync::Arc;

use bm_inventory::{
    cluster::ClusterManager,
    datastore::{SqliteStore, Store},
    events::TracingEventSink,
    host::HostManager,
    EngineConfig,
};
use bm_api::model::{Cluster, ClusterStatus, Cpu, Disk, HostRole, HostStatus, Interface, Inventory, Memory};
use chrono::Utc;
use uuid::Uuid;

fn harness() -> (HostManager, ClusterManager, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let events = Arc::new(TracingEventSink);
    let hosts = HostManager::new(store.clone(), events.clone(), EngineConfig::default());
    let clusters = ClusterManager::new(store.clone(), events);
    (hosts, clusters, store)
}

fn seed_cluster(store: &SqliteStore, cidr: &str) -> Uuid {
    let id = Uuid::new_v4();
    let mut tx = store.begin().unwrap();
    tx.cluster_put(&Cluster {
        id,
        status: ClusterStatus::Ready,
        status_info: String::new(),
        status_updated_at: Utc::now(),
        machine_network_cidr: cidr.to_string(),
        install_started_at: None,
        install_completed_at: None,
    })
    .unwrap();
    tx.commit().unwrap();
    id
}

fn good_inventory(hostname: &str, ip: &str) -> Inventory {
    Inventory {
        cpu: Some(Cpu { count: 8 }),
        memory: Some(Memory { physical_bytes: 32 * 1024 * 1024 * 1024 }),
        disks: vec![Disk {
            id: "sda".into(),
            size_bytes: 200 * 1024 * 1024 * 1024,
            is_removable: false,
            is_read_only: false,
        }],
        hostname: hostname.to_string(),
        interfaces: vec![Interface {
            name: "eth0".into(),
            ip_addresses: vec![ip.parse().unwrap()],
        }],
    }
}

#[test]
fn register_fresh_host() {
    let (hosts, _clusters, _store) = harness();
    let cluster_id = Uuid::new_v4();
    let host_id = Uuid::new_v4();

    let host = hosts.register(None, cluster_id, host_id, Some("v1.0.1".to_string())).unwrap();

    assert_eq!(host.status, HostStatus::Discovering);
    assert_eq!(host.status_info, "discovering");
}

#[test]
fn register_during_install_marks_error() {
    let (hosts, _clusters, store) = harness();
    let cluster_id = seed_cluster(&store, "1.2.3.0/24");
    let host_id = Uuid::new_v4();
    hosts.register(None, cluster_id, host_id, None).unwrap();

    // Drive the host to `installing` directly through the store, as a prior test would leave it.
    let mut tx = store.begin().unwrap();
    let mut host = tx.host_get(cluster_id, host_id).unwrap().unwrap();
    host.status = HostStatus::Installing;
    tx.host_cas_update(HostStatus::Discovering, &host).unwrap();
    tx.commit().unwrap();

    let host = hosts.register(None, cluster_id, host_id, None).unwrap();
    assert_eq!(host.status, HostStatus::Error);
    assert!(host.status_info.contains("unexpectedly restarted"));
}

#[test]
fn register_during_reboot_waits_for_user_action() {
    let (hosts, _clusters, store) = harness();
    let cluster_id = seed_cluster(&store, "1.2.3.0/24");
    let host_id = Uuid::new_v4();
    hosts.register(None, cluster_id, host_id, None).unwrap();

    let mut tx = store.begin().unwrap();
    let mut host = tx.host_get(cluster_id, host_id).unwrap().unwrap();
    host.status = HostStatus::InstallingInProgress;
    host.progress.current_stage = bm_api::model::HostStage::Rebooting;
    tx.host_cas_update(HostStatus::Discovering, &host).unwrap();
    tx.commit().unwrap();

    let host = hosts.register(None, cluster_id, host_id, None).unwrap();
    assert_eq!(host.status, HostStatus::InstallingPendingUserAction);
}

#[test]
fn install_with_valid_role_and_transaction_rollback() {
    let (hosts, _clusters, store) = harness();
    let cluster_id = seed_cluster(&store, "1.2.3.0/24");
    let host_id = Uuid::new_v4();
    hosts.register(None, cluster_id, host_id, None).unwrap();

    let mut tx = store.begin().unwrap();
    let mut host = tx.host_get(cluster_id, host_id).unwrap().unwrap();
    host.status = HostStatus::Known;
    host.role = Some(HostRole::Master);
    tx.host_cas_update(HostStatus::Discovering, &host).unwrap();
    tx.commit().unwrap();

    // Install inside a caller-owned transaction, then drop it without committing.
    {
        let mut tx = store.begin().unwrap();
        let installed = hosts.install(Some(tx.as_mut()), cluster_id, host_id).unwrap();
        assert_eq!(installed.status, HostStatus::Installing);
        assert_eq!(installed.status_info, "installing");
        // tx dropped here without commit: rolls back.
    }

    let mut tx = store.begin().unwrap();
    let host = tx.host_get(cluster_id, host_id).unwrap().unwrap();
    tx.commit().unwrap();
    assert_eq!(host.status, HostStatus::Known);
}

#[test]
fn refresh_to_known() {
    let (hosts, _clusters, store) = harness();
    let cluster_id = seed_cluster(&store, "1.2.3.0/24");
    let host_id = Uuid::new_v4();
    hosts.register(None, cluster_id, host_id, None).unwrap();

    let mut tx = store.begin().unwrap();
    let mut host = tx.host_get(cluster_id, host_id).unwrap().unwrap();
    host.checked_in_at = Some(Utc::now());
    host.role = Some(HostRole::Master);
    host.inventory = Some(serde_json::to_string(&good_inventory("node1", "1.2.3.10")).unwrap());
    tx.host_cas_update(HostStatus::Discovering, &host).unwrap();
    tx.commit().unwrap();

    let refreshed = hosts.refresh_status(None, cluster_id, host_id, false).unwrap().unwrap();
    assert_eq!(refreshed.status, HostStatus::Known);
    assert_eq!(refreshed.status_info, "");
}

#[test]
fn refresh_uniqueness_collision() {
    let (hosts, _clusters, store) = harness();
    let cluster_id = seed_cluster(&store, "1.2.3.0/24");

    let first_id = Uuid::new_v4();
    hosts.register(None, cluster_id, first_id, None).unwrap();
    let second_id = Uuid::new_v4();
    hosts.register(None, cluster_id, second_id, None).unwrap();

    let mut tx = store.begin().unwrap();
    for (id, ip) in [(first_id, "1.2.3.10"), (second_id, "1.2.3.11")] {
        let mut host = tx.host_get(cluster_id, id).unwrap().unwrap();
        host.checked_in_at = Some(Utc::now());
        host.role = Some(HostRole::Worker);
        host.requested_hostname = Some("first".to_string());
        host.inventory = Some(serde_json::to_string(&good_inventory("first", ip)).unwrap());
        tx.host_cas_update(HostStatus::Discovering, &host).unwrap();
    }
    tx.commit().unwrap();

    let refreshed = hosts.refresh_status(None, cluster_id, first_id, false).unwrap().unwrap();
    assert_eq!(refreshed.status, HostStatus::Insufficient);
    assert!(refreshed.status_info.contains("Hostname first is not unique in cluster"));
}
