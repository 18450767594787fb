//! Periodic sweep (SPEC_FULL.md §4.4): every tick, dispatch `Refresh` to each monitored host and
//! emit a drift-logging heartbeat for every non-terminal cluster. Grounded on
//! `internal/host/monitor.go`'s periodic scan and this codebase's own `tokio::time::interval`
//! server loop (`src/orchestrate.rs`), with per-host work fanned across a `rayon` pool the way
//! this codebase uses `rayon` for other bulk independent work.

use std::sync::Arc;
use std::time::Duration;

use bm_api::model::HostStatus;
use rayon::prelude::*;

use crate::{datastore::Store, host::HostManager};

const MONITORED_STATUSES: &[HostStatus] = &[
    HostStatus::Discovering,
    HostStatus::Known,
    HostStatus::Disconnected,
    HostStatus::Insufficient,
    HostStatus::PendingForInput,
];

pub struct Monitor {
    store: Arc<dyn Store>,
    hosts: Arc<HostManager>,
    period: Duration,
}

impl Monitor {
    pub fn new(store: Arc<dyn Store>, hosts: Arc<HostManager>, period: Duration) -> Self {
        Monitor { store, hosts, period }
    }

    /// Runs the sweep loop until the process is asked to shut down. Each tick is independent of
    /// the last; a slow or failing tick never blocks the next one past `period`.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.period);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep(),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        log::info!("monitor shutting down");
                        return;
                    }
                }
            }
        }
    }

    fn sweep(&self) {
        self.sweep_hosts();
        self.sweep_clusters();
    }

    fn sweep_hosts(&self) {
        let due = {
            let mut tx = match self.store.begin() {
                Ok(tx) => tx,
                Err(e) => {
                    log::error!("monitor: failed to open transaction for host scan: {e:?}");
                    return;
                }
            };
            let hosts = match tx.hosts_scan(MONITORED_STATUSES) {
                Ok(hosts) => hosts,
                Err(e) => {
                    log::error!("monitor: failed to scan hosts: {e:?}");
                    return;
                }
            };
            let _ = tx.commit();
            hosts
        };

        due.par_iter().for_each(|host| {
            match self.hosts.refresh_status(None, host.cluster_id, host.id, true) {
                Ok(Some(updated)) if updated.status != host.status => {
                    log::info!(
                        "host {} refreshed {} -> {}",
                        host.id,
                        host.status,
                        updated.status
                    );
                }
                Ok(_) => {}
                Err(e) => log::warn!("monitor: refresh failed for host {}: {e:?}", host.id),
            }
        });
    }

    fn sweep_clusters(&self) {
        let mut tx = match self.store.begin() {
            Ok(tx) => tx,
            Err(e) => {
                log::error!("monitor: failed to open transaction for cluster scan: {e:?}");
                return;
            }
        };
        let clusters = match tx.clusters_scan_non_terminal() {
            Ok(clusters) => clusters,
            Err(e) => {
                log::error!("monitor: failed to scan clusters: {e:?}");
                return;
            }
        };
        for cluster in clusters {
            tracing::info!(
                cluster_id = %cluster.id,
                status = %cluster.status,
                "cluster heartbeat"
            );
        }
        let _ = tx.commit();
        // No Refresh event exists on the cluster machine, so there's nothing to dispatch here
        // beyond this drift-logging heartbeat.
    }
}
