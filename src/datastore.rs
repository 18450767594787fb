//! Persistence contract (SPEC_FULL.md §5/§6) and a concrete `sqlite`-backed implementation,
//! modeled directly on this codebase's own `DataStore` (`src/datastore.rs` upstream): one
//! connection, entities stored as a JSON `contents` blob alongside an indexed `status` column so
//! the monitor's range scan and the FSMs' CAS updates stay cheap.
//!
//! The two state machines demand more than a single-row store, though: atomic updates guarded by
//! a source-state predicate, and transactions a caller may open once and reuse across several
//! entities. `Store::begin` opens a `StoreTx`; when no caller-supplied transaction is threaded
//! through a manager call, the manager opens and commits its own.

use std::sync::Mutex;

use bm_api::{
    error::{EngineError, ReportError, StoreError},
    model::{Cluster, ClusterStatus, Host, HostStatus},
    EntityId,
};

/// A single logical unit of work against the store. Every method that mutates an entity takes
/// the *expected* current status and only applies the write if the row still matches it — the
/// optimistic-concurrency predicate required by SPEC_FULL.md §5.
pub trait StoreTx {
    fn host_get(&mut self, cluster_id: EntityId, host_id: EntityId) -> Result<Option<Host>, EngineError>;

    /// Unconditional insert-or-replace, used only by `RegisterHost`'s create-or-reset path where
    /// there is no well-defined "expected" prior status (the row may not exist at all).
    fn host_put(&mut self, host: &Host) -> Result<(), EngineError>;

    /// Returns `true` if a row existed with `expected_status` and was updated to `host`'s new
    /// status/contents; `false` means another transition already moved the row (a stale no-op).
    fn host_cas_update(&mut self, expected_status: HostStatus, host: &Host) -> Result<bool, EngineError>;

    fn hosts_scan(&mut self, statuses: &[HostStatus]) -> Result<Vec<Host>, EngineError>;

    /// Unconditional insert-or-replace. The engine itself never creates a cluster row (an
    /// external collaborator owns that); this exists for callers that seed or import one.
    fn cluster_put(&mut self, cluster: &Cluster) -> Result<(), EngineError>;

    fn cluster_get(&mut self, cluster_id: EntityId) -> Result<Option<Cluster>, EngineError>;

    /// The cluster together with its non-disabled hosts, matching the `Preload("Hosts", "status
    /// <> disabled")` call in the original system's `getCluster`.
    fn cluster_with_hosts(
        &mut self,
        cluster_id: EntityId,
    ) -> Result<Option<(Cluster, Vec<Host>)>, EngineError>;

    fn cluster_cas_update(
        &mut self,
        expected_status: ClusterStatus,
        cluster: &Cluster,
    ) -> Result<bool, EngineError>;

    fn clusters_scan_non_terminal(&mut self) -> Result<Vec<Cluster>, EngineError>;

    fn commit(self: Box<Self>) -> Result<(), EngineError>;
}

/// Opens `StoreTx`s. A `Store` is the only shared, cross-event state in the engine (SPEC_FULL.md
/// §5): everything else (lazily-decoded inventory, lazily-loaded cluster) lives only for the
/// duration of a single event.
pub trait Store: Send + Sync {
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>, EngineError>;
}

pub struct SqliteStore {
    conn: Mutex<sqlite::Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, EngineError> {
        let conn = sqlite::open(path.as_ref()).structured(StoreError::Open)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS hosts (
                id TEXT NOT NULL,
                cluster_id TEXT NOT NULL,
                status TEXT NOT NULL,
                contents TEXT NOT NULL,
                PRIMARY KEY (id, cluster_id)
            );
            CREATE INDEX IF NOT EXISTS hosts_status_idx ON hosts (status);
            CREATE TABLE IF NOT EXISTS clusters (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                contents TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS clusters_status_idx ON clusters (status);",
        )
        .structured(StoreError::Open)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, EngineError> {
        Self::open(":memory:")
    }
}

impl Store for SqliteStore {
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>, EngineError> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("sqlite connection mutex poisoned"))
            .structured(StoreError::BeginTransaction)?;
        guard
            .execute("BEGIN DEFERRED")
            .structured(StoreError::BeginTransaction)?;
        Ok(Box::new(SqliteTx {
            conn: guard,
            finished: false,
        }))
    }
}

struct SqliteTx<'a> {
    conn: std::sync::MutexGuard<'a, sqlite::Connection>,
    finished: bool,
}

impl SqliteTx<'_> {
    fn changes(&self) -> usize {
        self.conn.change_count()
    }

    fn load_host(row: &sqlite::Row) -> Result<Host, EngineError> {
        let contents: &str = row.read("contents");
        serde_json::from_str(contents).structured(StoreError::Deserialize)
    }

    fn load_cluster(row: &sqlite::Row) -> Result<Cluster, EngineError> {
        let contents: &str = row.read("contents");
        serde_json::from_str(contents).structured(StoreError::Deserialize)
    }
}

impl StoreTx for SqliteTx<'_> {
    fn host_get(&mut self, cluster_id: EntityId, host_id: EntityId) -> Result<Option<Host>, EngineError> {
        let mut stmt = self
            .conn
            .prepare("SELECT contents FROM hosts WHERE id = ? AND cluster_id = ?")
            .structured(StoreError::Read)?;
        stmt.bind((1, host_id.to_string().as_str()))
            .structured(StoreError::Read)?;
        stmt.bind((2, cluster_id.to_string().as_str()))
            .structured(StoreError::Read)?;
        match stmt.into_iter().next() {
            Some(row) => Ok(Some(Self::load_host(&row.structured(StoreError::Read)?)?)),
            None => Ok(None),
        }
    }

    fn host_put(&mut self, host: &Host) -> Result<(), EngineError> {
        let contents = serde_json::to_string(host).structured(StoreError::Serialize)?;
        let mut stmt = self
            .conn
            .prepare(
                "INSERT INTO hosts (id, cluster_id, status, contents) VALUES (?, ?, ?, ?)
                 ON CONFLICT(id, cluster_id) DO UPDATE SET status = excluded.status, contents = excluded.contents",
            )
            .structured(StoreError::Write)?;
        stmt.bind((1, host.id.to_string().as_str())).structured(StoreError::Write)?;
        stmt.bind((2, host.cluster_id.to_string().as_str())).structured(StoreError::Write)?;
        stmt.bind((3, host.status.to_string().as_str())).structured(StoreError::Write)?;
        stmt.bind((4, contents.as_str())).structured(StoreError::Write)?;
        stmt.next().structured(StoreError::Write)?;
        Ok(())
    }

    fn host_cas_update(&mut self, expected_status: HostStatus, host: &Host) -> Result<bool, EngineError> {
        let contents = serde_json::to_string(host).structured(StoreError::Serialize)?;
        let mut stmt = self
            .conn
            .prepare(
                "UPDATE hosts SET status = ?, contents = ?
                 WHERE id = ? AND cluster_id = ? AND status = ?",
            )
            .structured(StoreError::Write)?;
        stmt.bind((1, host.status.to_string().as_str())).structured(StoreError::Write)?;
        stmt.bind((2, contents.as_str())).structured(StoreError::Write)?;
        stmt.bind((3, host.id.to_string().as_str())).structured(StoreError::Write)?;
        stmt.bind((4, host.cluster_id.to_string().as_str())).structured(StoreError::Write)?;
        stmt.bind((5, expected_status.to_string().as_str())).structured(StoreError::Write)?;
        stmt.next().structured(StoreError::Write)?;
        Ok(self.changes() > 0)
    }

    fn hosts_scan(&mut self, statuses: &[HostStatus]) -> Result<Vec<Host>, EngineError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = statuses.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let query = format!("SELECT contents FROM hosts WHERE status IN ({placeholders})");
        let mut stmt = self.conn.prepare(query).structured(StoreError::Read)?;
        for (i, status) in statuses.iter().enumerate() {
            stmt.bind((i + 1, status.to_string().as_str())).structured(StoreError::Read)?;
        }
        stmt.into_iter()
            .map(|row| Self::load_host(&row.structured(StoreError::Read)?))
            .collect()
    }

    fn cluster_put(&mut self, cluster: &Cluster) -> Result<(), EngineError> {
        let contents = serde_json::to_string(cluster).structured(StoreError::Serialize)?;
        let mut stmt = self
            .conn
            .prepare(
                "INSERT INTO clusters (id, status, contents) VALUES (?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET status = excluded.status, contents = excluded.contents",
            )
            .structured(StoreError::Write)?;
        stmt.bind((1, cluster.id.to_string().as_str())).structured(StoreError::Write)?;
        stmt.bind((2, cluster.status.to_string().as_str())).structured(StoreError::Write)?;
        stmt.bind((3, contents.as_str())).structured(StoreError::Write)?;
        stmt.next().structured(StoreError::Write)?;
        Ok(())
    }

    fn cluster_get(&mut self, cluster_id: EntityId) -> Result<Option<Cluster>, EngineError> {
        let mut stmt = self
            .conn
            .prepare("SELECT contents FROM clusters WHERE id = ?")
            .structured(StoreError::Read)?;
        stmt.bind((1, cluster_id.to_string().as_str())).structured(StoreError::Read)?;
        match stmt.into_iter().next() {
            Some(row) => Ok(Some(Self::load_cluster(&row.structured(StoreError::Read)?)?)),
            None => Ok(None),
        }
    }

    fn cluster_with_hosts(
        &mut self,
        cluster_id: EntityId,
    ) -> Result<Option<(Cluster, Vec<Host>)>, EngineError> {
        let cluster = match self.cluster_get(cluster_id)? {
            Some(c) => c,
            None => return Ok(None),
        };
        let mut stmt = self
            .conn
            .prepare("SELECT contents FROM hosts WHERE cluster_id = ? AND status <> ?")
            .structured(StoreError::Read)?;
        stmt.bind((1, cluster_id.to_string().as_str())).structured(StoreError::Read)?;
        stmt.bind((2, HostStatus::Disabled.to_string().as_str()))
            .structured(StoreError::Read)?;
        let hosts = stmt
            .into_iter()
            .map(|row| Self::load_host(&row.structured(StoreError::Read)?))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some((cluster, hosts)))
    }

    fn cluster_cas_update(
        &mut self,
        expected_status: ClusterStatus,
        cluster: &Cluster,
    ) -> Result<bool, EngineError> {
        let contents = serde_json::to_string(cluster).structured(StoreError::Serialize)?;
        let mut stmt = self
            .conn
            .prepare("UPDATE clusters SET status = ?, contents = ? WHERE id = ? AND status = ?")
            .structured(StoreError::Write)?;
        stmt.bind((1, cluster.status.to_string().as_str())).structured(StoreError::Write)?;
        stmt.bind((2, contents.as_str())).structured(StoreError::Write)?;
        stmt.bind((3, cluster.id.to_string().as_str())).structured(StoreError::Write)?;
        stmt.bind((4, expected_status.to_string().as_str())).structured(StoreError::Write)?;
        stmt.next().structured(StoreError::Write)?;
        Ok(self.changes() > 0)
    }

    fn clusters_scan_non_terminal(&mut self) -> Result<Vec<Cluster>, EngineError> {
        let mut stmt = self
            .conn
            .prepare("SELECT contents FROM clusters WHERE status NOT IN (?, ?)")
            .structured(StoreError::Read)?;
        stmt.bind((1, ClusterStatus::Installed.to_string().as_str()))
            .structured(StoreError::Read)?;
        stmt.bind((2, ClusterStatus::Error.to_string().as_str()))
            .structured(StoreError::Read)?;
        stmt.into_iter()
            .map(|row| Self::load_cluster(&row.structured(StoreError::Read)?))
            .collect()
    }

    fn commit(mut self: Box<Self>) -> Result<(), EngineError> {
        self.conn.execute("COMMIT").structured(StoreError::CommitTransaction)?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for SqliteTx<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.conn.execute("ROLLBACK");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bm_api::model::{Host, HostProgress};
    use chrono::Utc;

    fn sample_host(cluster_id: EntityId) -> Host {
        Host {
            id: EntityId::new_v4(),
            cluster_id,
            status: HostStatus::Discovering,
            status_info: "discovering".into(),
            status_updated_at: Utc::now(),
            checked_in_at: None,
            role: None,
            requested_hostname: None,
            inventory: None,
            hardware_info: String::new(),
            progress: HostProgress::default(),
            discovery_agent_version: Some("v1.0.1".into()),
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = SqliteStore::open_in_memory().unwrap();
        let cluster_id = EntityId::new_v4();
        let host = sample_host(cluster_id);

        let mut tx = store.begin().unwrap();
        tx.host_put(&host).unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        let fetched = tx.host_get(cluster_id, host.id).unwrap().unwrap();
        assert_eq!(fetched.status, HostStatus::Discovering);
    }

    #[test]
    fn cas_update_fails_on_stale_expected_status() {
        let store = SqliteStore::open_in_memory().unwrap();
        let cluster_id = EntityId::new_v4();
        let mut host = sample_host(cluster_id);

        let mut tx = store.begin().unwrap();
        tx.host_put(&host).unwrap();
        tx.commit().unwrap();

        host.status = HostStatus::Known;
        let mut tx = store.begin().unwrap();
        // Wrong expected status: the row is still `discovering`.
        let applied = tx.host_cas_update(HostStatus::Known, &host).unwrap();
        tx.commit().unwrap();
        assert!(!applied);

        let mut tx = store.begin().unwrap();
        let applied = tx.host_cas_update(HostStatus::Discovering, &host).unwrap();
        tx.commit().unwrap();
        assert!(applied);
    }

    #[test]
    fn scan_filters_by_status() {
        let store = SqliteStore::open_in_memory().unwrap();
        let cluster_id = EntityId::new_v4();
        let mut tx = store.begin().unwrap();
        tx.host_put(&sample_host(cluster_id)).unwrap();
        let mut installed = sample_host(cluster_id);
        installed.status = HostStatus::Installed;
        tx.host_put(&installed).unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        let found = tx.hosts_scan(&[HostStatus::Discovering]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].status, HostStatus::Discovering);
    }

    #[test]
    fn rollback_on_drop_without_commit() {
        let store = SqliteStore::open_in_memory().unwrap();
        let cluster_id = EntityId::new_v4();
        let host = sample_host(cluster_id);
        {
            let mut tx = store.begin().unwrap();
            tx.host_put(&host).unwrap();
            // Dropped without commit: should roll back.
        }
        let mut tx = store.begin().unwrap();
        assert!(tx.host_get(cluster_id, host.id).unwrap().is_none());
    }
}
