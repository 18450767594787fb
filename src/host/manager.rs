//! `HostManager`: the façade operations (`RegisterHost`, `InstallHost`, ...) are exposed through.
//! Ties `fsm`/`refresh` (pure decision logic) to `Store` (persistence) and `EventSink`
//! (observability), and implements the transaction-plumbing rule from SPEC_FULL.md §5: when a
//! caller supplies its own transaction, reuse it and let the caller commit; otherwise open and
//! commit one locally. Mirrors `th.getDb(params)` in the original system's `TransitionHandler`.

use std::sync::Arc;

use bm_api::{
    error::{ConflictError, EngineError, NotFoundError},
    model::{Host, HostStatus},
    EntityId,
};
use chrono::Utc;

use crate::{
    config::EngineConfig,
    datastore::{Store, StoreTx},
    events::{EventSink, Severity, TransitionEvent},
};

use super::{ctx::HostCtx, fsm, fsm::HostOutcome, refresh};

pub struct HostManager {
    store: Arc<dyn Store>,
    events: Arc<dyn EventSink>,
    config: EngineConfig,
}

impl HostManager {
    pub fn new(store: Arc<dyn Store>, events: Arc<dyn EventSink>, config: EngineConfig) -> Self {
        HostManager { store, events, config }
    }

    fn with_tx<R>(
        &self,
        tx: Option<&mut dyn StoreTx>,
        f: impl FnOnce(&mut dyn StoreTx) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        match tx {
            Some(tx) => f(tx),
            None => {
                let mut owned = self.store.begin()?;
                let result = f(owned.as_mut())?;
                owned.commit()?;
                Ok(result)
            }
        }
    }

    fn emit(&self, host: &Host) {
        let severity = match host.status {
            HostStatus::Error => Severity::Error,
            HostStatus::Disconnected | HostStatus::Insufficient => Severity::Warning,
            _ => Severity::Info,
        };
        self.events.record(&TransitionEvent::new(
            host.id,
            severity,
            format!("host {} -> {}", host.id, host.status),
        ));
    }

    /// Persists `host`, guarded by `expected`. `monitor_driven` callers (the periodic sweep)
    /// treat a lost race as a harmless no-op; direct API callers get `Conflict::StaleTransition`.
    fn apply(
        &self,
        tx: &mut dyn StoreTx,
        expected: HostStatus,
        host: Host,
        monitor_driven: bool,
    ) -> Result<Option<Host>, EngineError> {
        let applied = tx.host_cas_update(expected, &host)?;
        if !applied {
            if monitor_driven {
                return Ok(None);
            }
            return Err(EngineError::new(ConflictError::StaleTransition {
                entity_id: host.id.to_string(),
            }));
        }
        self.emit(&host);
        Ok(Some(host))
    }

    pub fn register(
        &self,
        tx: Option<&mut dyn StoreTx>,
        cluster_id: EntityId,
        host_id: EntityId,
        discovery_agent_version: Option<String>,
    ) -> Result<Host, EngineError> {
        self.with_tx(tx, |tx| {
            let prior = tx.host_get(cluster_id, host_id)?;
            let now = Utc::now();
            match fsm::register(prior.as_ref(), host_id, cluster_id, discovery_agent_version, now)? {
                HostOutcome::Apply(host) => match prior {
                    None => {
                        tx.host_put(&host)?;
                        self.emit(&host);
                        Ok(host)
                    }
                    Some(prior) => self
                        .apply(tx, prior.status, host, false)?
                        .ok_or_else(|| unreachable_stale()),
                },
                HostOutcome::NoOp => unreachable!("register never resolves to a no-op"),
            }
        })
    }

    pub fn install(&self, tx: Option<&mut dyn StoreTx>, cluster_id: EntityId, host_id: EntityId) -> Result<Host, EngineError> {
        self.with_tx(tx, |tx| {
            let host = self.require_host(tx, cluster_id, host_id)?;
            let expected = host.status;
            match fsm::install(&host, Utc::now())? {
                HostOutcome::Apply(next) => {
                    self.apply(tx, expected, next, false)?.ok_or_else(|| unreachable_stale())
                }
                HostOutcome::NoOp => Ok(host),
            }
        })
    }

    pub fn disable(&self, tx: Option<&mut dyn StoreTx>, cluster_id: EntityId, host_id: EntityId) -> Result<Host, EngineError> {
        self.with_tx(tx, |tx| {
            let host = self.require_host(tx, cluster_id, host_id)?;
            let expected = host.status;
            match fsm::disable(&host, Utc::now())? {
                HostOutcome::Apply(next) => {
                    self.apply(tx, expected, next, false)?.ok_or_else(|| unreachable_stale())
                }
                HostOutcome::NoOp => Ok(host),
            }
        })
    }

    pub fn enable(&self, tx: Option<&mut dyn StoreTx>, cluster_id: EntityId, host_id: EntityId) -> Result<Host, EngineError> {
        self.with_tx(tx, |tx| {
            let host = self.require_host(tx, cluster_id, host_id)?;
            let expected = host.status;
            match fsm::enable(&host, Utc::now())? {
                HostOutcome::Apply(next) => {
                    self.apply(tx, expected, next, false)?.ok_or_else(|| unreachable_stale())
                }
                HostOutcome::NoOp => Ok(host),
            }
        })
    }

    pub fn cancel_installation(
        &self,
        tx: Option<&mut dyn StoreTx>,
        cluster_id: EntityId,
        host_id: EntityId,
        reason: &str,
    ) -> Result<Host, EngineError> {
        self.with_tx(tx, |tx| {
            let host = self.require_host(tx, cluster_id, host_id)?;
            let expected = host.status;
            match fsm::cancel_installation(&host, reason, Utc::now())? {
                HostOutcome::Apply(next) => {
                    self.apply(tx, expected, next, false)?.ok_or_else(|| unreachable_stale())
                }
                HostOutcome::NoOp => Ok(host),
            }
        })
    }

    pub fn reset_host(
        &self,
        tx: Option<&mut dyn StoreTx>,
        cluster_id: EntityId,
        host_id: EntityId,
        reason: &str,
    ) -> Result<Host, EngineError> {
        self.with_tx(tx, |tx| {
            let host = self.require_host(tx, cluster_id, host_id)?;
            let expected = host.status;
            match fsm::reset_host(&host, reason, Utc::now())? {
                HostOutcome::Apply(next) => {
                    self.apply(tx, expected, next, false)?.ok_or_else(|| unreachable_stale())
                }
                HostOutcome::NoOp => Ok(host),
            }
        })
    }

    pub fn host_installation_failed(
        &self,
        tx: Option<&mut dyn StoreTx>,
        cluster_id: EntityId,
        host_id: EntityId,
        reason: &str,
    ) -> Result<Host, EngineError> {
        self.with_tx(tx, |tx| {
            let host = self.require_host(tx, cluster_id, host_id)?;
            let expected = host.status;
            match fsm::host_installation_failed(&host, reason, Utc::now())? {
                HostOutcome::Apply(next) => {
                    self.apply(tx, expected, next, false)?.ok_or_else(|| unreachable_stale())
                }
                HostOutcome::NoOp => Ok(host),
            }
        })
    }

    /// `Refresh`. When `monitor_driven` is set (the periodic sweep calling this for every
    /// monitored host) a lost CAS race returns `Ok(None)` rather than an error: another event
    /// already moved the host, which is expected under concurrent monitoring, not a failure.
    pub fn refresh_status(
        &self,
        tx: Option<&mut dyn StoreTx>,
        cluster_id: EntityId,
        host_id: EntityId,
        monitor_driven: bool,
    ) -> Result<Option<Host>, EngineError> {
        self.with_tx(tx, |tx| {
            let host = self.require_host(tx, cluster_id, host_id)?;
            let ctx = HostCtx::new(host);
            let outcome = refresh::evaluate(
                &ctx,
                tx,
                &self.config.hardware,
                chrono::Duration::from_std(self.config.connection_staleness()).unwrap_or_else(|_| chrono::Duration::zero()),
                Utc::now(),
            )?;

            if outcome.status == ctx.host.status && outcome.status_info == ctx.host.status_info {
                return Ok(Some(ctx.host));
            }

            let mut next = ctx.host.clone();
            let expected = next.status;
            next.status = outcome.status;
            next.status_info = outcome.status_info;
            next.status_updated_at = Utc::now();
            self.apply(tx, expected, next, monitor_driven)
        })
    }

    fn require_host(&self, tx: &mut dyn StoreTx, cluster_id: EntityId, host_id: EntityId) -> Result<Host, EngineError> {
        tx.host_get(cluster_id, host_id)?.ok_or_else(|| {
            EngineError::new(NotFoundError::Host {
                host_id: host_id.to_string(),
                cluster_id: cluster_id.to_string(),
            })
        })
    }
}

#[track_caller]
fn unreachable_stale() -> EngineError {
    EngineError::new(bm_api::error::InternalError::Internal(
        "apply() reported a lost CAS race on a non-monitor-driven call",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::SqliteStore;
    use crate::events::TracingEventSink;
    use bm_api::model::{Cluster, ClusterStatus, HostRole};

    fn manager() -> (HostManager, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let manager = HostManager::new(store.clone(), Arc::new(TracingEventSink), EngineConfig::default());
        (manager, store)
    }

    fn seed_cluster(store: &SqliteStore, cidr: &str) -> EntityId {
        let id = EntityId::new_v4();
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

    #[test]
    fn register_fresh_host_creates_discovering_row() {
        let (manager, _store) = manager();
        let cluster_id = EntityId::new_v4();
        let host_id = EntityId::new_v4();
        let host = manager.register(None, cluster_id, host_id, Some("v1".into())).unwrap();
        assert_eq!(host.status, HostStatus::Discovering);
    }

    #[test]
    fn install_without_role_is_rejected() {
        let (manager, store) = manager();
        let cluster_id = seed_cluster(&store, "192.168.1.0/24");
        let host_id = EntityId::new_v4();
        manager.register(None, cluster_id, host_id, None).unwrap();

        let mut tx = store.begin().unwrap();
        let mut host = tx.host_get(cluster_id, host_id).unwrap().unwrap();
        host.status = HostStatus::Known;
        tx.host_cas_update(HostStatus::Discovering, &host).unwrap();
        tx.commit().unwrap();

        let err = manager.install(None, cluster_id, host_id).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn install_with_role_transitions_to_installing() {
        let (manager, store) = manager();
        let cluster_id = seed_cluster(&store, "192.168.1.0/24");
        let host_id = EntityId::new_v4();
        manager.register(None, cluster_id, host_id, None).unwrap();

        let mut tx = store.begin().unwrap();
        let mut host = tx.host_get(cluster_id, host_id).unwrap().unwrap();
        host.status = HostStatus::Known;
        host.role = Some(HostRole::Worker);
        tx.host_cas_update(HostStatus::Discovering, &host).unwrap();
        tx.commit().unwrap();

        let host = manager.install(None, cluster_id, host_id).unwrap();
        assert_eq!(host.status, HostStatus::Installing);
    }
}
