//! `ClusterManager`: the same façade pattern as `HostManager`, but over the much smaller cluster
//! machine. Kept in its own module per SPEC_FULL.md's engine/cluster split (§4.2) rather than
//! folded into `HostManager`, mirroring how the host and cluster domains are kept in separate
//! files upstream.

use std::sync::Arc;

use bm_api::{
    error::{ConflictError, EngineError, NotFoundError},
    model::Cluster,
    EntityId,
};
use chrono::Utc;

use crate::{
    datastore::{Store, StoreTx},
    events::{EventSink, Severity, TransitionEvent},
};

use super::fsm::{self, ClusterOutcome};

pub struct ClusterManager {
    store: Arc<dyn Store>,
    events: Arc<dyn EventSink>,
}

impl ClusterManager {
    pub fn new(store: Arc<dyn Store>, events: Arc<dyn EventSink>) -> Self {
        ClusterManager { store, events }
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

    fn require_cluster(&self, tx: &mut dyn StoreTx, cluster_id: EntityId) -> Result<Cluster, EngineError> {
        tx.cluster_get(cluster_id)?.ok_or_else(|| {
            EngineError::new(NotFoundError::Cluster {
                cluster_id: cluster_id.to_string(),
            })
        })
    }

    fn emit(&self, cluster: &Cluster) {
        self.events.record(&TransitionEvent::new(
            cluster.id,
            Severity::Info,
            format!("cluster {} -> {}", cluster.id, cluster.status),
        ));
    }

    fn persist(&self, tx: &mut dyn StoreTx, expected: bm_api::model::ClusterStatus, cluster: Cluster) -> Result<Cluster, EngineError> {
        let applied = tx.cluster_cas_update(expected, &cluster)?;
        if !applied {
            return Err(EngineError::new(ConflictError::StaleTransition {
                entity_id: cluster.id.to_string(),
            }));
        }
        self.emit(&cluster);
        Ok(cluster)
    }

    pub fn prepare_for_installation(&self, tx: Option<&mut dyn StoreTx>, cluster_id: EntityId) -> Result<Cluster, EngineError> {
        self.with_tx(tx, |tx| {
            let cluster = self.require_cluster(tx, cluster_id)?;
            let expected = cluster.status;
            match fsm::prepare_for_installation(&cluster, Utc::now())? {
                ClusterOutcome::Apply(next) => self.persist(tx, expected, next),
                ClusterOutcome::NoOp => Ok(cluster),
            }
        })
    }

    pub fn complete_installation(
        &self,
        tx: Option<&mut dyn StoreTx>,
        cluster_id: EntityId,
        success: bool,
        reason: &str,
    ) -> Result<Cluster, EngineError> {
        self.with_tx(tx, |tx| {
            let cluster = self.require_cluster(tx, cluster_id)?;
            let expected = cluster.status;
            match fsm::complete_installation(&cluster, success, reason, Utc::now())? {
                ClusterOutcome::Apply(next) => self.persist(tx, expected, next),
                ClusterOutcome::NoOp => Ok(cluster),
            }
        })
    }

    pub fn cancel_installation(&self, tx: Option<&mut dyn StoreTx>, cluster_id: EntityId, reason: &str) -> Result<Cluster, EngineError> {
        self.with_tx(tx, |tx| {
            let cluster = self.require_cluster(tx, cluster_id)?;
            let expected = cluster.status;
            match fsm::cancel_installation(&cluster, reason, Utc::now())? {
                ClusterOutcome::Apply(next) => self.persist(tx, expected, next),
                ClusterOutcome::NoOp => Ok(cluster),
            }
        })
    }

    pub fn reset_cluster(&self, tx: Option<&mut dyn StoreTx>, cluster_id: EntityId, reason: &str) -> Result<Cluster, EngineError> {
        self.with_tx(tx, |tx| {
            let cluster = self.require_cluster(tx, cluster_id)?;
            let expected = cluster.status;
            match fsm::reset_cluster(&cluster, reason, Utc::now())? {
                ClusterOutcome::Apply(next) => self.persist(tx, expected, next),
                ClusterOutcome::NoOp => Ok(cluster),
            }
        })
    }
}
