//! Cluster-level transitions. Grounded on `internal/cluster/transition.go`: a much smaller
//! machine than the host's, four events against states that mostly exist to mark externally-driven
//! progress (`ready`, `adding-hosts`) around three engine-owned phases (preparing, installing,
//! finalizing) and the two outcomes (`installed`, `error`) plus an operator escape (`cancelled`).

use bm_api::{
    error::{ConflictError, EngineError},
    model::{Cluster, ClusterStatus},
};
use chrono::{DateTime, Utc};

pub enum ClusterOutcome {
    Apply(Cluster),
    NoOp,
}

fn illegal(event: &str, state: ClusterStatus) -> EngineError {
    EngineError::new(ConflictError::IllegalTransition {
        event: event.to_string(),
        state: state.to_string(),
    })
}

/// `PrepareForInstallation`: the cluster has enough known hosts and is ready to begin.
pub fn prepare_for_installation(cluster: &Cluster, now: DateTime<Utc>) -> Result<ClusterOutcome, EngineError> {
    match cluster.status {
        ClusterStatus::Ready => {
            let mut next = cluster.clone();
            next.status = ClusterStatus::PreparingForInstallation;
            next.status_info = "Preparing hosts for installation".to_string();
            next.status_updated_at = now;
            next.install_started_at = Some(now);
            Ok(ClusterOutcome::Apply(next))
        }
        other => Err(illegal("prepare-for-installation", other)),
    }
}

/// `CompleteInstallation`: the two rules with complementary `isSuccess`/`notSuccess` guards
/// collapse to one function taking the outcome directly.
pub fn complete_installation(
    cluster: &Cluster,
    success: bool,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<ClusterOutcome, EngineError> {
    match cluster.status {
        ClusterStatus::PreparingForInstallation | ClusterStatus::Installing | ClusterStatus::Finalizing => {
            let mut next = cluster.clone();
            next.status = if success { ClusterStatus::Installed } else { ClusterStatus::Error };
            next.status_info = reason.to_string();
            next.status_updated_at = now;
            next.install_completed_at = Some(now);
            Ok(ClusterOutcome::Apply(next))
        }
        other => Err(illegal("complete-installation", other)),
    }
}

/// `CancelInstallation`: preserves the first cause by no-opping once the cluster is already
/// `error`.
pub fn cancel_installation(cluster: &Cluster, reason: &str, now: DateTime<Utc>) -> Result<ClusterOutcome, EngineError> {
    match cluster.status {
        ClusterStatus::Error => Ok(ClusterOutcome::NoOp),
        ClusterStatus::PreparingForInstallation | ClusterStatus::Installing | ClusterStatus::Finalizing => {
            let mut next = cluster.clone();
            next.status = ClusterStatus::Cancelled;
            next.status_info = reason.to_string();
            next.status_updated_at = now;
            Ok(ClusterOutcome::Apply(next))
        }
        other => Err(illegal("cancel-installation", other)),
    }
}

/// `ResetCluster`: drop a failed or cancelled cluster back to `insufficient` so hosts can be
/// re-evaluated and a fresh `PrepareForInstallation` attempted later.
pub fn reset_cluster(cluster: &Cluster, reason: &str, now: DateTime<Utc>) -> Result<ClusterOutcome, EngineError> {
    match cluster.status {
        ClusterStatus::Error | ClusterStatus::Cancelled => {
            let mut next = cluster.clone();
            next.status = ClusterStatus::Insufficient;
            next.status_info = reason.to_string();
            next.status_updated_at = now;
            next.install_started_at = None;
            next.install_completed_at = None;
            Ok(ClusterOutcome::Apply(next))
        }
        other => Err(illegal("reset-cluster", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(status: ClusterStatus) -> Cluster {
        Cluster {
            id: uuid::Uuid::new_v4(),
            status,
            status_info: String::new(),
            status_updated_at: Utc::now(),
            machine_network_cidr: "10.0.0.0/24".to_string(),
            install_started_at: None,
            install_completed_at: None,
        }
    }

    #[test]
    fn prepare_for_installation_stamps_started_at() {
        let c = cluster(ClusterStatus::Ready);
        match prepare_for_installation(&c, Utc::now()).unwrap() {
            ClusterOutcome::Apply(next) => {
                assert_eq!(next.status, ClusterStatus::PreparingForInstallation);
                assert!(next.install_started_at.is_some());
            }
            ClusterOutcome::NoOp => panic!("expected Apply"),
        }
    }

    #[test]
    fn complete_installation_success_and_failure_routes() {
        let c = cluster(ClusterStatus::Finalizing);
        match complete_installation(&c, true, "done", Utc::now()).unwrap() {
            ClusterOutcome::Apply(next) => assert_eq!(next.status, ClusterStatus::Installed),
            ClusterOutcome::NoOp => panic!("expected Apply"),
        }
        match complete_installation(&c, false, "failed", Utc::now()).unwrap() {
            ClusterOutcome::Apply(next) => assert_eq!(next.status, ClusterStatus::Error),
            ClusterOutcome::NoOp => panic!("expected Apply"),
        }
    }

    #[test]
    fn cancel_installation_preserves_first_cause() {
        let errored = cluster(ClusterStatus::Error);
        match cancel_installation(&errored, "second reason", Utc::now()).unwrap() {
            ClusterOutcome::NoOp => {}
            ClusterOutcome::Apply(_) => panic!("expected NoOp"),
        }
    }

    #[test]
    fn reset_cluster_clears_install_timestamps() {
        let mut errored = cluster(ClusterStatus::Error);
        errored.install_started_at = Some(Utc::now());
        errored.install_completed_at = Some(Utc::now());
        match reset_cluster(&errored, "operator reset", Utc::now()).unwrap() {
            ClusterOutcome::Apply(next) => {
                assert_eq!(next.status, ClusterStatus::Insufficient);
                assert!(next.install_started_at.is_none());
                assert!(next.install_completed_at.is_none());
            }
            ClusterOutcome::NoOp => panic!("expected Apply"),
        }
    }
}
