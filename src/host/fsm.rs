//! The seven host events that aren't `Refresh`: register, install, disable, enable, cancel, reset,
//! and the agent reporting an installation failure. Grounded on the remaining `sm.AddTransition`
//! calls in `internal/host/statemachine.go` and the post-conditions in `internal/host/transition.go`.
//!
//! Each function is pure: it takes the current host plus whatever the event carries and returns
//! the new host to persist, or `NoOp` when the event is a harmless retry that shouldn't touch the
//! store, or an error when the event isn't legal from the current state.

use bm_api::{
    error::{ConflictError, EngineError},
    model::{Host, HostRole, HostStage, HostStatus},
};
use chrono::{DateTime, Utc};

/// What a transition function decided to do with the host it was given.
pub enum HostOutcome {
    /// Persist this host (its `status` differs, or its contents changed even if the status
    /// didn't — e.g. a hostname update alongside an unchanged status).
    Apply(Host),
    /// The event was legal but there's nothing to write (e.g. disabling an already-disabled
    /// host, or cancelling an installation that already failed).
    NoOp,
}

fn illegal(event: &str, state: HostStatus) -> EngineError {
    EngineError::new(ConflictError::IllegalTransition {
        event: event.to_string(),
        state: state.to_string(),
    })
}

const REGISTERABLE_FRESH: &[HostStatus] = &[
    HostStatus::Discovering,
    HostStatus::Known,
    HostStatus::Disconnected,
    HostStatus::Insufficient,
    HostStatus::Resetting,
];

/// `RegisterHost`. `prior` is `None` when no row exists yet for this host id.
pub fn register(
    prior: Option<&Host>,
    host_id: bm_api::EntityId,
    cluster_id: bm_api::EntityId,
    discovery_agent_version: Option<String>,
    now: DateTime<Utc>,
) -> Result<HostOutcome, EngineError> {
    let prior = match prior {
        None => {
            return Ok(HostOutcome::Apply(Host {
                id: host_id,
                cluster_id,
                status: HostStatus::Discovering,
                status_info: "discovering".to_string(),
                status_updated_at: now,
                checked_in_at: Some(now),
                role: None,
                requested_hostname: None,
                inventory: None,
                hardware_info: String::new(),
                progress: Default::default(),
                discovery_agent_version,
            }))
        }
        Some(prior) => prior,
    };

    if REGISTERABLE_FRESH.contains(&prior.status) {
        let mut host = prior.clone();
        host.status = HostStatus::Discovering;
        host.status_info = "discovering".to_string();
        host.status_updated_at = now;
        host.checked_in_at = Some(now);
        host.inventory = None;
        host.hardware_info.clear();
        host.discovery_agent_version = discovery_agent_version;
        return Ok(HostOutcome::Apply(host));
    }

    if prior.status == HostStatus::InstallingInProgress && prior.progress.current_stage == HostStage::Rebooting {
        let mut host = prior.clone();
        host.status = HostStatus::InstallingPendingUserAction;
        host.status_info = "booted the installation image; fix boot order".to_string();
        host.status_updated_at = now;
        host.checked_in_at = Some(now);
        return Ok(HostOutcome::Apply(host));
    }

    if matches!(prior.status, HostStatus::Installing | HostStatus::InstallingInProgress) {
        let mut host = prior.clone();
        host.status = HostStatus::Error;
        host.status_info = "unexpectedly restarted during installation".to_string();
        host.status_updated_at = now;
        host.checked_in_at = Some(now);
        return Ok(HostOutcome::Apply(host));
    }

    Err(illegal("register", prior.status))
}

/// `InstallHost`: moves a ready host into the installation pipeline.
pub fn install(host: &Host, now: DateTime<Utc>) -> Result<HostOutcome, EngineError> {
    match host.status {
        HostStatus::Known => {
            match host.role {
                Some(HostRole::Master) | Some(HostRole::Worker) => {}
                Some(other) => {
                    return Err(EngineError::new(ConflictError::InvalidRole {
                        host_id: host.id.to_string(),
                        role: other.to_string(),
                    }))
                }
                None => {
                    return Err(EngineError::new(ConflictError::InvalidRole {
                        host_id: host.id.to_string(),
                        role: "none".to_string(),
                    }))
                }
            }
            let mut next = host.clone();
            next.status = HostStatus::Installing;
            next.status_info = "installing".to_string();
            next.status_updated_at = now;
            Ok(HostOutcome::Apply(next))
        }
        HostStatus::Disabled => Ok(HostOutcome::NoOp),
        other => Err(illegal("install", other)),
    }
}

/// `DisableHost`: operator opt-out, pulling a host out of monitoring entirely.
pub fn disable(host: &Host, now: DateTime<Utc>) -> Result<HostOutcome, EngineError> {
    match host.status {
        HostStatus::Disconnected
        | HostStatus::Discovering
        | HostStatus::Insufficient
        | HostStatus::Known
        | HostStatus::PendingForInput => {
            let mut next = host.clone();
            next.status = HostStatus::Disabled;
            next.status_info = "disabled".to_string();
            next.status_updated_at = now;
            Ok(HostOutcome::Apply(next))
        }
        other => Err(illegal("disable", other)),
    }
}

/// `EnableHost`: the reverse of `disable`, dropping a host back into discovery.
pub fn enable(host: &Host, now: DateTime<Utc>) -> Result<HostOutcome, EngineError> {
    match host.status {
        HostStatus::Disabled => {
            let mut next = host.clone();
            next.status = HostStatus::Discovering;
            next.status_info = "discovering".to_string();
            next.status_updated_at = now;
            next.hardware_info.clear();
            Ok(HostOutcome::Apply(next))
        }
        other => Err(illegal("enable", other)),
    }
}

/// `CancelInstallation`: abort an in-progress install, e.g. because the owning cluster was
/// cancelled.
pub fn cancel_installation(host: &Host, reason: &str, now: DateTime<Utc>) -> Result<HostOutcome, EngineError> {
    match host.status {
        HostStatus::Error => Ok(HostOutcome::NoOp),
        HostStatus::Installing | HostStatus::InstallingInProgress | HostStatus::InstallingPendingUserAction => {
            let mut next = host.clone();
            next.status = HostStatus::Error;
            next.status_info = reason.to_string();
            next.status_updated_at = now;
            Ok(HostOutcome::Apply(next))
        }
        other => Err(illegal("cancel-installation", other)),
    }
}

/// `ResetHost`: an operator explicitly asks a failed host to go back through discovery.
pub fn reset_host(host: &Host, reason: &str, now: DateTime<Utc>) -> Result<HostOutcome, EngineError> {
    match host.status {
        HostStatus::Error => {
            let mut next = host.clone();
            next.status = HostStatus::Resetting;
            next.status_info = reason.to_string();
            next.status_updated_at = now;
            Ok(HostOutcome::Apply(next))
        }
        other => Err(illegal("reset", other)),
    }
}

/// `HostInstallationFailed`: the agent itself reports it could not complete the install.
pub fn host_installation_failed(host: &Host, reason: &str, now: DateTime<Utc>) -> Result<HostOutcome, EngineError> {
    match host.status {
        HostStatus::Installing | HostStatus::InstallingInProgress | HostStatus::InstallingPendingUserAction => {
            let mut next = host.clone();
            next.status = HostStatus::Error;
            next.status_info = reason.to_string();
            next.status_updated_at = now;
            Ok(HostOutcome::Apply(next))
        }
        other => Err(illegal("installation-failed", other)),
    }
}
