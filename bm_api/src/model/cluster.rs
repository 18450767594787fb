use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::EntityId;

/// A cluster: a set of hosts sharing install configuration and a machine-network CIDR.
///
/// Cluster creation itself is out of scope for the engine (an external collaborator creates the
/// row); the engine only mutates `status`/`status_info`/`install_started_at`/`install_completed_at`
/// through the transitions in `bm-inventory::cluster`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub id: EntityId,

    pub status: ClusterStatus,

    #[serde(default)]
    pub status_info: String,

    pub status_updated_at: DateTime<Utc>,

    /// CIDR derived from the operator-supplied API/Ingress VIP configuration. Empty until set.
    #[serde(default)]
    pub machine_network_cidr: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_completed_at: Option<DateTime<Utc>>,
}

/// Cluster-level lifecycle state. See SPEC_FULL.md §4.2.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, strum_macros::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ClusterStatus {
    Insufficient,
    Ready,
    AddingHosts,
    PreparingForInstallation,
    Installing,
    Finalizing,
    Installed,
    Error,
    Cancelled,
}

impl ClusterStatus {
    /// Terminal states: no further engine-driven transition is expected.
    pub fn is_terminal(self) -> bool {
        matches!(self, ClusterStatus::Installed | ClusterStatus::Error)
    }
}
