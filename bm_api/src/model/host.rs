use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{is_default, EntityId};

/// A single host (physical machine) being prepared for installation into a cluster.
///
/// Mirrors the fields a surrounding REST layer would expose, minus anything generated from an
/// OpenAPI schema. The engine only ever mutates this struct through the transitions in
/// `crate::host` (actually implemented in the `bm-inventory` engine crate, not here) — `bm_api`
/// just defines the shape that gets persisted.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    pub id: EntityId,
    pub cluster_id: EntityId,

    pub status: HostStatus,

    /// Free-form explanation, or a JSON-serialized diagnostic map keyed by validation category
    /// when set by a failing Refresh rule.
    #[serde(default)]
    pub status_info: String,

    pub status_updated_at: DateTime<Utc>,

    /// Unset until the agent's first heartbeat; an unset value is treated as "connected" (see
    /// `IsConnected`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_in_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<HostRole>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_hostname: Option<String>,

    /// Opaque serialized hardware description, decoded on demand by the refresh guards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory: Option<String>,

    /// Legacy free-form blob, cleared on re-registration and on re-enable.
    #[serde(default, skip_serializing_if = "is_default")]
    pub hardware_info: String,

    #[serde(default)]
    pub progress: HostProgress,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_agent_version: Option<String>,
}

impl Host {
    /// The hostname used for uniqueness comparisons: the operator override if set, else the
    /// inventory-reported hostname.
    pub fn effective_hostname<'a>(&'a self, inventory: &'a Inventory) -> &'a str {
        match &self.requested_hostname {
            Some(name) if !name.is_empty() => name,
            _ => &inventory.hostname,
        }
    }
}

/// `ReconcileState` of a single host. See SPEC_FULL.md §4.1 for the full transition table.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, strum_macros::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum HostStatus {
    Discovering,
    Known,
    Disconnected,
    Insufficient,
    PendingForInput,
    Disabled,
    Installing,
    InstallingInProgress,
    InstallingPendingUserAction,
    Installed,
    Error,
    Resetting,
}

impl HostStatus {
    /// Terminal states never revisited by the monitor (see SPEC_FULL.md §4.4 / I6).
    pub fn is_terminal(self) -> bool {
        matches!(self, HostStatus::Installed | HostStatus::Error | HostStatus::Disabled)
    }

    /// States the periodic monitor dispatches `Refresh` against.
    pub fn is_monitored(self) -> bool {
        matches!(
            self,
            HostStatus::Discovering
                | HostStatus::Known
                | HostStatus::Disconnected
                | HostStatus::Insufficient
                | HostStatus::PendingForInput
        )
    }
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, strum_macros::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum HostRole {
    Master,
    Worker,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostProgress {
    #[serde(default)]
    pub current_stage: HostStage,
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum HostStage {
    #[default]
    Starting,
    WaitingForControlPlane,
    WritingImage,
    Rebooting,
    ConfiguringOs,
    Done,
    Failed,
}

/// Agent-reported hardware description. Stored on `Host::inventory` as a JSON string and decoded
/// lazily, once per event, by the refresh guards (see `bm-inventory::host::refresh`).
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Inventory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<Cpu>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Memory>,
    #[serde(default)]
    pub disks: Vec<Disk>,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
}

impl Inventory {
    /// All IP addresses reported across every network interface, used by `BelongsToMachineCIDR`.
    pub fn ip_addresses(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.interfaces.iter().flat_map(|i| i.ip_addresses.iter().copied())
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Cpu {
    pub count: u32,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub physical_bytes: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    pub id: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub is_removable: bool,
    #[serde(default)]
    pub is_read_only: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    pub name: String,
    #[serde(default)]
    pub ip_addresses: Vec<IpAddr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_hostname_prefers_requested_override() {
        let host = Host {
            id: EntityId::nil(),
            cluster_id: EntityId::nil(),
            status: HostStatus::Known,
            status_info: String::new(),
            status_updated_at: Utc::now(),
            checked_in_at: None,
            role: Some(HostRole::Master),
            requested_hostname: Some("operator-chosen".into()),
            inventory: None,
            hardware_info: String::new(),
            progress: HostProgress::default(),
            discovery_agent_version: None,
        };
        let inventory = Inventory {
            hostname: "agent-reported".into(),
            ..Default::default()
        };
        assert_eq!(host.effective_hostname(&inventory), "operator-chosen");
    }

    #[test]
    fn host_status_terminal_classification() {
        assert!(HostStatus::Installed.is_terminal());
        assert!(HostStatus::Error.is_terminal());
        assert!(HostStatus::Disabled.is_terminal());
        assert!(!HostStatus::Known.is_terminal());
        assert!(HostStatus::Known.is_monitored());
        assert!(!HostStatus::Installing.is_monitored());
    }
}
