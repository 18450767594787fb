//! The `Refresh` event: a host re-evaluates its own readiness every time it's polled, moving
//! through `disconnected -> discovering -> insufficient -> pending-for-input -> known` (or back)
//! as its reported state changes. Grounded directly on the five `sm.AddTransition(..., Refresh,
//! ...)` rules in `internal/host/statemachine.go` and the validation groups those rules share in
//! `internal/statemachine/validations.go`.

use std::net::IpAddr;

use bm_api::{
    error::{ConflictError, EngineError, InventoryError},
    model::{Cluster, Host, HostRole, HostStatus, Inventory},
};
use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;

use crate::{
    config::HardwareThresholds,
    datastore::StoreTx,
    validation::{diagnostics_to_status_info, Validation, Validations},
};

use super::ctx::HostCtx;

/// Everything a refresh guard or printer needs, borrowed for the duration of one evaluation.
pub struct RefreshCtx<'a> {
    pub host: &'a Host,
    pub inventory: Option<&'a Inventory>,
    pub cluster: Option<&'a Cluster>,
    pub cluster_hosts: &'a [Host],
    pub thresholds: &'a HardwareThresholds,
    pub connection_staleness: chrono::Duration,
    pub now: DateTime<Utc>,
}

impl RefreshCtx<'_> {
    fn is_connected(&self) -> bool {
        match self.host.checked_in_at {
            None => true,
            Some(last) => self.now - last <= self.connection_staleness,
        }
    }

    fn role(&self) -> Option<HostRole> {
        self.host.role
    }

    fn min_ram(&self) -> u64 {
        match self.role() {
            Some(HostRole::Master) => {
                crate::config::gib_to_bytes(self.thresholds.min_ram_gib_master)
            }
            Some(HostRole::Worker) => {
                crate::config::gib_to_bytes(self.thresholds.min_ram_gib_worker)
            }
            None => self.thresholds.min_ram_gib_bytes(),
        }
    }

    fn min_cpu(&self) -> u32 {
        match self.role() {
            Some(HostRole::Master) => self.thresholds.min_cpu_cores_master,
            Some(HostRole::Worker) => self.thresholds.min_cpu_cores_worker,
            None => self.thresholds.min_cpu_cores,
        }
    }

    fn has_qualifying_disk(&self, inventory: &Inventory) -> bool {
        inventory
            .disks
            .iter()
            .any(|d| !d.is_removable && !d.is_read_only && d.size_bytes >= self.thresholds.min_disk_size_bytes())
    }
}

// `Validations<RefreshCtx<'a>>` can't be built once and reused across calls with different
// lifetimes, so each group is rebuilt per evaluation instead of cached statically.
fn min_required_hardware(ctx: &RefreshCtx) -> Result<Validations<RefreshCtx<'_>>, EngineError> {
    Ok(Validations::new(vec![
        Validation::new(
            "hardware",
            |c: &RefreshCtx| {
                let inventory = c.inventory.expect("hasInventory already confirmed Some");
                Ok(inventory.memory.map(|m| m.physical_bytes).unwrap_or(0) >= c.min_ram())
            },
            |c: &RefreshCtx| {
                let inventory = c.inventory.expect("hasInventory already confirmed Some");
                Ok(format!(
                    "Insufficient RAM requirements, expected: {} got: {}",
                    c.min_ram(),
                    inventory.memory.map(|m| m.physical_bytes).unwrap_or(0)
                ))
            },
        ),
        Validation::new(
            "hardware",
            |c: &RefreshCtx| {
                let inventory = c.inventory.expect("hasInventory already confirmed Some");
                Ok(c.has_qualifying_disk(inventory))
            },
            |c: &RefreshCtx| {
                Ok(format!(
                    "Insufficient number of disks with required size, expected at least 1 not removable, not readonly disk of size more than {} bytes",
                    c.thresholds.min_disk_size_bytes()
                ))
            },
        ),
        Validation::new(
            "hardware",
            |c: &RefreshCtx| {
                let inventory = c.inventory.expect("hasInventory already confirmed Some");
                Ok(inventory.cpu.map(|cpu| cpu.count).unwrap_or(0) >= c.min_cpu())
            },
            |c: &RefreshCtx| {
                let inventory = c.inventory.expect("hasInventory already confirmed Some");
                Ok(format!(
                    "Insufficient CPU cores, expected: {} got: {}",
                    c.min_cpu(),
                    inventory.cpu.map(|cpu| cpu.count).unwrap_or(0)
                ))
            },
        ),
    ]))
}

/// Group 2: whatever a host needs from its cluster and its operator before it can receive a role.
fn sufficient_input(_ctx: &RefreshCtx) -> Result<Validations<RefreshCtx<'_>>, EngineError> {
    Ok(Validations::new(vec![
        Validation::new(
            "network",
            |c: &RefreshCtx| Ok(c.cluster.is_some_and(|cl| !cl.machine_network_cidr.is_empty())),
            |_| {
                Ok("Machine network CIDR for cluster is missing, The machine network is set by \
                    configuring the API-VIP or Ingress-VIP"
                    .to_string())
            },
        ),
        Validation::new(
            "role",
            |c: &RefreshCtx| Ok(c.host.role.is_some()),
            |_| Ok("Role is not defined".to_string()),
        ),
    ]))
}

/// Group 3: everything required to actually begin an install, evaluated only once group 1 and 2
/// already pass. Re-checks the role-scaled hardware floors, plus network membership and hostname
/// uniqueness within the cluster.
fn sufficient_for_install_group(ctx: &RefreshCtx) -> Result<Validations<RefreshCtx<'_>>, EngineError> {
    let mut members = min_required_hardware(ctx)?;
    members.extend(Validations::new(vec![
        Validation::new(
            "network",
            |c: &RefreshCtx| {
                let inventory = c.inventory.expect("hasInventory already confirmed Some");
                let cidr = match c.cluster {
                    Some(cl) if !cl.machine_network_cidr.is_empty() => &cl.machine_network_cidr,
                    _ => return Ok(false),
                };
                let network: IpNetwork = cidr.parse().map_err(|_| {
                    EngineError::new(InventoryError::Decode {
                        host_id: c.host.id.to_string(),
                        reason: format!("cluster machine network cidr '{cidr}' is not valid"),
                    })
                })?;
                Ok(belongs_to_network(&network, inventory))
            },
            |c: &RefreshCtx| {
                let cidr = c.cluster.map(|cl| cl.machine_network_cidr.as_str()).unwrap_or("");
                Ok(format!(
                    "Host does not belong to the machine network cidr {cidr}.  The machine \
                     network is set by configuring the API-VIP or Ingress-VIP"
                ))
            },
        ),
        Validation::new(
            "hardware",
            |c: &RefreshCtx| {
                let inventory = c.inventory.expect("hasInventory already confirmed Some");
                let name = c.host.effective_hostname(inventory);
                Ok(!c.cluster_hosts.iter().any(|other| {
                    other.id != c.host.id
                        && other
                            .inventory
                            .as_deref()
                            .and_then(|raw| serde_json::from_str::<Inventory>(raw).ok())
                            .map(|other_inventory| other.effective_hostname(&other_inventory) == name)
                            .unwrap_or(false)
                }))
            },
            |c: &RefreshCtx| {
                let inventory = c.inventory.expect("hasInventory already confirmed Some");
                let name = c.host.effective_hostname(inventory);
                Ok(format!("Hostname {name} is not unique in cluster"))
            },
        ),
    ]));
    Ok(members)
}

fn belongs_to_network(network: &IpNetwork, inventory: &Inventory) -> bool {
    inventory.ip_addresses().any(|addr| network_contains(network, addr))
}

fn network_contains(network: &IpNetwork, addr: IpAddr) -> bool {
    match (network, addr) {
        (IpNetwork::V4(n), IpAddr::V4(a)) => n.contains(a),
        (IpNetwork::V6(n), IpAddr::V6(a)) => n.contains(a),
        _ => false,
    }
}

/// Outcome of evaluating the six refresh rules: the new status plus the `status_info` to persist.
pub struct RefreshOutcome {
    pub status: HostStatus,
    pub status_info: String,
}

/// States the monitor (or an explicit `RefreshStatus` call) may dispatch a `Refresh` from. A
/// status outside this set has no matching rule and the event is illegal.
const REFRESH_ELIGIBLE: &[HostStatus] = &[
    HostStatus::Discovering,
    HostStatus::Known,
    HostStatus::Disconnected,
    HostStatus::Insufficient,
    HostStatus::PendingForInput,
];

pub fn evaluate(
    ctx: &HostCtx,
    tx: &mut dyn StoreTx,
    thresholds: &HardwareThresholds,
    connection_staleness: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<RefreshOutcome, EngineError> {
    if !REFRESH_ELIGIBLE.contains(&ctx.host.status) {
        return Err(EngineError::new(ConflictError::IllegalTransition {
            event: "refresh".to_string(),
            state: ctx.host.status.to_string(),
        }));
    }

    let inventory = ctx.inventory()?;

    // Resolve the cluster lazily, and only once: every rule past the connectivity check needs it.
    let (cluster, cluster_hosts) = match ctx.cluster(tx) {
        Ok((cluster, hosts)) => (Some(cluster), hosts.as_slice()),
        Err(e) if e.is_not_found() => (None, &[][..]),
        Err(e) => return Err(e),
    };

    let refresh_ctx = RefreshCtx {
        host: &ctx.host,
        inventory,
        cluster,
        cluster_hosts,
        thresholds,
        connection_staleness,
        now,
    };

    // Rule 1: connectivity gates everything else.
    if !refresh_ctx.is_connected() {
        return Ok(RefreshOutcome {
            status: HostStatus::Disconnected,
            status_info: "disconnected".to_string(),
        });
    }

    // Rule 2: no inventory yet.
    let inventory = match inventory {
        Some(inventory) => inventory,
        None => {
            return Ok(RefreshOutcome {
                status: HostStatus::Discovering,
                status_info: "discovering".to_string(),
            })
        }
    };
    if inventory.cpu.is_none() || inventory.memory.is_none() {
        return Err(EngineError::new(InventoryError::Incomplete {
            host_id: ctx.host.id.to_string(),
        }));
    }

    // Rule 3: floor hardware.
    let hw_validations = min_required_hardware(&refresh_ctx)?;
    if !hw_validations.all_pass(&refresh_ctx)? {
        let diagnostics = hw_validations.diagnostics(&refresh_ctx)?;
        return Ok(RefreshOutcome {
            status: HostStatus::Insufficient,
            status_info: diagnostics_to_status_info(&diagnostics)?,
        });
    }

    // Rule 4: cluster/operator input.
    let input_validations = sufficient_input(&refresh_ctx)?;
    if !input_validations.all_pass(&refresh_ctx)? {
        let diagnostics = input_validations.diagnostics(&refresh_ctx)?;
        return Ok(RefreshOutcome {
            status: HostStatus::PendingForInput,
            status_info: diagnostics_to_status_info(&diagnostics)?,
        });
    }

    // Rule 5/6: install readiness.
    let install_validations = sufficient_for_install_group(&refresh_ctx)?;
    if !install_validations.all_pass(&refresh_ctx)? {
        let diagnostics = install_validations.diagnostics(&refresh_ctx)?;
        return Ok(RefreshOutcome {
            status: HostStatus::Insufficient,
            status_info: diagnostics_to_status_info(&diagnostics)?,
        });
    }

    Ok(RefreshOutcome {
        status: HostStatus::Known,
        status_info: String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bm_api::model::{Cpu, Disk, HostProgress, Interface, Memory};

    fn thresholds() -> HardwareThresholds {
        HardwareThresholds {
            min_ram_gib: 4,
            min_ram_gib_master: 16,
            min_ram_gib_worker: 8,
            min_cpu_cores: 2,
            min_cpu_cores_master: 4,
            min_cpu_cores_worker: 2,
            min_disk_size_gib: 20,
        }
    }

    fn host(status: HostStatus) -> Host {
        Host {
            id: uuid::Uuid::new_v4(),
            cluster_id: uuid::Uuid::new_v4(),
            status,
            status_info: String::new(),
            status_updated_at: Utc::now(),
            checked_in_at: None,
            role: None,
            requested_hostname: None,
            inventory: None,
            hardware_info: String::new(),
            progress: HostProgress::default(),
            discovery_agent_version: None,
        }
    }

    fn good_inventory() -> Inventory {
        Inventory {
            cpu: Some(Cpu { count: 8 }),
            memory: Some(Memory {
                physical_bytes: 32 * 1024 * 1024 * 1024,
            }),
            disks: vec![Disk {
                id: "sda".into(),
                size_bytes: 100 * 1024 * 1024 * 1024,
                is_removable: false,
                is_read_only: false,
            }],
            hostname: "node1".into(),
            interfaces: vec![Interface {
                name: "eth0".into(),
                ip_addresses: vec!["192.168.1.10".parse().unwrap()],
            }],
        }
    }

    #[test]
    fn missing_checked_in_at_counts_as_connected() {
        let thresholds = thresholds();
        let ctx = RefreshCtx {
            host: &host(HostStatus::Discovering),
            inventory: None,
            cluster: None,
            cluster_hosts: &[],
            thresholds: &thresholds,
            connection_staleness: chrono::Duration::seconds(180),
            now: Utc::now(),
        };
        assert!(ctx.is_connected());
    }

    #[test]
    fn stale_checked_in_at_counts_as_disconnected() {
        let thresholds = thresholds();
        let mut h = host(HostStatus::Known);
        h.checked_in_at = Some(Utc::now() - chrono::Duration::seconds(600));
        let ctx = RefreshCtx {
            host: &h,
            inventory: None,
            cluster: None,
            cluster_hosts: &[],
            thresholds: &thresholds,
            connection_staleness: chrono::Duration::seconds(180),
            now: Utc::now(),
        };
        assert!(!ctx.is_connected());
    }

    #[test]
    fn min_hardware_validation_reports_ram_and_cpu() {
        let thresholds = thresholds();
        let mut inventory = good_inventory();
        inventory.cpu = Some(Cpu { count: 1 });
        inventory.memory = Some(Memory { physical_bytes: 1024 });
        let h = host(HostStatus::Discovering);
        let ctx = RefreshCtx {
            host: &h,
            inventory: Some(&inventory),
            cluster: None,
            cluster_hosts: &[],
            thresholds: &thresholds,
            connection_staleness: chrono::Duration::seconds(180),
            now: Utc::now(),
        };
        let validations = min_required_hardware(&ctx).unwrap();
        let diagnostics = validations.diagnostics(&ctx).unwrap();
        assert!(diagnostics["hardware"].iter().any(|m| m.contains("RAM")));
        assert!(diagnostics["hardware"].iter().any(|m| m.contains("CPU")));
    }

    #[test]
    fn hostname_uniqueness_flags_collision() {
        let thresholds = thresholds();
        let inventory = good_inventory();
        let mut h = host(HostStatus::Known);
        h.requested_hostname = Some("node1".to_string());
        let mut other = host(HostStatus::Known);
        other.inventory = Some(serde_json::to_string(&good_inventory()).unwrap());
        let ctx = RefreshCtx {
            host: &h,
            inventory: Some(&inventory),
            cluster: None,
            cluster_hosts: std::slice::from_ref(&other),
            thresholds: &thresholds,
            connection_staleness: chrono::Duration::seconds(180),
            now: Utc::now(),
        };
        let validations = sufficient_for_install_group(&ctx).unwrap();
        let diagnostics = validations.diagnostics(&ctx).unwrap();
        assert!(diagnostics["hardware"].iter().any(|m| m.contains("node1 is not unique in cluster")));
    }
}
