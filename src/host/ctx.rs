//! Per-event context around a single host. Holds a lazily-decoded inventory and a lazily-loaded
//! cluster (with its non-disabled sibling hosts), exactly the "stateHost" wrapper the original
//! system keeps around each entity during a transition — except here its lifetime is explicitly
//! tied to the single event being processed (SPEC_FULL.md §9, "Lazy references").

use std::cell::OnceCell;

use bm_api::{
    error::{EngineError, InventoryError, NotFoundError, ReportError},
    model::{Cluster, Host, Inventory},
};

use crate::datastore::StoreTx;

pub struct HostCtx {
    pub host: Host,
    inventory: OnceCell<Option<Inventory>>,
    cluster: OnceCell<(Cluster, Vec<Host>)>,
}

impl HostCtx {
    pub fn new(host: Host) -> Self {
        HostCtx {
            host,
            inventory: OnceCell::new(),
            cluster: OnceCell::new(),
        }
    }

    /// Decodes `host.inventory` on first access. `Ok(None)` means no inventory has been reported
    /// yet (not an error); `Err` means the reported inventory is present but malformed.
    pub fn inventory(&self) -> Result<Option<&Inventory>, EngineError> {
        if self.inventory.get().is_none() {
            let decoded = match self.host.inventory.as_deref() {
                None | Some("") => None,
                Some(raw) => {
                    let inventory: Inventory = serde_json::from_str(raw).structured(
                        InventoryError::Decode {
                            host_id: self.host.id.to_string(),
                            reason: "invalid JSON".to_string(),
                        },
                    )?;
                    Some(inventory)
                }
            };
            let _ = self.inventory.set(decoded);
        }
        Ok(self.inventory.get().unwrap().as_ref())
    }

    /// Fetches (and caches) the owning cluster and its non-disabled hosts. Every guard that
    /// needs cluster context (machine CIDR, hostname uniqueness) goes through this, so a single
    /// Refresh only ever issues one cluster read regardless of how many guards run.
    pub fn cluster(&self, tx: &mut dyn StoreTx) -> Result<&(Cluster, Vec<Host>), EngineError> {
        if self.cluster.get().is_none() {
            let loaded = tx.cluster_with_hosts(self.host.cluster_id)?.ok_or_else(|| {
                EngineError::new(NotFoundError::Cluster {
                    cluster_id: self.host.cluster_id.to_string(),
                })
            })?;
            let _ = self.cluster.set(loaded);
        }
        Ok(self.cluster.get().unwrap())
    }
}
