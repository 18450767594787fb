//! Command-line surface: a thin operator tool wrapping the engine, in the same shape as this
//! codebase's own `Args`/`SubCommand` split (`src/cli.rs` upstream) — global config/verbosity
//! flags plus one subcommand per engine operation.

use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(version, about = "Bare-metal host and cluster lifecycle engine")]
pub struct Args {
    #[clap(global = true, short, long)]
    pub config: Option<String>,

    #[clap(global = true, short, long)]
    pub verbose: bool,

    #[clap(global = true, long, default_value = "bm-inventory.db")]
    pub db: String,

    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Subcommand, Debug)]
pub enum SubCommand {
    /// Run the monitor loop until interrupted.
    Serve,

    /// Register (or re-register) a host.
    RegisterHost {
        cluster_id: Uuid,
        host_id: Uuid,
        #[clap(long)]
        discovery_agent_version: Option<String>,
    },

    /// Begin installation of a known host with a role assigned.
    InstallHost { cluster_id: Uuid, host_id: Uuid },

    DisableHost { cluster_id: Uuid, host_id: Uuid },
    EnableHost { cluster_id: Uuid, host_id: Uuid },

    CancelInstallation {
        cluster_id: Uuid,
        host_id: Uuid,
        #[clap(long, default_value = "cancelled by operator")]
        reason: String,
    },

    ResetHost {
        cluster_id: Uuid,
        host_id: Uuid,
        #[clap(long, default_value = "reset by operator")]
        reason: String,
    },

    /// Force an immediate Refresh for one host, bypassing the monitor's cadence.
    RefreshHost { cluster_id: Uuid, host_id: Uuid },

    PrepareClusterForInstallation { cluster_id: Uuid },

    CancelClusterInstallation {
        cluster_id: Uuid,
        #[clap(long, default_value = "cancelled by operator")]
        reason: String,
    },

    ResetCluster {
        cluster_id: Uuid,
        #[clap(long, default_value = "reset by operator")]
        reason: String,
    },
}
