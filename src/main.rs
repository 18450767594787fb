mod cli;

use std::sync::Arc;

use bm_inventory::{
    cluster::ClusterManager,
    datastore::SqliteStore,
    events::TracingEventSink,
    host::HostManager,
    monitor::Monitor,
    EngineConfig,
};
use clap::Parser;
use cli::SubCommand;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::Args::parse();

    env_logger::Builder::new()
        .filter_level(if args.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info })
        .init();
    tracing_subscriber::fmt().json().init();

    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    let store: Arc<dyn bm_inventory::datastore::Store> = Arc::new(SqliteStore::open(&args.db)?);
    let events = Arc::new(TracingEventSink);
    let hosts = Arc::new(HostManager::new(store.clone(), events.clone(), config.clone()));
    let clusters = Arc::new(ClusterManager::new(store.clone(), events.clone()));

    match args.subcmd {
        SubCommand::Serve => {
            log::info!("starting monitor, period {:?}", config.monitor_period());
            let monitor = Monitor::new(store, hosts, config.monitor_period());
            let (tx, rx) = tokio::sync::watch::channel(false);
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                let _ = tx.send(true);
            });
            monitor.run(rx).await;
        }
        SubCommand::RegisterHost { cluster_id, host_id, discovery_agent_version } => {
            let host = hosts.register(None, cluster_id, host_id, discovery_agent_version)?;
            println!("{}", serde_json::to_string_pretty(&host)?);
        }
        SubCommand::InstallHost { cluster_id, host_id } => {
            let host = hosts.install(None, cluster_id, host_id)?;
            println!("{}", serde_json::to_string_pretty(&host)?);
        }
        SubCommand::DisableHost { cluster_id, host_id } => {
            let host = hosts.disable(None, cluster_id, host_id)?;
            println!("{}", serde_json::to_string_pretty(&host)?);
        }
        SubCommand::EnableHost { cluster_id, host_id } => {
            let host = hosts.enable(None, cluster_id, host_id)?;
            println!("{}", serde_json::to_string_pretty(&host)?);
        }
        SubCommand::CancelInstallation { cluster_id, host_id, reason } => {
            let host = hosts.cancel_installation(None, cluster_id, host_id, &reason)?;
            println!("{}", serde_json::to_string_pretty(&host)?);
        }
        SubCommand::ResetHost { cluster_id, host_id, reason } => {
            let host = hosts.reset_host(None, cluster_id, host_id, &reason)?;
            println!("{}", serde_json::to_string_pretty(&host)?);
        }
        SubCommand::RefreshHost { cluster_id, host_id } => {
            let host = hosts.refresh_status(None, cluster_id, host_id, false)?;
            println!("{}", serde_json::to_string_pretty(&host)?);
        }
        SubCommand::PrepareClusterForInstallation { cluster_id } => {
            let cluster = clusters.prepare_for_installation(None, cluster_id)?;
            println!("{}", serde_json::to_string_pretty(&cluster)?);
        }
        SubCommand::CancelClusterInstallation { cluster_id, reason } => {
            let cluster = clusters.cancel_installation(None, cluster_id, &reason)?;
            println!("{}", serde_json::to_string_pretty(&cluster)?);
        }
        SubCommand::ResetCluster { cluster_id, reason } => {
            let cluster = clusters.reset_cluster(None, cluster_id, &reason)?;
            println!("{}", serde_json::to_string_pretty(&cluster)?);
        }
    }

    Ok(())
}
