use std::sync::Arc;

use beacon_core::config::{BeaconConfig, LockBackend};
use beacon_core::TraceIdGenerator;
use beacon_lock::{LockService, MemoryLockService, SqliteLockService};
use beacon_scheduler::Scheduler;
use clap::Parser;
use tracing::{info, warn};

mod ip_monitor;

use ip_monitor::IpMonitor;

#[derive(Parser)]
#[command(name = "beacon-daemon", version, about = "Run the beacon job scheduler")]
struct Cli {
    /// Config file (default: ~/.beacon/beacon.toml)
    #[arg(long, env = "BEACON_CONFIG")]
    config: Option<String>,

    /// Lock owner identity for this node (default: hostname-pid-random)
    #[arg(long)]
    node_id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = BeaconConfig::load(cli.config.as_deref())?;
    if let Some(node_id) = cli.node_id {
        config.scheduler.node_id = node_id;
    }

    let default_filter = config.logging.filter.clone();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let node = config.scheduler.node_id.clone();
    let lock = build_lock(&config)?;
    let trace = Arc::new(TraceIdGenerator::new());

    let mut scheduler = Scheduler::new(config.scheduler.clone(), lock, trace)?;
    register_jobs(&mut scheduler, &config)?;
    if scheduler.is_empty() {
        warn!("no jobs enabled, the scheduler will idle");
    }

    let handle = scheduler.start();
    info!(node = %node, jobs = ?handle.job_names(), "beacon daemon running");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    handle.shutdown();
    handle.join().await;
    Ok(())
}

fn build_lock(config: &BeaconConfig) -> anyhow::Result<Arc<dyn LockService>> {
    let owner = config.scheduler.node_id.clone();
    match config.lock.backend {
        LockBackend::Memory => {
            info!("using in-process lock store");
            Ok(Arc::new(MemoryLockService::new(owner)))
        }
        LockBackend::Sqlite => {
            let path = &config.lock.path;
            ensure_parent_dir(path);
            info!(path = %path, "opening SQLite lock store");
            Ok(Arc::new(SqliteLockService::open(path, owner)?))
        }
    }
}

fn register_jobs(scheduler: &mut Scheduler, config: &BeaconConfig) -> anyhow::Result<()> {
    let ip = &config.ip_monitor;
    if ip.enabled {
        let job = scheduler
            .add_job("IpMonitor", IpMonitor::new(ip)?)
            .every_minutes(ip.interval_minutes)
            .without_overlapping();
        let job = if ip.on_one_server {
            job.on_one_server()
        } else {
            job
        };
        job.register()?;
    }
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
