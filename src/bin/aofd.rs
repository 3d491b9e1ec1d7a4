//! The AOF daemon: loads configuration and the project manifest, then runs
//! the scheduler poll loop until told to stop.
//!
//! The executor that actually runs agent work is out of scope for this
//! crate; this binary wires up the rest of the control plane with no
//! executor configured, so every tick plans but never dispatches
//! (`reason: "no_executor"` on each `scheduler.poll` event) until a real
//! `aof::executor::Executor` is supplied by an embedding application.

use std::sync::Arc;

use anyhow::Result;
use aof::config::Config;
use aof::gate::GateEngine;
use aof::lease::LeaseManager;
use aof::manifest::ManifestLoader;
use aof::scheduler::Scheduler;
use aof::store::TaskStore;
use aof::throttle::{ThrottleConfig, ThrottleController};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let config = Config::load()?;
    info!(data_dir = %config.data_dir.display(), "starting aofd");

    let store = Arc::new(TaskStore::new(&config.data_dir, "default"));
    store.init().await?;

    let manifest_path = config.data_dir.join("project.yaml");
    let manifest = ManifestLoader::load(&manifest_path).await?;

    let lease = Arc::new(LeaseManager::new(Arc::clone(&store)));
    let gate = Arc::new(GateEngine::new(Arc::clone(&store)));
    let throttle_config = ThrottleConfig {
        configured_max: config.max_concurrent_dispatches,
        per_tick_cap: config.max_dispatches_per_poll,
        min_dispatch_interval: config.min_dispatch_interval,
        ..Default::default()
    };
    let throttle = Arc::new(ThrottleController::new(throttle_config));

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&store),
        lease,
        gate,
        throttle,
        None,
        manifest,
        config.clone(),
    ));

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let runner = tokio::spawn(scheduler.run(stop_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, waiting for current tick to finish");
    let _ = stop_tx.send(true);
    let _ = runner.await;
    info!(poll_interval = ?config.poll_interval, "aofd stopped");
    Ok(())
}
