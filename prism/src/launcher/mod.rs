//! The launcher
//!
//! A capacity-holding supervisor: dials the admin gateway, receives "run
//! this pattern with this config" instructions, spawns detached pattern
//! processes, probes their liveness, and reports failures. Supervision is
//! local; the admin's storage stays the single source of truth.

pub mod admin_link;
pub mod process;
pub mod supervisor;

pub use supervisor::{SpawnSpec, Supervisor};

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;

/// Run a launcher process until shutdown
pub async fn run(config: Config, shutdown: CancellationToken) -> Result<()> {
    let supervisor = Arc::new(Supervisor::new(config.launcher.clone()));
    let (exit_tx, exit_rx) = mpsc::channel(32);

    let poll_supervisor = supervisor.clone();
    let poll_shutdown = shutdown.clone();
    let poll_task = tokio::spawn(async move {
        poll_supervisor.run_poll_loop(exit_tx, poll_shutdown).await;
    });

    let result = admin_link::run(
        config.launcher.clone(),
        supervisor.clone(),
        exit_rx,
        shutdown.clone(),
    )
    .await;

    // Children are stopped cooperatively before the launcher exits.
    supervisor.shutdown_all().await;
    let _ = poll_task.await;
    result
}
