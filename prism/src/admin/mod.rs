//! The admin control plane
//!
//! Owns namespace state, partition-to-proxy assignment, launcher inventory,
//! and the append-only audit log. Serves the RPC surface on one port and
//! the control gateway (launcher/proxy streams) on another. Migrations run
//! before either listener accepts traffic.

pub mod audit;
pub mod gateway;
pub mod http;
pub mod partitions;
pub mod service;
pub mod storage;

pub use audit::{AuditFilter, AuditRecord};
pub use gateway::AdminGateway;
pub use partitions::{partition_for, PartitionMap};
pub use service::{AdminService, CreateNamespaceRequest, CreateNamespaceResponse, NamespaceConfig};
pub use storage::AdminStore;

use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;

/// Run an admin process: storage, gateway, RPC surface, liveness sweep
pub async fn run(config: Config, shutdown: CancellationToken) -> Result<()> {
    // Never serve traffic before migrations are current.
    let store = Arc::new(AdminStore::connect(&config.storage).await?);
    let partitions = Arc::new(Mutex::new(PartitionMap::new(config.admin.partition_count)));

    let gateway = AdminGateway::new(store.clone(), partitions.clone(), config.admin.clone());
    let gateway_listener = AdminGateway::bind(&config.admin).await?;
    let gateway_task = tokio::spawn(gateway.clone().run(gateway_listener, shutdown.clone()));

    let service = Arc::new(AdminService::new(
        store,
        gateway,
        partitions,
        config.admin.clone(),
    ));

    let sweep_service = service.clone();
    let sweep_shutdown = shutdown.clone();
    let sweep_interval = std::time::Duration::from_secs(config.admin.liveness_window_secs.max(2) / 2);
    let sweep_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = sweep_service.liveness_sweep().await {
                        tracing::warn!("Liveness sweep failed: {}", e);
                    }
                }
                _ = sweep_shutdown.cancelled() => return,
            }
        }
    });

    let state = http::AdminHttpState { service };
    let rpc_listener = TcpListener::bind(("0.0.0.0", config.admin.rpc_port)).await?;
    tracing::info!("Admin RPC surface on 0.0.0.0:{}", config.admin.rpc_port);
    axum::serve(rpc_listener, http::router(state))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    let _ = gateway_task.await;
    let _ = sweep_task.await;
    Ok(())
}
