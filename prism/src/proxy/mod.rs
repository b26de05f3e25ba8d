//! The proxy control plane
//!
//! Listens for pattern connections, accepts registrations, holds the
//! `instance_id → PatternHandle` registry and the `namespace → instance`
//! dispatch table, issues correlated lifecycle commands, and garbage-collects
//! state when streams terminate. Registers itself with the admin gateway and
//! heartbeats there.

pub mod admin_link;
pub mod connection;
pub mod dispatch;
pub mod http;
pub mod listener;
pub mod registry;

pub use dispatch::Dispatcher;
pub use registry::{InstanceRegistry, PatternHandle};

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;

/// Run a proxy process: control listener, admin link, and HTTP edge
pub async fn run(config: Config, shutdown: CancellationToken) -> Result<()> {
    let registry = Arc::new(InstanceRegistry::new());
    let dispatcher = Dispatcher::new(registry.clone(), config.proxy.dispatch_deadline());

    let control = listener::bind(&config.proxy).await?;
    let control_task = tokio::spawn(listener::run(
        control,
        registry.clone(),
        config.proxy.clone(),
        shutdown.clone(),
    ));
    let link_task = tokio::spawn(admin_link::run(
        config.proxy.clone(),
        dispatcher.clone(),
        shutdown.clone(),
    ));

    let state = http::ProxyHttpState {
        proxy_id: config.proxy.proxy_id.clone(),
        registry,
        dispatcher,
    };
    let http_listener = TcpListener::bind(("0.0.0.0", config.proxy.http_port)).await?;
    tracing::info!("Proxy HTTP edge on 0.0.0.0:{}", config.proxy.http_port);
    axum::serve(http_listener, http::router(state))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    let _ = control_task.await;
    let _ = link_task.await;
    Ok(())
}
