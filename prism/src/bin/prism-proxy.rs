//! The proxy control-plane binary

use prism::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if config.service.name == "prism" {
        config.service.name = "prism-proxy".to_string();
    }
    init_tracing(&config)?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            signal_token.cancel();
        }
    });

    prism::proxy::run(config, shutdown).await?;
    Ok(())
}
