//! Tracing initialization

use tracing_subscriber::EnvFilter;

use crate::{config::Config, error::Result};

/// Initialize tracing for a prism process
///
/// Emits JSON-formatted events filtered by the configured log level. The
/// `RUST_LOG` environment variable, when set, takes precedence over the
/// configured level.
pub fn init_tracing(config: &Config) -> Result<()> {
    let log_level = config.service.log_level.clone();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&log_level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Tracing initialized for service: {}", config.service.name);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_does_not_panic() {
        let config = Config::default();
        // A second subscriber registration in the same process fails; either
        // outcome is acceptable here.
        let _ = init_tracing(&config);
    }
}
