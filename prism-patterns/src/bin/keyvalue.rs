//! The key-value pattern executable

use prism::prelude::*;
use prism_patterns::KeyValuePattern;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = Config::load()?;
    config.service.name = "keyvalue".to_string();
    init_tracing(&config)?;

    let handler = KeyValuePattern::new(config.pattern.namespace.clone());
    let runtime = PatternRuntime::new(handler, config.pattern);
    runtime.run().await?;
    Ok(())
}
