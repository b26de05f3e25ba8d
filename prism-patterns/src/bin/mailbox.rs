//! The mailbox pattern executable

use prism::prelude::*;
use prism_patterns::MailboxPattern;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = Config::load()?;
    config.service.name = "mailbox".to_string();
    init_tracing(&config)?;

    let handler = MailboxPattern::new(config.pattern.namespace.clone());
    let runtime = PatternRuntime::new(handler, config.pattern);
    runtime.run().await?;
    Ok(())
}
