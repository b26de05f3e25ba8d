//! # prism
//!
//! A data-access gateway that decouples applications from heterogeneous
//! storage and messaging backends. Clients talk to a proxy; the proxy routes
//! each namespace to a **pattern**: a separately executed process composing
//! typed **backend slots** (key-value, pub/sub, queue, object store, table
//! writer/reader) into a higher-level contract.
//!
//! The crate hosts all five subsystems:
//!
//! - [`slots`]: capability-typed backend contracts and reference backends
//! - [`protocol`]: the framed, correlated control-stream protocol
//! - [`pattern`]: the runtime linked into every pattern executable
//! - [`proxy`]: the control plane patterns dial in to
//! - [`launcher`]: the process supervisor
//! - [`admin`]: the source of truth and RPC surface
//!
//! Three binaries (`prism-admin`, `prism-proxy`, `prism-launcher`) wrap the
//! respective subsystems; pattern executables link [`pattern`] and live in
//! the `prism-patterns` crate.
//!
//! ## Example
//!
//! ```rust,no_run
//! use prism::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let shutdown = CancellationToken::new();
//!     prism::proxy::run(config, shutdown).await
//! }
//! ```

pub mod admin;
pub mod config;
pub mod error;
pub mod launcher;
pub mod observability;
pub mod pattern;
pub mod protocol;
pub mod proxy;
pub mod slots;

/// Commonly used types, re-exported
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCode, PrismError, Result};
    pub use crate::observability::init_tracing;
    pub use crate::pattern::{PatternConfig, PatternHandler, PatternRuntime};
    pub use crate::protocol::frame::{HealthReport, HealthStatus, LifecycleState};
    pub use crate::slots::{Capability, SlotRequirement};
    pub use tokio_util::sync::CancellationToken;
}
