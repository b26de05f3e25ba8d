//! The pattern runtime
//!
//! An in-process library linked into every pattern executable. The author
//! supplies a [`PatternHandler`]; [`runtime::PatternRuntime`] maintains the
//! connection to the proxy, registers, decodes commands, drives the
//! [`lifecycle`] state machine, and reports heartbeats.

pub mod binding;
pub mod config;
pub mod lifecycle;
pub mod runtime;

pub use binding::{bind, BoundSlot};
pub use config::{BehaviorConfig, PatternConfig, SlotConfig};
pub use runtime::PatternRuntime;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::frame::{ConsumerProtocol, HealthReport};
use crate::slots::SlotRequirement;

/// The user-supplied pattern object
///
/// Callbacks are invoked by the runtime in lifecycle order; each may fail
/// without tearing the process down: the failure is reported to the proxy
/// and the state machine stays where it was. A callback that returns an
/// error with `Severity::Critical` signals an inconsistent pattern object:
/// the runtime transitions to `Failed` and terminates the process.
#[async_trait]
pub trait PatternHandler: Send + 'static {
    /// Pattern name, combined with the PID to form the instance id
    fn name(&self) -> &str;

    /// Pattern version advertised at registration
    fn version(&self) -> &str;

    /// Interfaces this pattern is willing to serve
    fn interface_declarations(&self) -> Vec<String>;

    /// Slots this pattern composes
    fn slot_requirements(&self) -> Vec<SlotRequirement>;

    /// Consumption declaration, for patterns that read topics
    fn consumer_protocol(&self) -> Option<ConsumerProtocol> {
        None
    }

    /// Bind slots and prepare to run; invoked on `Initialize`
    async fn initialize(&mut self, config: PatternConfig) -> Result<()>;

    /// Begin serving; invoked on `Start`
    async fn start(&mut self) -> Result<()>;

    /// Stop serving; invoked on `Stop` and `Shutdown`
    async fn stop(&mut self) -> Result<()>;

    /// Current health; invoked on `HealthCheck` while running
    async fn health(&self) -> HealthReport;
}
