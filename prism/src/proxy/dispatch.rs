//! Command dispatch
//!
//! The entry point for everything that wants to reach a pattern: admin
//! traffic, the data-plane edge, and operators. Dispatch is gated on the
//! interface declarations captured at registration.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{PrismError, Result};
use crate::protocol::frame::{ProxyCommand, ResponseBody};

use super::registry::InstanceRegistry;

/// Routes commands to connected pattern instances
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<InstanceRegistry>,
    deadline: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<InstanceRegistry>, deadline: Duration) -> Self {
        Self { registry, deadline }
    }

    /// Send a command to a specific instance
    pub async fn send_to_instance(
        &self,
        instance_id: &str,
        command: ProxyCommand,
    ) -> Result<ResponseBody> {
        let handle = self
            .registry
            .get(instance_id)
            .ok_or_else(|| PrismError::pattern_not_connected(instance_id))?;
        handle.send_command(command, self.deadline).await
    }

    /// Send a command to the instance serving a namespace
    ///
    /// When `required_interface` is given and the pattern did not declare
    /// it, the pattern is not dialed and the caller gets
    /// `INTERFACE_NOT_SUPPORTED`.
    pub async fn send_to_namespace(
        &self,
        namespace: &str,
        required_interface: Option<&str>,
        command: ProxyCommand,
    ) -> Result<ResponseBody> {
        let handle = self
            .registry
            .get_by_namespace(namespace)
            .ok_or_else(|| PrismError::pattern_not_connected(namespace).with_namespace(namespace))?;

        if let Some(interface) = required_interface {
            if !handle.declares_interface(interface) {
                return Err(PrismError::interface_not_supported(
                    interface,
                    "declaration at registration",
                )
                .with_namespace(namespace)
                .with_metadata("instance_id", handle.instance_id.clone())
                .into());
            }
        }

        handle.send_command(command, self.deadline).await
    }
}
