//! The pattern lifecycle state machine
//!
//! States: `Unregistered → Registered → Initialized → Running → Stopping →
//! Stopped`, with `Failed` terminal. The edges here are the contract on both
//! sides of the control stream: a `Start` never silently initializes, a
//! `HealthCheck` never transitions, and an illegal command is a first-class
//! `success=false` response, not an exception.

use crate::protocol::frame::{CommandKind, LifecycleState};

/// Outcome of evaluating a command against the current state
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The command is legal; on callback success move to `next`
    Accept { next: LifecycleState },
    /// The command is a no-op in this state; respond success without
    /// invoking the callback or mutating state
    Idempotent,
    /// The command is illegal in this state; respond `success=false` and do
    /// not mutate state
    Reject { reason: String },
}

/// Evaluate a command against the lifecycle table
///
/// `HealthCheck` is deliberately absent: it never transitions and is handled
/// outside the table.
pub fn evaluate(state: LifecycleState, command: CommandKind) -> Transition {
    use LifecycleState as S;

    match command {
        CommandKind::Initialize => match state {
            S::Registered => Transition::Accept {
                next: S::Initialized,
            },
            S::Initialized => Transition::Idempotent,
            other => reject(command, other),
        },
        CommandKind::Start => match state {
            S::Initialized => Transition::Accept { next: S::Running },
            other => reject(command, other),
        },
        CommandKind::Stop => match state {
            S::Running => Transition::Accept { next: S::Stopped },
            S::Stopped => Transition::Idempotent,
            other => reject(command, other),
        },
        // Shutdown is accepted from any state and ends in Stopped before the
        // stream is torn down.
        CommandKind::Shutdown => Transition::Accept { next: S::Stopped },
        CommandKind::HealthCheck => Transition::Reject {
            reason: "HealthCheck is not a lifecycle transition".to_string(),
        },
    }
}

fn reject(command: CommandKind, state: LifecycleState) -> Transition {
    Transition::Reject {
        reason: format!("{} is not legal in state {}", command, state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState as S;

    #[test]
    fn test_happy_path_edges() {
        assert_eq!(
            evaluate(S::Registered, CommandKind::Initialize),
            Transition::Accept { next: S::Initialized }
        );
        assert_eq!(
            evaluate(S::Initialized, CommandKind::Start),
            Transition::Accept { next: S::Running }
        );
        assert_eq!(
            evaluate(S::Running, CommandKind::Stop),
            Transition::Accept { next: S::Stopped }
        );
    }

    #[test]
    fn test_out_of_order_commands_rejected() {
        // Start must not silently initialize
        assert!(matches!(
            evaluate(S::Registered, CommandKind::Start),
            Transition::Reject { .. }
        ));
        // Initialize after Running is illegal
        assert!(matches!(
            evaluate(S::Running, CommandKind::Initialize),
            Transition::Reject { .. }
        ));
        // Stop before Running is illegal
        assert!(matches!(
            evaluate(S::Initialized, CommandKind::Stop),
            Transition::Reject { .. }
        ));
    }

    #[test]
    fn test_idempotent_edges() {
        assert_eq!(evaluate(S::Initialized, CommandKind::Initialize), Transition::Idempotent);
        assert_eq!(evaluate(S::Stopped, CommandKind::Stop), Transition::Idempotent);
    }

    #[test]
    fn test_shutdown_from_any_state() {
        for state in [S::Unregistered, S::Registered, S::Initialized, S::Running, S::Stopped, S::Failed] {
            assert_eq!(
                evaluate(state, CommandKind::Shutdown),
                Transition::Accept { next: S::Stopped }
            );
        }
    }

    #[test]
    fn test_failed_is_terminal_for_normal_commands() {
        for command in [CommandKind::Initialize, CommandKind::Start, CommandKind::Stop] {
            assert!(matches!(
                evaluate(S::Failed, command),
                Transition::Reject { .. }
            ));
        }
    }
}
