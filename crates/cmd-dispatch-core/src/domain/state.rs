//! State - dispatcher と completion slot の状態

use serde::{Deserialize, Serialize};

/// Dispatcher lifecycle.
///
/// State transitions:
/// - Running -> Draining (shutdown requested; no further command runs)
/// - Draining -> Stopped (dispatcher loop exited and released the channel)
///
/// `Stopped` is terminal. A stopped dispatcher is never restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DispatcherState {
    /// Accepting and executing commands.
    Running,

    /// Shutdown requested. Queued commands resolve as cancelled.
    Draining,

    /// Dispatcher loop has exited.
    Stopped,
}

impl DispatcherState {
    /// Does the dispatcher still run submitted commands?
    pub fn accepts_work(self) -> bool {
        matches!(self, DispatcherState::Running)
    }
}

/// Observable state of a completion slot.
///
/// State transitions:
/// - Pending -> Succeeded
/// - Pending -> Failed
/// - Pending -> Cancelled
///
/// Every slot leaves `Pending` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompletionState {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

impl CompletionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CompletionState::Pending)
    }
}
