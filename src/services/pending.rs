//! Handle for a queued command's eventual reply.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use crate::domain::types::CommandStatus;

/// Reply delivered to a queued command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Decrypted reply, the raw reply, or empty on failure
    pub response: String,
    pub status: CommandStatus,
}

impl CommandOutcome {
    /// Outcome used when the manager went away before answering.
    pub(crate) fn abandoned() -> Self {
        Self {
            response: String::new(),
            status: CommandStatus::Failure,
        }
    }
}

/// Receiving end of a command submitted with
/// [`DeviceManager::submit_command`](crate::services::DeviceManager::submit_command).
#[derive(Debug)]
pub struct PendingResponse {
    receiver: Receiver<CommandOutcome>,
}

impl PendingResponse {
    pub(crate) fn new(receiver: Receiver<CommandOutcome>) -> Self {
        Self { receiver }
    }

    /// Block until the dispatcher has handled the command.
    ///
    /// If the handler is dropped without running, the outcome is an empty
    /// `Failure`.
    pub fn wait(self) -> CommandOutcome {
        self.receiver
            .recv()
            .unwrap_or_else(|_| CommandOutcome::abandoned())
    }

    /// Block for at most `timeout`.
    ///
    /// Returns `None` on timeout; the command stays queued and its reply is
    /// discarded when it eventually runs.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CommandOutcome> {
        match self.receiver.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(CommandOutcome::abandoned()),
        }
    }

    /// Non-blocking check.
    pub fn try_take(&self) -> Option<CommandOutcome> {
        self.receiver.try_recv().ok()
    }
}
