//! Event log and command queue ports.
//!
//! The event log is a single totally ordered sequence of batches. Each
//! accepted append occupies exactly one position; position `0` means the log
//! is empty. Appends are conditional on the position the writer observed
//! ([`ExpectedPosition`]), which is the only concurrency control between
//! processors.
//!
//! The command queue is the inbound side: commands waiting to be decided,
//! plus a status counter that moves whenever the queue changes.

pub mod http;
pub mod in_memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use cmdproc_core::{CommandId, ExpectedPosition};
use cmdproc_events::{Event, QueuedCommand};

use crate::error::CollaboratorError;

pub use http::EventDbClient;
pub use in_memory::{FailedCommand, InMemoryEventLog};

/// Answer to a conditional append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendResult {
    /// The batch was stored at `position`.
    Accepted { position: u64 },
    /// Another writer got there first. `current` is the log position when
    /// the collaborator reports it.
    Conflict { current: Option<u64> },
}

/// One accepted append: all events produced by one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommittedBatch {
    pub position: u64,
    pub command_uuid: CommandId,
    pub events: Vec<Event>,
}

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append `events` as one batch if the log is still at `expected - 1`.
    ///
    /// All-or-nothing: on `Conflict` nothing was written.
    async fn append(
        &self,
        command_uuid: CommandId,
        events: Vec<Event>,
        expected: ExpectedPosition,
    ) -> Result<AppendResult, CollaboratorError>;

    /// Position of the last accepted batch.
    async fn current_position(&self) -> Result<u64, CollaboratorError>;
}

#[async_trait]
pub trait CommandQueue: Send + Sync {
    async fn status_position(&self) -> Result<u64, CollaboratorError>;

    async fn pending_commands(&self) -> Result<Vec<QueuedCommand>, CollaboratorError>;

    /// Mark a command as rejected. Final for that command.
    async fn report_failure(
        &self,
        command_uuid: CommandId,
        reason: &str,
    ) -> Result<(), CollaboratorError>;

    /// Long-poll: resolve once the queue status has reached `status_position`.
    async fn poll_for_new(&self, status_position: u64) -> Result<(), CollaboratorError>;
}
