//! Infrastructure layer: collaborator ports, retry policy, in-memory and HTTP adapters.

pub mod error;
pub mod event_log;
mod http;
pub mod read_model;
pub mod retry;

pub use error::CollaboratorError;
pub use event_log::{
    AppendResult, CommandQueue, CommittedBatch, EventDbClient, EventLog, FailedCommand,
    InMemoryEventLog,
};
pub use read_model::{CatchUp, InMemoryReadModel, ObjectLookup, ObjectReader, ObjectReducerClient};
pub use retry::{BackoffStrategy, RetryPolicy};
