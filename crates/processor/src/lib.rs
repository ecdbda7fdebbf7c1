//! `cmdproc-processor`: turns queued commands into committed event batches.
//!
//! The [`Sequencer`] evaluates commands with a [`cmdproc_rules::RuleRegistry`],
//! resolves their reads against the read-model ([`resolve::finalize`]) and
//! appends the result to the event log at the position the read-model has
//! caught up to. [`Service`] wires it to the collaborators and runs the
//! [`PositionWorker`] and [`QueueWorker`] loops.

pub mod config;
pub mod error;
pub mod resolve;
pub mod sequencer;
pub mod service;
pub mod status;
pub mod workers;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, ProcessorConfig};
pub use error::{SequenceViolation, WorkerError};
pub use resolve::finalize;
pub use sequencer::{CommandResolution, Enqueued, Sequencer, SequencerSnapshot};
pub use service::{Collaborators, Service};
pub use workers::{PositionWorker, QueueWorker};
