use thiserror::Error;

use cmdproc_infra::CollaboratorError;

/// The read-model reported a position that is not the successor of the last
/// one. Either a reducer skipped a batch or the log was rewritten; the
/// processor cannot continue safely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[must_use]
#[error("sequencing violation: expected event_t {expected}, got {found}")]
pub struct SequenceViolation {
    pub expected: u64,
    pub found: u64,
}

/// Why a worker loop stopped.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Sequence(#[from] SequenceViolation),

    /// Only reachable with a bounded retry policy.
    #[error("collaborator retries exhausted: {0}")]
    Collaborator(#[from] CollaboratorError),
}
