use thiserror::Error;

/// Failure talking to an external collaborator (read-model, event log, queue).
///
/// Always transient from the processor's point of view: callers retry
/// according to their [`crate::RetryPolicy`] and never surface these as
/// command failures.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("response decode failed: {0}")]
    Decode(String),

    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            CollaboratorError::Decode(value.to_string())
        } else {
            CollaboratorError::Transport(value.to_string())
        }
    }
}
