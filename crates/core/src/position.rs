//! Event-log positions and optimistic concurrency expectations.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Optimistic concurrency expectation for an append.
///
/// Holds the position the appended batch must land at. The log accepts the
/// batch only if its current position is exactly one less; every accepted
/// batch occupies one position.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpectedPosition(u64);

impl ExpectedPosition {
    /// Expect the batch to be appended right after `event_t`.
    pub fn after(event_t: u64) -> Self {
        Self(event_t + 1)
    }

    pub fn new(position: u64) -> Self {
        Self(position)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    /// Whether a log currently at `current` would accept the batch.
    pub fn matches(self, current: u64) -> bool {
        current.checked_add(1) == Some(self.0)
    }

    pub fn check(self, current: u64) -> CoreResult<()> {
        if self.matches(current) {
            Ok(())
        } else {
            Err(CoreError::PositionConflict {
                expected: self.0,
                current,
            })
        }
    }
}

impl core::fmt::Display for ExpectedPosition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn after_expects_next_position() {
        let expected = ExpectedPosition::after(4);
        assert_eq!(expected.get(), 5);
        assert!(expected.matches(4));
        assert!(!expected.matches(5));
        assert!(!expected.matches(3));
    }

    #[test]
    fn check_reports_conflict() {
        let err = ExpectedPosition::new(5).check(6).unwrap_err();
        assert_eq!(
            err,
            CoreError::PositionConflict {
                expected: 5,
                current: 6
            }
        );
    }

    #[test]
    fn zero_never_matches() {
        assert!(!ExpectedPosition::new(0).matches(u64::MAX));
    }
}
