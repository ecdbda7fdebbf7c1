//! `cmdproc-rules`: rule evaluation framework.
//!
//! Business rules are synchronous, deterministic functions from a command to
//! an [`Outcome`]. Reads against the read-model are expressed as data
//! ([`Outcome::Fetch`]) and resolved by a separate driver, so rules can be
//! unit-tested without any network dependency.

pub mod object;
pub mod outcome;
pub mod registry;

pub use object::ObjectType;
pub use outcome::{FetchDescriptor, Outcome, TerminalOutcome};
pub use registry::{INVALID_COMMAND, Rule, RuleRegistry};
