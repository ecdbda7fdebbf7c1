//! Identity rule catalog: registration, email/username changes, role management.
//!
//! Application policy built on `cmdproc-rules`; the processor does not depend
//! on it and accepts any [`cmdproc_rules::RuleRegistry`].

pub mod commands;
pub mod events;
pub mod objects;
pub mod rules;

pub use rules::{register_all, registry};
