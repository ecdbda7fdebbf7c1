//! `cmdproc-core`: identifiers and log positions shared by every cmdproc crate.
//!
//! This crate is pure data (no IO, no async).

pub mod error;
pub mod id;
pub mod position;

pub use error::{CoreError, CoreResult};
pub use id::{CommandId, UserId};
pub use position::ExpectedPosition;
