//! Commands (intent) and events (facts) exchanged with the event log.

pub mod command;
pub mod event;

pub use command::{AuthContext, Command, QueuedCommand};
pub use event::Event;
