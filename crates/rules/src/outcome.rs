//! Suspendable rule outcomes.
//!
//! A rule never touches the read-model. When it needs an object it returns
//! [`Outcome::Fetch`], a data value naming the object plus two continuations
//! (found / not found). A driver performs the read and feeds the result back
//! into the continuation, repeating until the outcome is terminal.
//!
//! ```text
//! evaluate(command)
//!   ↓
//! Fetch(user/u1) ──read──► on_not_found()
//!                              ↓
//!                        Fetch(email/a@x) ──read──► on_not_found()
//!                                                      ↓
//!                                                Succeeded([...])
//! ```

use core::fmt;

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;

use cmdproc_events::Event;

use crate::object::ObjectType;

type OnFound = Box<dyn FnOnce(JsonValue) -> Outcome + Send>;
type OnNotFound = Box<dyn FnOnce() -> Outcome + Send>;

/// A deferred read: "read object (type, id), then continue".
///
/// Owned by the [`Outcome`] that carries it and consumed exactly once by
/// [`FetchDescriptor::resume`].
pub struct FetchDescriptor {
    object_type: ObjectType,
    object_id: String,
    on_found: OnFound,
    on_not_found: OnNotFound,
}

impl FetchDescriptor {
    pub fn object_type(&self) -> &ObjectType {
        &self.object_type
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    /// Continue the rule with the result of the read.
    pub fn resume(self, value: Option<JsonValue>) -> Outcome {
        match value {
            Some(value) => (self.on_found)(value),
            None => (self.on_not_found)(),
        }
    }
}

impl fmt::Debug for FetchDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchDescriptor")
            .field("object_type", &self.object_type)
            .field("object_id", &self.object_id)
            .finish_non_exhaustive()
    }
}

/// Result of evaluating a rule, possibly suspended on a read.
#[derive(Debug)]
#[must_use]
pub enum Outcome {
    /// Non-terminal: the rule needs an object before it can decide.
    Fetch(FetchDescriptor),
    /// Terminal: the command is accepted and produces these events, in order.
    Succeeded(Vec<Event>),
    /// Terminal: the command cannot succeed.
    Failed(String),
}

impl Outcome {
    pub fn succeeded(events: impl IntoIterator<Item = Event>) -> Self {
        Self::Succeeded(events.into_iter().collect())
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    /// Read an object with explicit found / not-found continuations.
    pub fn fetch<F, N>(
        object_type: impl Into<ObjectType>,
        object_id: impl Into<String>,
        on_found: F,
        on_not_found: N,
    ) -> Self
    where
        F: FnOnce(JsonValue) -> Outcome + Send + 'static,
        N: FnOnce() -> Outcome + Send + 'static,
    {
        Self::Fetch(FetchDescriptor {
            object_type: object_type.into(),
            object_id: object_id.into(),
            on_found: Box::new(on_found),
            on_not_found: Box::new(on_not_found),
        })
    }

    /// Read an object that must exist; a missing object fails the command
    /// with `"<type> not found"`.
    pub fn fetch_found<F>(
        object_type: impl Into<ObjectType>,
        object_id: impl Into<String>,
        on_found: F,
    ) -> Self
    where
        F: FnOnce(JsonValue) -> Outcome + Send + 'static,
    {
        let object_type = object_type.into();
        let reason = not_found_reason(&object_type);
        Self::fetch(object_type, object_id, on_found, move || Outcome::Failed(reason))
    }

    /// Read an object that must exist and decode it into `T`.
    pub fn fetch_as<T, F>(
        object_type: impl Into<ObjectType>,
        object_id: impl Into<String>,
        on_found: F,
    ) -> Self
    where
        T: DeserializeOwned + 'static,
        F: FnOnce(T) -> Outcome + Send + 'static,
    {
        let object_type = object_type.into();
        let reason = not_found_reason(&object_type);
        Self::fetch_as_or(object_type, object_id, on_found, move || Outcome::Failed(reason))
    }

    /// Read an object, decoding it into `T` when present.
    ///
    /// An object that does not decode fails the command with
    /// `"malformed <type> object"`.
    pub fn fetch_as_or<T, F, N>(
        object_type: impl Into<ObjectType>,
        object_id: impl Into<String>,
        on_found: F,
        on_not_found: N,
    ) -> Self
    where
        T: DeserializeOwned + 'static,
        F: FnOnce(T) -> Outcome + Send + 'static,
        N: FnOnce() -> Outcome + Send + 'static,
    {
        let object_type = object_type.into();
        let malformed = format!("malformed {object_type} object");
        Self::fetch(
            object_type,
            object_id,
            move |value| match serde_json::from_value::<T>(value) {
                Ok(object) => on_found(object),
                Err(err) => {
                    tracing::warn!(error = %err, "read-model object failed to decode");
                    Outcome::Failed(malformed)
                }
            },
            on_not_found,
        )
    }

    /// Require that an object does not exist (uniqueness checks).
    pub fn ensure_absent<N>(
        object_type: impl Into<ObjectType>,
        object_id: impl Into<String>,
        reason: impl Into<String>,
        then: N,
    ) -> Self
    where
        N: FnOnce() -> Outcome + Send + 'static,
    {
        let reason = reason.into();
        Self::fetch(object_type, object_id, move |_| Outcome::Failed(reason), then)
    }

    /// Split into a terminal outcome or the pending read.
    pub fn into_terminal(self) -> Result<TerminalOutcome, FetchDescriptor> {
        match self {
            Outcome::Fetch(fetch) => Err(fetch),
            Outcome::Succeeded(events) => Ok(TerminalOutcome::Succeeded { events }),
            Outcome::Failed(reason) => Ok(TerminalOutcome::Failed { reason }),
        }
    }

    /// Resolve every pending read against an in-process lookup.
    ///
    /// Iterative, so arbitrarily long read chains do not grow the stack.
    /// Intended for tests, benchmarks and offline evaluation; the processor
    /// resolves against the real read-model asynchronously.
    pub fn resolve_with<L>(self, mut lookup: L) -> TerminalOutcome
    where
        L: FnMut(&ObjectType, &str) -> Option<JsonValue>,
    {
        let mut outcome = self;
        loop {
            match outcome.into_terminal() {
                Ok(terminal) => return terminal,
                Err(fetch) => {
                    let value = lookup(fetch.object_type(), fetch.object_id());
                    outcome = fetch.resume(value);
                }
            }
        }
    }
}

fn not_found_reason(object_type: &ObjectType) -> String {
    format!("{object_type} not found")
}

/// An outcome requiring no further reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalOutcome {
    Succeeded { events: Vec<Event> },
    Failed { reason: String },
}

impl TerminalOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TerminalOutcome::Succeeded { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            TerminalOutcome::Failed { reason } => Some(reason),
            TerminalOutcome::Succeeded { .. } => None,
        }
    }

    pub fn events(&self) -> &[Event] {
        match self {
            TerminalOutcome::Succeeded { events } => events,
            TerminalOutcome::Failed { .. } => &[],
        }
    }

    pub fn event_types(&self) -> Vec<&str> {
        self.events().iter().map(Event::event_type).collect()
    }
}

impl Serialize for TerminalOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            succeeded: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            events: Option<&'a [Event]>,
            #[serde(skip_serializing_if = "Option::is_none")]
            reason: Option<&'a str>,
        }

        let wire = match self {
            TerminalOutcome::Succeeded { events } => Wire {
                succeeded: true,
                events: Some(events),
                reason: None,
            },
            TerminalOutcome::Failed { reason } => Wire {
                succeeded: false,
                events: None,
                reason: Some(reason),
            },
        };
        wire.serialize(serializer)
    }
}
