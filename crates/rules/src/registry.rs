//! Command-type → rule dispatch table.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::debug;

use cmdproc_events::{AuthContext, Command};

use crate::outcome::Outcome;

/// Failure reason for unknown command types and undecodable payloads.
pub const INVALID_COMMAND: &str = "invalid command";

/// A business rule for one command type.
///
/// Implementations must be pure: the same payload, auth context and read
/// results must always select the same sequence of fetches and the same
/// terminal branch. Unique values (confirmation codes, ids) may appear inside
/// event payloads as long as they never influence branching.
pub trait Rule: Send + Sync {
    fn evaluate(&self, payload: &JsonValue, auth: &AuthContext) -> Outcome;
}

/// Adapter decoding the raw payload into `P` before calling a typed handler.
struct TypedRule<P, F> {
    command_type: String,
    handler: F,
    _payload: PhantomData<fn() -> P>,
}

impl<P, F> Rule for TypedRule<P, F>
where
    P: DeserializeOwned,
    F: Fn(P, &AuthContext) -> Outcome + Send + Sync,
{
    fn evaluate(&self, payload: &JsonValue, auth: &AuthContext) -> Outcome {
        match P::deserialize(payload) {
            Ok(parsed) => (self.handler)(parsed, auth),
            Err(err) => {
                debug!(command_type = %self.command_type, error = %err, "command payload rejected");
                Outcome::failed(INVALID_COMMAND)
            }
        }
    }
}

/// Registry of rules, built once at startup and shared read-only.
#[derive(Default, Clone)]
pub struct RuleRegistry {
    rules: HashMap<String, Arc<dyn Rule>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed handler; the payload is decoded into `P` first.
    ///
    /// Shape checks belong in `P`'s `Deserialize` impl (validated field
    /// types, `#[serde(try_from)]`): a payload that fails to decode is
    /// rejected with [`INVALID_COMMAND`] and the handler never runs.
    pub fn register<P, F>(&mut self, command_type: impl Into<String>, handler: F) -> &mut Self
    where
        P: DeserializeOwned + 'static,
        F: Fn(P, &AuthContext) -> Outcome + Send + Sync + 'static,
    {
        let command_type = command_type.into();
        let rule = TypedRule {
            command_type: command_type.clone(),
            handler,
            _payload: PhantomData,
        };
        self.rules.insert(command_type, Arc::new(rule));
        self
    }

    /// Register a rule that works on the raw JSON payload.
    pub fn register_rule(
        &mut self,
        command_type: impl Into<String>,
        rule: impl Rule + 'static,
    ) -> &mut Self {
        self.rules.insert(command_type.into(), Arc::new(rule));
        self
    }

    /// Builder-style variant of [`RuleRegistry::register`].
    pub fn with<P, F>(mut self, command_type: impl Into<String>, handler: F) -> Self
    where
        P: DeserializeOwned + 'static,
        F: Fn(P, &AuthContext) -> Outcome + Send + Sync + 'static,
    {
        self.register(command_type, handler);
        self
    }

    pub fn contains(&self, command_type: &str) -> bool {
        self.rules.contains_key(command_type)
    }

    pub fn command_types(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    /// Evaluate a command up to its first read (or a terminal decision).
    ///
    /// Unknown command types fail with [`INVALID_COMMAND`] without running
    /// any handler.
    pub fn evaluate(&self, command: &Command) -> Outcome {
        match self.rules.get(&command.command_type) {
            Some(rule) => rule.evaluate(&command.payload, &command.auth),
            None => {
                debug!(command_type = %command.command_type, "unknown command type");
                Outcome::failed(INVALID_COMMAND)
            }
        }
    }
}

impl core::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut types: Vec<_> = self.command_types().collect();
        types.sort_unstable();
        f.debug_struct("RuleRegistry").field("rules", &types).finish()
    }
}
