use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

use cmdproc_core::{CommandId, UserId};

/// Who is acting on behalf of a command.
///
/// Attached by the ingress layer after request verification; the engine
/// only ever reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    #[serde(default)]
    pub acting_user: Option<UserId>,
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(user_id: UserId) -> Self {
        Self {
            acting_user: Some(user_id),
        }
    }

    pub fn acting_user(&self) -> Option<&UserId> {
        self.acting_user.as_ref()
    }
}

/// A request to change system state (intent, not fact).
///
/// Commands are transient: one `Command` value exists for the duration of a
/// single evaluation attempt and is rebuilt from the queued form on every
/// re-evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "type")]
    pub command_type: String,
    #[serde(rename = "data")]
    pub payload: JsonValue,
    #[serde(default)]
    pub auth: AuthContext,
}

impl Command {
    pub fn new(command_type: impl Into<String>, payload: JsonValue, auth: AuthContext) -> Self {
        Self {
            command_type: command_type.into(),
            payload,
            auth,
        }
    }
}

/// A command as stored in the external command queue.
///
/// This is the unit the sequencer consumes. It stays in the queue until the
/// processor reports success (append) or failure for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedCommand {
    pub command_uuid: CommandId,
    pub command_type: String,
    pub command_data: JsonValue,
    #[serde(default)]
    pub command_date: Option<DateTime<Utc>>,
    pub scheduled_for: DateTime<Utc>,
    /// Queue status position at which the command was submitted.
    #[serde(deserialize_with = "u64_from_number_or_string")]
    pub status_t: u64,
    #[serde(default)]
    pub acting_user: Option<UserId>,
}

impl QueuedCommand {
    pub fn new(
        command_uuid: CommandId,
        command_type: impl Into<String>,
        command_data: JsonValue,
        status_t: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            command_uuid,
            command_type: command_type.into(),
            command_data,
            command_date: Some(now),
            scheduled_for: now,
            status_t,
            acting_user: None,
        }
    }

    pub fn with_acting_user(mut self, user_id: UserId) -> Self {
        self.acting_user = Some(user_id);
        self
    }

    /// Build the evaluation input for one processing attempt.
    pub fn to_command(&self) -> Command {
        Command {
            command_type: self.command_type.clone(),
            payload: self.command_data.clone(),
            auth: AuthContext {
                acting_user: self.acting_user.clone(),
            },
        }
    }
}

// Queue backends report bigint columns as decimal strings.
fn u64_from_number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn queued_command_accepts_string_status() {
        let id = CommandId::new();
        let raw = json!({
            "command_uuid": id.to_string(),
            "command_type": "register",
            "command_data": {"user_id": "u1"},
            "command_date": "2024-01-01T00:00:00Z",
            "scheduled_for": "2024-01-01T00:00:00Z",
            "status_t": "42",
        });

        let cmd: QueuedCommand = serde_json::from_value(raw).unwrap();
        assert_eq!(cmd.command_uuid, id);
        assert_eq!(cmd.status_t, 42);
        assert!(cmd.acting_user.is_none());
    }

    #[test]
    fn queued_command_accepts_numeric_status() {
        let raw = json!({
            "command_uuid": CommandId::new().to_string(),
            "command_type": "register",
            "command_data": {},
            "scheduled_for": "2024-01-01T00:00:00Z",
            "status_t": 7,
            "acting_user": "u9",
        });

        let cmd: QueuedCommand = serde_json::from_value(raw).unwrap();
        assert_eq!(cmd.status_t, 7);
        assert_eq!(cmd.acting_user, Some(UserId::new("u9")));
        assert!(cmd.command_date.is_none());
    }

    #[test]
    fn to_command_carries_auth() {
        let queued = QueuedCommand::new(CommandId::new(), "change_email", json!({"new_email": "b@x"}), 1)
            .with_acting_user(UserId::new("u1"));

        let cmd = queued.to_command();
        assert_eq!(cmd.command_type, "change_email");
        assert_eq!(cmd.auth.acting_user(), Some(&UserId::new("u1")));
        assert_eq!(cmd.payload["new_email"], "b@x");
    }
}
