use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;

use cmdproc_core::{CommandId, ExpectedPosition};
use cmdproc_events::{Event, QueuedCommand};

use super::{AppendResult, CommandQueue, EventLog};
use crate::error::CollaboratorError;
use crate::http::{endpoint, ensure_success, read_position};

#[derive(Serialize)]
struct SucceedCommand<'a> {
    command_uuid: CommandId,
    event_t: u64,
    events: &'a [Event],
}

#[derive(Serialize)]
struct FailCommand<'a> {
    command_uuid: CommandId,
    reason: &'a str,
}

/// HTTP client for the event database, which owns both the event log and
/// the command queue.
#[derive(Debug, Clone)]
pub struct EventDbClient {
    base_url: String,
    client: reqwest::Client,
}

impl EventDbClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_position(&self, path: &str) -> Result<u64, CollaboratorError> {
        let resp = self.client.get(endpoint(&self.base_url, path)).send().await?;
        read_position(resp).await
    }
}

#[async_trait]
impl EventLog for EventDbClient {
    async fn append(
        &self,
        command_uuid: CommandId,
        events: Vec<Event>,
        expected: ExpectedPosition,
    ) -> Result<AppendResult, CollaboratorError> {
        let body = SucceedCommand {
            command_uuid,
            event_t: expected.get(),
            events: &events,
        };
        let resp = self
            .client
            .post(endpoint(&self.base_url, "/event-apis/succeed-command"))
            .json(&body)
            .send()
            .await?;

        match resp.status() {
            StatusCode::CONFLICT => {
                debug!(%command_uuid, expected = expected.get(), "append conflict");
                Ok(AppendResult::Conflict { current: None })
            }
            _ => {
                ensure_success(resp).await?;
                Ok(AppendResult::Accepted {
                    position: expected.get(),
                })
            }
        }
    }

    async fn current_position(&self) -> Result<u64, CollaboratorError> {
        self.get_position("/event-apis/event-t").await
    }
}

#[async_trait]
impl CommandQueue for EventDbClient {
    async fn status_position(&self) -> Result<u64, CollaboratorError> {
        self.get_position("/event-apis/status-t").await
    }

    async fn pending_commands(&self) -> Result<Vec<QueuedCommand>, CollaboratorError> {
        let resp = self
            .client
            .get(endpoint(&self.base_url, "/event-apis/pending-commands"))
            .send()
            .await?;
        Ok(ensure_success(resp).await?.json().await?)
    }

    async fn report_failure(
        &self,
        command_uuid: CommandId,
        reason: &str,
    ) -> Result<(), CollaboratorError> {
        let resp = self
            .client
            .post(endpoint(&self.base_url, "/event-apis/fail-command"))
            .json(&FailCommand {
                command_uuid,
                reason,
            })
            .send()
            .await?;
        ensure_success(resp).await?;
        Ok(())
    }

    async fn poll_for_new(&self, status_position: u64) -> Result<(), CollaboratorError> {
        let resp = self
            .client
            .get(endpoint(&self.base_url, "/event-apis/poll-status"))
            .query(&[("status_t", status_position)])
            .send()
            .await?;
        ensure_success(resp).await?;
        Ok(())
    }
}
