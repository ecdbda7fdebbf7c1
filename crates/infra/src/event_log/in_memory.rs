use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use cmdproc_core::{CommandId, ExpectedPosition};
use cmdproc_events::{Event, QueuedCommand};

use super::{AppendResult, CommandQueue, CommittedBatch, EventLog};
use crate::error::CollaboratorError;

/// A command that was reported as rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedCommand {
    pub command_uuid: CommandId,
    pub reason: String,
}

#[derive(Debug, Default)]
struct LogState {
    batches: Vec<CommittedBatch>,
    queue: Vec<QueuedCommand>,
    failures: Vec<FailedCommand>,
    status: u64,
}

impl LogState {
    fn position(&self) -> u64 {
        self.batches.len() as u64
    }

    fn committed_at(&self, command_uuid: CommandId) -> Option<u64> {
        self.batches
            .iter()
            .find(|b| b.command_uuid == command_uuid)
            .map(|b| b.position)
    }

    fn take_queued(&mut self, command_uuid: CommandId) {
        self.queue.retain(|c| c.command_uuid != command_uuid);
    }

    fn push_batch(&mut self, command_uuid: CommandId, events: Vec<Event>) -> u64 {
        let position = self.position() + 1;
        self.batches.push(CommittedBatch {
            position,
            command_uuid,
            events,
        });
        self.take_queued(command_uuid);
        self.status += 1;
        position
    }
}

/// In-memory event log and command queue.
///
/// Intended for tests/dev. Plays the role of the event database: it holds
/// the committed batches, the queue of pending commands and the rejection
/// records. Both the log position and the queue status are published on
/// watch channels so projectors and pollers can wait on them.
///
/// Appends are idempotent per command: appending for a command that already
/// has a committed batch returns that batch's position and writes nothing.
#[derive(Debug)]
pub struct InMemoryEventLog {
    state: Mutex<LogState>,
    position: watch::Sender<u64>,
    status: watch::Sender<u64>,
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        let (position, _) = watch::channel(0);
        let (status, _) = watch::channel(0);
        Self {
            state: Mutex::new(LogState::default()),
            position,
            status,
        }
    }
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LogState>, CollaboratorError> {
        self.state
            .lock()
            .map_err(|_| CollaboratorError::Unavailable("lock poisoned".to_string()))
    }

    fn publish(&self, state: &LogState) {
        self.position.send_replace(state.position());
        self.status.send_replace(state.status);
    }

    /// Put a command on the queue, stamping it with the next status position.
    pub fn submit(&self, mut command: QueuedCommand) -> CommandId {
        let id = command.command_uuid;
        if let Ok(mut state) = self.state.lock() {
            state.status += 1;
            command.status_t = state.status;
            state.queue.push(command);
            self.publish(&state);
        }
        id
    }

    /// Append without a position check, as a competing writer would.
    pub fn append_unchecked(&self, command_uuid: CommandId, events: Vec<Event>) -> Option<u64> {
        let mut state = self.state.lock().ok()?;
        let position = state.push_batch(command_uuid, events);
        self.publish(&state);
        Some(position)
    }

    pub fn batches(&self) -> Vec<CommittedBatch> {
        self.state
            .lock()
            .map(|s| s.batches.clone())
            .unwrap_or_default()
    }

    /// Batch stored at `position` (1-based).
    pub fn batch(&self, position: u64) -> Option<CommittedBatch> {
        let index = usize::try_from(position.checked_sub(1)?).ok()?;
        self.state.lock().ok()?.batches.get(index).cloned()
    }

    pub fn failures(&self) -> Vec<FailedCommand> {
        self.state
            .lock()
            .map(|s| s.failures.clone())
            .unwrap_or_default()
    }

    pub fn queued(&self) -> Vec<QueuedCommand> {
        self.state
            .lock()
            .map(|s| s.queue.clone())
            .unwrap_or_default()
    }

    /// Receiver that observes every change of the log position.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.position.subscribe()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(
        &self,
        command_uuid: CommandId,
        events: Vec<Event>,
        expected: ExpectedPosition,
    ) -> Result<AppendResult, CollaboratorError> {
        let mut state = self.lock()?;

        if let Some(position) = state.committed_at(command_uuid) {
            debug!(%command_uuid, position, "command already committed");
            return Ok(AppendResult::Accepted { position });
        }

        let current = state.position();
        if let Err(err) = expected.check(current) {
            debug!(%command_uuid, %err, "append rejected");
            return Ok(AppendResult::Conflict {
                current: Some(current),
            });
        }

        let position = state.push_batch(command_uuid, events);
        self.publish(&state);
        Ok(AppendResult::Accepted { position })
    }

    async fn current_position(&self) -> Result<u64, CollaboratorError> {
        Ok(self.lock()?.position())
    }
}

#[async_trait]
impl CommandQueue for InMemoryEventLog {
    async fn status_position(&self) -> Result<u64, CollaboratorError> {
        Ok(self.lock()?.status)
    }

    async fn pending_commands(&self) -> Result<Vec<QueuedCommand>, CollaboratorError> {
        Ok(self.lock()?.queue.clone())
    }

    async fn report_failure(
        &self,
        command_uuid: CommandId,
        reason: &str,
    ) -> Result<(), CollaboratorError> {
        let mut state = self.lock()?;

        if state.committed_at(command_uuid).is_some() {
            debug!(%command_uuid, "ignoring failure for committed command");
            return Ok(());
        }
        if state.failures.iter().any(|f| f.command_uuid == command_uuid) {
            return Ok(());
        }

        state.take_queued(command_uuid);
        state.failures.push(FailedCommand {
            command_uuid,
            reason: reason.to_string(),
        });
        state.status += 1;
        self.publish(&state);
        Ok(())
    }

    async fn poll_for_new(&self, status_position: u64) -> Result<(), CollaboratorError> {
        let mut rx = self.status.subscribe();
        rx.wait_for(|status| *status >= status_position)
            .await
            .map(|_| ())
            .map_err(|_| CollaboratorError::Unavailable("command queue closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn queued(command_type: &str) -> QueuedCommand {
        QueuedCommand::new(CommandId::new(), command_type, json!({}), 0)
    }

    fn event(name: &str) -> Event {
        Event::new(name, json!({}))
    }

    #[tokio::test]
    async fn append_requires_expected_position() {
        let log = InMemoryEventLog::new();
        let first = CommandId::new();

        let out = log
            .append(first, vec![event("a")], ExpectedPosition::after(0))
            .await
            .unwrap();
        assert_eq!(out, AppendResult::Accepted { position: 1 });

        let stale = log
            .append(CommandId::new(), vec![event("b")], ExpectedPosition::after(0))
            .await
            .unwrap();
        assert_eq!(stale, AppendResult::Conflict { current: Some(1) });

        assert_eq!(log.current_position().await.unwrap(), 1);
        assert_eq!(log.batch(1).unwrap().command_uuid, first);
        assert!(log.batch(2).is_none());
        assert!(log.batch(0).is_none());
    }

    #[tokio::test]
    async fn batch_occupies_one_position() {
        let log = InMemoryEventLog::new();

        log.append(CommandId::new(), vec![event("a"), event("b"), event("c")], ExpectedPosition::after(0))
            .await
            .unwrap();

        assert_eq!(log.current_position().await.unwrap(), 1);
        assert_eq!(log.batch(1).unwrap().events.len(), 3);
    }

    #[tokio::test]
    async fn append_is_idempotent_per_command() {
        let log = InMemoryEventLog::new();
        let id = CommandId::new();

        log.append(id, vec![event("a")], ExpectedPosition::after(0)).await.unwrap();
        let again = log
            .append(id, vec![event("a")], ExpectedPosition::after(1))
            .await
            .unwrap();

        assert_eq!(again, AppendResult::Accepted { position: 1 });
        assert_eq!(log.batches().len(), 1);
    }

    #[tokio::test]
    async fn submit_bumps_status_and_append_dequeues() {
        let log = InMemoryEventLog::new();
        let id = log.submit(queued("register"));
        log.submit(queued("register"));

        assert_eq!(log.status_position().await.unwrap(), 2);
        let pending = log.pending_commands().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].status_t, 1);
        assert_eq!(pending[1].status_t, 2);

        log.append(id, vec![event("a")], ExpectedPosition::after(0)).await.unwrap();

        assert_eq!(log.pending_commands().await.unwrap().len(), 1);
        assert_eq!(log.status_position().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn failures_are_recorded_once_and_never_after_commit() {
        let log = InMemoryEventLog::new();
        let rejected = log.submit(queued("register"));
        let committed = log.submit(queued("register"));

        log.report_failure(rejected, "email already taken").await.unwrap();
        log.report_failure(rejected, "email already taken").await.unwrap();

        log.append(committed, vec![event("a")], ExpectedPosition::after(0)).await.unwrap();
        log.report_failure(committed, "user_id already taken").await.unwrap();

        assert_eq!(
            log.failures(),
            vec![FailedCommand {
                command_uuid: rejected,
                reason: "email already taken".to_string(),
            }]
        );
        assert!(log.queued().is_empty());
    }

    #[tokio::test]
    async fn poll_for_new_waits_for_status() {
        let log = Arc::new(InMemoryEventLog::new());

        let poller = {
            let log = Arc::clone(&log);
            tokio::spawn(async move { log.poll_for_new(1).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!poller.is_finished());

        log.submit(queued("register"));
        tokio::time::timeout(Duration::from_secs(1), poller)
            .await
            .expect("poll should resolve")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn subscribers_see_unchecked_appends() {
        let log = InMemoryEventLog::new();
        let mut rx = log.subscribe();

        assert_eq!(log.append_unchecked(CommandId::new(), vec![event("x")]), Some(1));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
    }
}
