//! Command sequencer: ties command evaluation to read-model freshness.
//!
//! ## State
//!
//! The sequencer owns exactly two pieces of mutable state, kept together
//! under one mutex:
//!
//! - `event_t`: the highest log position every read-model has applied, as
//!   reported by the position worker. Unknown until the first report.
//! - `pending`: commands that arrived while `event_t` was unknown.
//!
//! Once known, `event_t` advances by exactly one per report. A gap is a
//! [`SequenceViolation`] and leaves the state untouched.
//!
//! ## Per-command protocol
//!
//! ```text
//! read event_t ─▶ evaluate ─▶ finalize ─┬─ Failed ─▶ report_failure ─▶ Rejected
//!                                       └─ Succeeded ─▶ append(event_t + 1)
//!                                                        ├─ Accepted ─▶ Committed
//!                                                        └─ Conflict ─▶ wait for event_t to move, start over
//! ```
//!
//! Evaluation always starts from a fresh [`RuleRegistry::evaluate`]; nothing
//! from a conflicted attempt is reused. Collaborator errors that escape the
//! retry policy restart the command after `reprocess_delay`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

use cmdproc_core::{CommandId, ExpectedPosition};
use cmdproc_events::{Command, Event, QueuedCommand};
use cmdproc_infra::{
    AppendResult, CollaboratorError, CommandQueue, EventLog, ObjectReader, RetryPolicy,
};
use cmdproc_rules::{RuleRegistry, TerminalOutcome};

use crate::error::SequenceViolation;
use crate::resolve::finalize;

/// Final result of processing one command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResolution {
    Committed { position: u64, events: Vec<Event> },
    Rejected { reason: String },
}

/// What `enqueue` did with a command.
#[derive(Debug)]
pub enum Enqueued {
    /// Held until the first position is known.
    Buffered,
    /// Processing on its own task.
    Dispatched(JoinHandle<CommandResolution>),
}

/// Point-in-time view of the sequencer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SequencerSnapshot {
    pub event_t: Option<u64>,
    pub pending: usize,
}

#[derive(Debug, Default)]
struct SequencerState {
    event_t: Option<u64>,
    pending: Vec<QueuedCommand>,
}

enum Attempt {
    Done(CommandResolution),
    Conflict { observed: u64 },
}

pub struct Sequencer {
    state: Mutex<SequencerState>,
    position: watch::Sender<Option<u64>>,
    registry: Arc<RuleRegistry>,
    reader: Arc<dyn ObjectReader>,
    log: Arc<dyn EventLog>,
    queue: Arc<dyn CommandQueue>,
    retry: RetryPolicy,
    reprocess_delay: Duration,
}

impl Sequencer {
    pub fn new(
        registry: Arc<RuleRegistry>,
        reader: Arc<dyn ObjectReader>,
        log: Arc<dyn EventLog>,
        queue: Arc<dyn CommandQueue>,
    ) -> Self {
        let (position, _) = watch::channel(None);
        Self {
            state: Mutex::new(SequencerState::default()),
            position,
            registry,
            reader,
            log,
            queue,
            retry: RetryPolicy::default(),
            reprocess_delay: Duration::from_millis(100),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_reprocess_delay(mut self, delay: Duration) -> Self {
        self.reprocess_delay = delay;
        self
    }

    // The state is a plain value with no cross-field invariant a panic could
    // break halfway, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, SequencerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn event_t(&self) -> Option<u64> {
        self.lock().event_t
    }

    pub fn snapshot(&self) -> SequencerSnapshot {
        let state = self.lock();
        SequencerSnapshot {
            event_t: state.event_t,
            pending: state.pending.len(),
        }
    }

    /// Observe `event_t` changes.
    pub fn subscribe(&self) -> watch::Receiver<Option<u64>> {
        self.position.subscribe()
    }

    /// Accept a command for processing.
    ///
    /// Before the first position is known the command is buffered (once per
    /// `command_uuid`). Afterwards it is processed on a new task right away.
    pub fn enqueue(self: &Arc<Self>, command: QueuedCommand) -> Enqueued {
        {
            let mut state = self.lock();
            if state.event_t.is_none() {
                if state
                    .pending
                    .iter()
                    .any(|c| c.command_uuid == command.command_uuid)
                {
                    debug!(command_uuid = %command.command_uuid, "already buffered");
                } else {
                    debug!(command_uuid = %command.command_uuid, "buffered until event_t is known");
                    state.pending.push(command);
                }
                return Enqueued::Buffered;
            }
        }
        Enqueued::Dispatched(self.spawn(command))
    }

    /// Record that every read-model has applied position `event_t`.
    ///
    /// The first call releases all buffered commands, each on its own task;
    /// this never waits for them.
    pub fn event_handled(self: &Arc<Self>, event_t: u64) -> Result<(), SequenceViolation> {
        let released = {
            let mut state = self.lock();
            let released = match state.event_t {
                None => std::mem::take(&mut state.pending),
                Some(current) => {
                    let expected = current.saturating_add(1);
                    if event_t != expected {
                        return Err(SequenceViolation {
                            expected,
                            found: event_t,
                        });
                    }
                    Vec::new()
                }
            };
            state.event_t = Some(event_t);
            self.position.send_replace(Some(event_t));
            released
        };

        if !released.is_empty() {
            info!(event_t, count = released.len(), "releasing buffered commands");
        }
        for command in released {
            drop(self.spawn(command));
        }
        Ok(())
    }

    fn spawn(self: &Arc<Self>, command: QueuedCommand) -> JoinHandle<CommandResolution> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.process(command).await })
    }

    /// Process one command until it is committed or rejected.
    ///
    /// Waits for `event_t` to be known first. Never returns early: conflicts
    /// and collaborator errors lead to another attempt.
    pub async fn process(&self, queued: QueuedCommand) -> CommandResolution {
        let command = queued.to_command();
        let command_uuid = queued.command_uuid;

        loop {
            let event_t = self.wait_until(|t| t.is_some()).await;
            let Some(event_t) = event_t else { continue };

            let span = info_span!(
                "command",
                %command_uuid,
                command_type = %command.command_type,
                event_t
            );
            match self.attempt(command_uuid, &command, event_t).instrument(span).await {
                Ok(Attempt::Done(resolution)) => return resolution,
                Ok(Attempt::Conflict { observed }) => {
                    self.wait_until(|t| t.is_some_and(|t| t > observed)).await;
                }
                Err(err) => {
                    warn!(%command_uuid, error = %err, "error while processing command; reprocessing");
                    tokio::time::sleep(self.reprocess_delay).await;
                }
            }
        }
    }

    async fn attempt(
        &self,
        command_uuid: CommandId,
        command: &Command,
        event_t: u64,
    ) -> Result<Attempt, CollaboratorError> {
        let outcome = self.registry.evaluate(command);

        match finalize(outcome, self.reader.as_ref(), &self.retry).await? {
            TerminalOutcome::Failed { reason } => {
                self.retry
                    .run("report_failure", || {
                        self.queue.report_failure(command_uuid, &reason)
                    })
                    .await?;
                info!(%reason, "command rejected");
                Ok(Attempt::Done(CommandResolution::Rejected { reason }))
            }
            TerminalOutcome::Succeeded { events } => {
                let expected = ExpectedPosition::after(event_t);
                let appended = self
                    .retry
                    .run("append", || self.log.append(command_uuid, events.clone(), expected))
                    .await?;

                match appended {
                    AppendResult::Accepted { position } => {
                        info!(position, events = events.len(), "command committed");
                        Ok(Attempt::Done(CommandResolution::Committed { position, events }))
                    }
                    AppendResult::Conflict { current } => {
                        info!(%expected, ?current, "append conflict; will re-evaluate");
                        Ok(Attempt::Conflict { observed: event_t })
                    }
                }
            }
        }
    }

    async fn wait_until<P>(&self, mut ready: P) -> Option<u64>
    where
        P: FnMut(&Option<u64>) -> bool,
    {
        let mut rx = self.position.subscribe();
        match rx.wait_for(|t| ready(t)).await {
            Ok(t) => *t,
            // Unreachable while `self` holds the sender.
            Err(_) => self.event_t(),
        }
    }
}

impl core::fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Sequencer")
            .field("state", &self.snapshot())
            .field("registry", &self.registry)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{eventually, run_pending_tasks};
    use async_trait::async_trait;
    use cmdproc_infra::{InMemoryEventLog, InMemoryReadModel};
    use cmdproc_rules::Outcome;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        sequencer: Arc<Sequencer>,
        log: Arc<InMemoryEventLog>,
        model: Arc<InMemoryReadModel>,
    }

    fn harness(registry: RuleRegistry) -> Harness {
        let log = Arc::new(InMemoryEventLog::new());
        let model = Arc::new(InMemoryReadModel::new());
        let sequencer = Sequencer::new(Arc::new(registry), model.clone(), log.clone(), log.clone())
            .with_retry(RetryPolicy::forever(Duration::from_millis(1)))
            .with_reprocess_delay(Duration::from_millis(1));
        Harness {
            sequencer: Arc::new(sequencer),
            log,
            model,
        }
    }

    /// Registry whose only rule counts evaluations and emits one event.
    fn counting(calls: Arc<AtomicUsize>, succeed: bool) -> RuleRegistry {
        RuleRegistry::new().with("count", move |_: serde_json::Value, _: &cmdproc_events::AuthContext| {
            calls.fetch_add(1, Ordering::SeqCst);
            if succeed {
                Outcome::succeeded([Event::new("counted", json!({}))])
            } else {
                Outcome::failed("counted")
            }
        })
    }

    fn queued(command_type: &str, data: serde_json::Value) -> QueuedCommand {
        QueuedCommand::new(CommandId::new(), command_type, data, 1)
    }

    /// Log and queue whose first appends and failure reports error out.
    struct FlakyLog {
        inner: Arc<InMemoryEventLog>,
        appends_to_fail: AtomicUsize,
        reports_to_fail: AtomicUsize,
    }

    impl FlakyLog {
        fn new(inner: Arc<InMemoryEventLog>, appends_to_fail: usize, reports_to_fail: usize) -> Self {
            Self {
                inner,
                appends_to_fail: AtomicUsize::new(appends_to_fail),
                reports_to_fail: AtomicUsize::new(reports_to_fail),
            }
        }

        fn trip(remaining: &AtomicUsize, operation: &str) -> Result<(), CollaboratorError> {
            match remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)) {
                Ok(_) => Err(CollaboratorError::Unavailable(format!("{operation} unavailable"))),
                Err(_) => Ok(()),
            }
        }
    }

    #[async_trait]
    impl EventLog for FlakyLog {
        async fn append(
            &self,
            command_uuid: CommandId,
            events: Vec<Event>,
            expected: ExpectedPosition,
        ) -> Result<AppendResult, CollaboratorError> {
            Self::trip(&self.appends_to_fail, "append")?;
            self.inner.append(command_uuid, events, expected).await
        }

        async fn current_position(&self) -> Result<u64, CollaboratorError> {
            self.inner.current_position().await
        }
    }

    #[async_trait]
    impl CommandQueue for FlakyLog {
        async fn status_position(&self) -> Result<u64, CollaboratorError> {
            self.inner.status_position().await
        }

        async fn pending_commands(&self) -> Result<Vec<QueuedCommand>, CollaboratorError> {
            self.inner.pending_commands().await
        }

        async fn report_failure(
            &self,
            command_uuid: CommandId,
            reason: &str,
        ) -> Result<(), CollaboratorError> {
            Self::trip(&self.reports_to_fail, "report_failure")?;
            self.inner.report_failure(command_uuid, reason).await
        }

        async fn poll_for_new(&self, status_position: u64) -> Result<(), CollaboratorError> {
            self.inner.poll_for_new(status_position).await
        }
    }

    /// Sequencer that gives up on the first collaborator error.
    fn impatient(registry: RuleRegistry, log: Arc<FlakyLog>) -> Arc<Sequencer> {
        let sequencer = Sequencer::new(
            Arc::new(registry),
            Arc::new(InMemoryReadModel::new()),
            log.clone(),
            log,
        )
        .with_retry(RetryPolicy::fixed(1, Duration::from_millis(1)))
        .with_reprocess_delay(Duration::from_millis(1));
        Arc::new(sequencer)
    }

    #[tokio::test]
    async fn buffers_until_first_position_then_releases_all() {
        let calls = Arc::new(AtomicUsize::new(0));
        let h = harness(counting(calls.clone(), false));

        let first = queued("count", json!({}));
        let second = queued("count", json!({}));
        assert!(matches!(h.sequencer.enqueue(first.clone()), Enqueued::Buffered));
        assert!(matches!(h.sequencer.enqueue(second), Enqueued::Buffered));
        assert!(matches!(h.sequencer.enqueue(first), Enqueued::Buffered));

        run_pending_tasks().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.sequencer.snapshot(), SequencerSnapshot { event_t: None, pending: 2 });

        h.sequencer.event_handled(0).unwrap();
        eventually("released commands to be rejected", || h.log.failures().len() == 2).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.sequencer.snapshot(), SequencerSnapshot { event_t: Some(0), pending: 0 });
    }

    #[tokio::test]
    async fn dispatches_immediately_once_ready() {
        let calls = Arc::new(AtomicUsize::new(0));
        let h = harness(counting(calls.clone(), true));
        h.sequencer.event_handled(0).unwrap();

        let Enqueued::Dispatched(handle) = h.sequencer.enqueue(queued("count", json!({}))) else {
            panic!("expected dispatch");
        };
        let resolution = handle.await.unwrap();

        assert_eq!(
            resolution,
            CommandResolution::Committed {
                position: 1,
                events: vec![Event::new("counted", json!({}))],
            }
        );
        assert_eq!(h.log.batches().len(), 1);
    }

    #[tokio::test]
    async fn gap_in_positions_is_a_violation_and_keeps_state() {
        let h = harness(RuleRegistry::new());

        h.sequencer.event_handled(3).unwrap();
        let err = h.sequencer.event_handled(5).unwrap_err();

        assert_eq!(err, SequenceViolation { expected: 4, found: 5 });
        assert_eq!(h.sequencer.event_t(), Some(3));
        assert!(h.sequencer.event_handled(3).is_err());
        h.sequencer.event_handled(4).unwrap();
        assert_eq!(h.sequencer.event_t(), Some(4));
    }

    #[tokio::test]
    async fn conflict_waits_for_position_then_reevaluates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let h = harness(counting(calls.clone(), true));
        for _ in 0..6 {
            h.log.append_unchecked(CommandId::new(), vec![Event::new("other", json!({}))]);
        }
        h.sequencer.event_handled(4).unwrap();

        let Enqueued::Dispatched(handle) = h.sequencer.enqueue(queued("count", json!({}))) else {
            panic!("expected dispatch");
        };

        // Appends at 5 while the log is at 6.
        eventually("first evaluation", || calls.load(Ordering::SeqCst) == 1).await;
        run_pending_tasks().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!handle.is_finished());

        // Appends at 6 while the log is at 6.
        h.sequencer.event_handled(5).unwrap();
        eventually("second evaluation", || calls.load(Ordering::SeqCst) == 2).await;
        run_pending_tasks().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!handle.is_finished());

        h.sequencer.event_handled(6).unwrap();
        let resolution = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("command should commit")
            .unwrap();

        assert!(matches!(resolution, CommandResolution::Committed { position: 7, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn invalid_commands_are_rejected_and_reported() {
        let h = harness(RuleRegistry::new());
        h.sequencer.event_handled(0).unwrap();

        let command = queued("nonsense", json!({}));
        let id = command.command_uuid;
        let resolution = h.sequencer.process(command).await;

        assert_eq!(
            resolution,
            CommandResolution::Rejected {
                reason: cmdproc_rules::INVALID_COMMAND.to_string()
            }
        );
        assert_eq!(h.log.failures()[0].command_uuid, id);
    }

    #[tokio::test]
    async fn register_against_empty_read_model_commits() {
        let h = harness(cmdproc_identity::registry());
        h.sequencer.event_handled(0).unwrap();

        let resolution = h
            .sequencer
            .process(queued(
                "register",
                json!({"user_id": "u1", "email": "a@example.com", "username": "u1name"}),
            ))
            .await;

        let CommandResolution::Committed { position, events } = resolution else {
            panic!("expected commit, got {resolution:?}");
        };
        assert_eq!(position, 1);
        assert_eq!(events[0].event_type(), "user_registered");
    }

    #[tokio::test]
    async fn register_with_taken_user_id_is_rejected() {
        let h = harness(cmdproc_identity::registry());
        h.model.insert(
            cmdproc_identity::objects::USER,
            "u1",
            json!({"user_id": "u1", "email": "x@example.com", "username": "x"}),
        );
        h.sequencer.event_handled(0).unwrap();

        let resolution = h
            .sequencer
            .process(queued(
                "register",
                json!({"user_id": "u1", "email": "a@example.com", "username": "u1name"}),
            ))
            .await;

        assert_eq!(
            resolution,
            CommandResolution::Rejected {
                reason: "user_id already taken".to_string()
            }
        );
        assert!(h.log.batches().is_empty());
    }

    #[tokio::test]
    async fn process_waits_for_readiness() {
        let calls = Arc::new(AtomicUsize::new(0));
        let h = harness(counting(calls.clone(), true));

        let task = {
            let sequencer = Arc::clone(&h.sequencer);
            tokio::spawn(async move { sequencer.process(queued("count", json!({}))).await })
        };

        run_pending_tasks().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        h.sequencer.event_handled(0).unwrap();
        let resolution = task.await.unwrap();
        assert!(matches!(resolution, CommandResolution::Committed { position: 1, .. }));
    }

    #[tokio::test]
    async fn append_errors_restart_the_command_from_evaluation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let log = Arc::new(InMemoryEventLog::new());
        let sequencer = impatient(
            counting(calls.clone(), true),
            Arc::new(FlakyLog::new(log.clone(), 2, 0)),
        );
        sequencer.event_handled(0).unwrap();

        let resolution = tokio::time::timeout(
            Duration::from_secs(2),
            sequencer.process(queued("count", json!({}))),
        )
        .await
        .expect("command should commit once the log recovers");

        assert_eq!(
            resolution,
            CommandResolution::Committed {
                position: 1,
                events: vec![Event::new("counted", json!({}))],
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(log.batches().len(), 1);
        assert!(log.failures().is_empty());
    }

    #[tokio::test]
    async fn report_failure_errors_restart_the_command_from_evaluation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let log = Arc::new(InMemoryEventLog::new());
        let sequencer = impatient(
            counting(calls.clone(), false),
            Arc::new(FlakyLog::new(log.clone(), 0, 2)),
        );
        sequencer.event_handled(0).unwrap();

        let command = queued("count", json!({}));
        let id = command.command_uuid;
        let resolution = tokio::time::timeout(Duration::from_secs(2), sequencer.process(command))
            .await
            .expect("command should be rejected once the queue recovers");

        assert_eq!(
            resolution,
            CommandResolution::Rejected {
                reason: "counted".to_string()
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(log.failures().len(), 1);
        assert_eq!(log.failures()[0].command_uuid, id);
        assert!(log.batches().is_empty());
    }
}
