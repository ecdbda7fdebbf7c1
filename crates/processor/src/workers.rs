//! Background loops feeding the sequencer.
//!
//! - [`PositionWorker`] follows the read-models and reports each position
//!   once all of them have applied it.
//! - [`QueueWorker`] follows the command queue and enqueues pending commands.
//!
//! Both run until an unrecoverable error; neither has a shutdown signal.

use std::convert::Infallible;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use cmdproc_infra::{CatchUp, CollaboratorError, CommandQueue, EventLog, RetryPolicy};

use crate::error::WorkerError;
use crate::sequencer::{Enqueued, Sequencer};

pub struct PositionWorker {
    sequencer: Arc<Sequencer>,
    log: Arc<dyn EventLog>,
    read_models: Vec<Arc<dyn CatchUp>>,
    retry: RetryPolicy,
}

impl PositionWorker {
    pub fn new(
        sequencer: Arc<Sequencer>,
        log: Arc<dyn EventLog>,
        read_models: Vec<Arc<dyn CatchUp>>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            sequencer,
            log,
            read_models,
            retry,
        }
    }

    /// Start at the log's current position and report every position in
    /// order. Returns only on a sequencing violation (or when a bounded retry
    /// policy gives up).
    pub async fn run(self) -> Result<Infallible, WorkerError> {
        let mut event_t = self
            .retry
            .run("current_position", || self.log.current_position())
            .await?;
        self.log_progress(event_t).await;

        loop {
            debug!(event_t, "waiting for read-models");
            self.catch_up(event_t).await?;
            debug!(event_t, "read-models caught up");
            self.sequencer.event_handled(event_t)?;
            event_t += 1;
        }
    }

    /// One-off startup report of how far behind each read-model is.
    async fn log_progress(&self, event_t: u64) {
        for model in &self.read_models {
            match model.applied_position().await {
                Ok(applied) => info!(read_model = model.name(), applied, event_t, "read-model progress"),
                Err(err) => warn!(read_model = model.name(), error = %err, "read-model progress unknown"),
            }
        }
    }

    /// Wait on every read-model concurrently.
    async fn catch_up(&self, event_t: u64) -> Result<(), CollaboratorError> {
        let mut waits = JoinSet::new();
        for model in &self.read_models {
            let model = Arc::clone(model);
            let retry = self.retry.clone();
            waits.spawn(async move {
                retry.run("wait_for", || model.wait_for(event_t)).await
            });
        }

        while let Some(joined) = waits.join_next().await {
            joined.map_err(|e| CollaboratorError::Unavailable(format!("catch-up task: {e}")))??;
        }
        Ok(())
    }
}

pub struct QueueWorker {
    sequencer: Arc<Sequencer>,
    queue: Arc<dyn CommandQueue>,
    retry: RetryPolicy,
}

impl QueueWorker {
    pub fn new(sequencer: Arc<Sequencer>, queue: Arc<dyn CommandQueue>, retry: RetryPolicy) -> Self {
        Self {
            sequencer,
            queue,
            retry,
        }
    }

    /// Enqueue what is pending now, then once per queue status change.
    ///
    /// Each dispatched batch is awaited before polling again. Commands still
    /// buffered or in flight may be fetched again; the sequencer buffers a
    /// command only once and the event log decides duplicates.
    pub async fn run(self) -> Result<Infallible, WorkerError> {
        let mut status_t = self
            .retry
            .run("status_position", || self.queue.status_position())
            .await?;
        info!(status_t, "following command queue");
        self.enqueue_pending().await?;

        loop {
            status_t += 1;
            self.retry
                .run("poll_for_new", || self.queue.poll_for_new(status_t))
                .await?;
            self.enqueue_pending().await?;
        }
    }

    async fn enqueue_pending(&self) -> Result<(), CollaboratorError> {
        let commands = self
            .retry
            .run("pending_commands", || self.queue.pending_commands())
            .await?;
        debug!(count = commands.len(), "fetched pending commands");

        let mut batch = Vec::new();
        for command in commands {
            if let Enqueued::Dispatched(handle) = self.sequencer.enqueue(command) {
                batch.push(handle);
            }
        }

        for handle in batch {
            if let Err(err) = handle.await {
                warn!(error = %err, "command task failed");
            }
        }
        Ok(())
    }
}
