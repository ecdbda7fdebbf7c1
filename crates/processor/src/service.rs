//! Wiring: collaborators, sequencer, workers and the status endpoint.

use std::sync::Arc;

use anyhow::anyhow;
use tracing::info;

use cmdproc_infra::{
    CatchUp, CommandQueue, EventDbClient, EventLog, InMemoryEventLog, InMemoryReadModel,
    ObjectReader, ObjectReducerClient,
};
use cmdproc_rules::RuleRegistry;

use crate::config::{ConfigError, ProcessorConfig, READ_MODEL_URLS_VAR};
use crate::sequencer::Sequencer;
use crate::status;
use crate::workers::{PositionWorker, QueueWorker};

/// The external services the processor talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub reader: Arc<dyn ObjectReader>,
    /// Every read-model that must apply a position before it is reported.
    pub read_models: Vec<Arc<dyn CatchUp>>,
    pub log: Arc<dyn EventLog>,
    pub queue: Arc<dyn CommandQueue>,
}

impl Collaborators {
    /// HTTP clients for the configured event database and read-models.
    pub fn http(config: &ProcessorConfig) -> Result<Self, ConfigError> {
        let reducers: Vec<Arc<ObjectReducerClient>> = config
            .read_model_urls
            .iter()
            .map(|url| Arc::new(ObjectReducerClient::new(url.clone())))
            .collect();
        let reader = reducers
            .first()
            .cloned()
            .ok_or(ConfigError::Empty(READ_MODEL_URLS_VAR))?;
        let event_db = Arc::new(EventDbClient::new(config.event_db_url.clone()));

        Ok(Self {
            reader,
            read_models: reducers
                .into_iter()
                .map(|r| r as Arc<dyn CatchUp>)
                .collect(),
            log: event_db.clone(),
            queue: event_db,
        })
    }

    /// One in-memory event log and one in-memory read-model.
    pub fn in_memory(log: Arc<InMemoryEventLog>, read_model: Arc<InMemoryReadModel>) -> Self {
        Self {
            reader: read_model.clone(),
            read_models: vec![read_model as Arc<dyn CatchUp>],
            log: log.clone(),
            queue: log,
        }
    }
}

pub struct Service {
    sequencer: Arc<Sequencer>,
    position: PositionWorker,
    queue: QueueWorker,
    config: ProcessorConfig,
}

impl Service {
    pub fn new(
        config: ProcessorConfig,
        registry: Arc<RuleRegistry>,
        collaborators: Collaborators,
    ) -> Self {
        let sequencer = Arc::new(
            Sequencer::new(
                registry,
                collaborators.reader,
                collaborators.log.clone(),
                collaborators.queue.clone(),
            )
            .with_retry(config.retry.clone())
            .with_reprocess_delay(config.reprocess_delay),
        );
        let position = PositionWorker::new(
            sequencer.clone(),
            collaborators.log,
            collaborators.read_models,
            config.retry.clone(),
        );
        let queue = QueueWorker::new(sequencer.clone(), collaborators.queue, config.retry.clone());

        Self {
            sequencer,
            position,
            queue,
            config,
        }
    }

    /// Service talking to the configured HTTP collaborators.
    pub fn from_config(
        config: ProcessorConfig,
        registry: Arc<RuleRegistry>,
    ) -> Result<Self, ConfigError> {
        let collaborators = Collaborators::http(&config)?;
        Ok(Self::new(config, registry, collaborators))
    }

    pub fn sequencer(&self) -> Arc<Sequencer> {
        self.sequencer.clone()
    }

    /// Run until a worker stops. Only ever returns `Err`.
    pub async fn run(self) -> anyhow::Result<()> {
        let Self {
            sequencer,
            position,
            queue,
            config,
        } = self;

        info!(
            event_db = %config.event_db_url,
            read_models = ?config.read_model_urls,
            status_addr = ?config.status_addr,
            "command processor starting"
        );

        let status_endpoint = async {
            match config.status_addr {
                Some(addr) => status::serve(addr, sequencer).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            out = position.run() => {
                let Err(err) = out;
                Err(anyhow::Error::new(err).context("position worker stopped"))
            }
            out = queue.run() => {
                let Err(err) = out;
                Err(anyhow::Error::new(err).context("queue worker stopped"))
            }
            out = status_endpoint => {
                out?;
                Err(anyhow!("status endpoint stopped"))
            }
        }
    }
}
