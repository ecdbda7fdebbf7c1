use std::sync::Arc;

use anyhow::Context;

use cmdproc_processor::{ProcessorConfig, Service};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cmdproc_observability::init();

    let config = ProcessorConfig::from_env().context("invalid configuration")?;
    let registry = Arc::new(cmdproc_identity::registry());

    let service = Service::from_config(config, registry).context("failed to build service")?;
    service.run().await
}
