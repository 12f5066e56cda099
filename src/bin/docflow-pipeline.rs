//! Pipeline daemon: loads configuration, connects the broker and cache, and
//! runs every stage's consumer pool until interrupted.

use anyhow::Context;
use docflow_core::cache::CacheService;
use docflow_core::config::ConfigManager;
use docflow_core::logging::init_structured_logging;
use docflow_core::messaging::PgmqClient;
use docflow_core::orchestration::{PipelineSystem, PipelineSystemConfig};
use docflow_core::stages::{HttpStageService, StageKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging();

    let manager = ConfigManager::load().context("loading configuration")?;
    let config = manager.config();
    info!(environment = %manager.environment(), "Starting docflow pipeline");

    let broker = Arc::new(
        PgmqClient::new(&config.database.url)
            .await
            .context("connecting to pgmq broker")?,
    );
    let cache = CacheService::connect(
        &config.cache.url,
        Duration::from_secs(config.cache.default_ttl_seconds),
    )
    .await;

    let system_config: PipelineSystemConfig = config.to_system_config();
    let mut system = PipelineSystem::new(broker, cache, system_config);

    for kind in StageKind::all() {
        let stage_config = config.stages.stage(kind);

        let mut service = HttpStageService::new(kind, stage_config.endpoint.clone());
        if let Some(root) = &stage_config.resource_root {
            service = service.with_resource_root(root.clone());
        }

        system.register_stage(
            Arc::new(service),
            config.circuit_breaker.settings_for(kind),
            stage_config.to_consumer_config(),
        );
    }

    system.start().await.context("starting pipeline system")?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Interrupt received");

    system.shutdown().await;
    Ok(())
}
