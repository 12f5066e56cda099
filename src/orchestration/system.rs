//! # Pipeline System
//!
//! Wires the whole topology together: declares every queue idempotently,
//! builds one breaker per stage, and spawns the competing-consumer pools,
//! failure routers, DLQ observers, breaker monitors, and cache maintenance
//! tasks. All units of execution share a single shutdown signal and are
//! joined on shutdown so in-flight messages reach a terminal branch first.

use crate::cache::CacheService;
use crate::error::{PipelineError, Result};
use crate::messaging::{MessagingResult, QueueClient, StageMessage};
use crate::orchestration::consumer::{StageConsumer, StageConsumerConfig};
use crate::orchestration::failure_router::{DlqObserver, FailureRouter, FailureRouterConfig};
use crate::orchestration::topology;
use crate::resilience::{BreakerSettings, BreakerSnapshot, CircuitBreaker, RetryPolicy};
use crate::stages::{StageKind, StageService};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// System-wide tuning that is not per-stage
#[derive(Debug, Clone)]
pub struct PipelineSystemConfig {
    pub retry_policy: RetryPolicy,
    pub router: FailureRouterConfig,
    /// Sweep interval for the local cache substitute
    pub cache_eviction_interval: Duration,
    /// Ping interval of the cache connection supervisor
    pub cache_health_interval: Duration,
}

impl Default for PipelineSystemConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            router: FailureRouterConfig::default(),
            cache_eviction_interval: Duration::from_secs(60),
            cache_health_interval: Duration::from_secs(5),
        }
    }
}

struct StageRuntime {
    service: Arc<dyn StageService>,
    breaker: Arc<CircuitBreaker>,
    consumer_config: StageConsumerConfig,
}

/// The assembled pipeline: stages, routers, and shared resources.
pub struct PipelineSystem<Q: QueueClient + 'static> {
    broker: Arc<Q>,
    cache: CacheService,
    config: PipelineSystemConfig,
    stages: Vec<(StageKind, StageRuntime)>,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl<Q: QueueClient + 'static> PipelineSystem<Q> {
    pub fn new(broker: Arc<Q>, cache: CacheService, config: PipelineSystemConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            broker,
            cache,
            config,
            stages: Vec::new(),
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// Register one stage with its breaker tuning and consumer pool size.
    /// The stage kind comes from the service itself.
    pub fn register_stage(
        &mut self,
        service: Arc<dyn StageService>,
        breaker_settings: BreakerSettings,
        consumer_config: StageConsumerConfig,
    ) {
        let kind = service.kind();
        let breaker = Arc::new(CircuitBreaker::new(kind, breaker_settings));
        self.stages.push((
            kind,
            StageRuntime {
                service,
                breaker,
                consumer_config,
            },
        ));
    }

    /// The breaker guarding a stage, for health reporting and tests
    pub fn breaker(&self, stage: StageKind) -> Option<Arc<CircuitBreaker>> {
        self.stages
            .iter()
            .find(|(kind, _)| *kind == stage)
            .map(|(_, runtime)| Arc::clone(&runtime.breaker))
    }

    /// Breaker snapshots for every registered stage
    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        self.stages
            .iter()
            .map(|(_, runtime)| runtime.breaker.snapshot())
            .collect()
    }

    /// Place a fresh job on the recognition input queue. This is the hook
    /// the upload boundary (outside the core) calls.
    pub async fn submit_job(&self, source_image_ref: &str) -> MessagingResult<i64> {
        let entry = StageMessage::entry(source_image_ref);
        let payload = entry.to_json().map_err(|e| {
            crate::messaging::MessagingError::message_serialization(e.to_string())
        })?;

        let queues = topology::queues_for(StageKind::Recognition);
        self.broker.publish_json(queues.input, &payload).await
    }

    /// Declare the topology and spawn every unit of execution.
    pub async fn start(&mut self) -> Result<()> {
        for kind in StageKind::all() {
            if !self.stages.iter().any(|(k, _)| *k == kind) {
                return Err(PipelineError::configuration(format!(
                    "stage {kind} has no registered service"
                )));
            }
        }

        info!("🚀 Starting pipeline system");

        for queue_name in topology::all_queue_names() {
            self.broker.create_queue(queue_name).await?;
        }

        for (kind, runtime) in &self.stages {
            let queues = topology::queues_for(*kind);

            self.handles.push(
                Arc::clone(&runtime.breaker).spawn_monitor(self.shutdown_tx.subscribe()),
            );

            for index in 0..runtime.consumer_config.consumers.max(1) {
                let consumer = StageConsumer::new(
                    index,
                    *kind,
                    queues,
                    Arc::clone(&runtime.service),
                    Arc::clone(&runtime.breaker),
                    self.cache.clone(),
                    Arc::clone(&self.broker),
                    self.config.retry_policy,
                    runtime.consumer_config.clone(),
                );
                self.handles
                    .push(tokio::spawn(consumer.run(self.shutdown_tx.subscribe())));
            }

            let router = FailureRouter::new(
                *kind,
                queues,
                Arc::clone(&runtime.breaker),
                Arc::clone(&self.broker),
                self.config.router.clone(),
            );
            self.handles
                .push(tokio::spawn(router.run(self.shutdown_tx.subscribe())));

            let observer = DlqObserver::new(
                *kind,
                queues,
                Arc::clone(&self.broker),
                self.config.router.clone(),
            );
            self.handles
                .push(tokio::spawn(observer.run(self.shutdown_tx.subscribe())));

            info!(
                stage = %kind,
                consumers = runtime.consumer_config.consumers,
                input_queue = %queues.input,
                "Stage online"
            );
        }

        self.handles.push(self.cache.spawn_eviction(
            self.config.cache_eviction_interval,
            self.shutdown_tx.subscribe(),
        ));
        self.handles.push(self.cache.spawn_health_monitor(
            self.config.cache_health_interval,
            self.shutdown_tx.subscribe(),
        ));

        info!(tasks = self.handles.len(), "✅ Pipeline system running");
        Ok(())
    }

    /// Signal shutdown and wait for every task to finish its current
    /// message.
    pub async fn shutdown(&mut self) {
        info!("🛑 Pipeline system shutting down");
        let _ = self.shutdown_tx.send(true);

        futures::future::join_all(self.handles.drain(..)).await;

        info!("Pipeline system stopped");
    }
}
