#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, pgmq in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Docflow Core
//!
//! Resilient staged-pipeline orchestration for image-to-translated-document
//! processing. A job (an uploaded image reference) moves forward through
//! recognition, translation, and rendering stages, each executing
//! asynchronously behind a durable message queue. Intermittent stage
//! failures must never cascade into permanent outages or data loss; this
//! crate is the layer that guarantees that.
//!
//! ## Architecture
//!
//! - [`resilience`] - per-stage circuit breaker and retry-with-backoff;
//!   retry wraps the breaker, so a circuit opening mid-sequence fails fast
//! - [`cache`] - content-addressed memoization of stage outputs with a
//!   Redis primary and a process-local fallback
//! - [`messaging`] - the queue broker protocol, message formats, and the
//!   pgmq-backed and in-memory broker clients
//! - [`stages`] - the opaque external-collaborator contract and its HTTP
//!   and scripted implementations
//! - [`orchestration`] - the fixed queue topology, the competing stage
//!   consumers, the failure router (error queue → DLQ), and system assembly
//! - [`config`] - explicit, validated configuration with documented defaults
//! - [`logging`] - structured console + JSON file logging
//!
//! ## Failure escalation
//!
//! A stage failure takes exactly one of three sideways paths: circuit-open
//! failures go to the stage's error queue (and return to the input queue
//! once the circuit closes), first-time transient failures get one broker
//! redelivery, and everything terminal lands in the stage's dead-letter
//! queue, which is never auto-replayed.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use docflow_core::cache::CacheService;
//! use docflow_core::messaging::InMemoryQueueClient;
//! use docflow_core::orchestration::{
//!     PipelineSystem, PipelineSystemConfig, StageConsumerConfig,
//! };
//! use docflow_core::resilience::BreakerSettings;
//! use docflow_core::stages::{ScriptedStageService, StageKind};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> docflow_core::error::Result<()> {
//! let broker = Arc::new(InMemoryQueueClient::new());
//! let cache = CacheService::local_only(Duration::from_secs(3600));
//! let mut system = PipelineSystem::new(broker, cache, PipelineSystemConfig::default());
//!
//! for kind in StageKind::all() {
//!     let service = Arc::new(ScriptedStageService::new(kind, |input| input.to_uppercase()));
//!     system.register_stage(service, BreakerSettings::default(), StageConsumerConfig::default());
//! }
//!
//! system.start().await?;
//! system.submit_job("img-1.png").await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod orchestration;
pub mod resilience;
pub mod stages;

pub use error::{PipelineError, Result};
