//! Pipeline routing scenarios driven deterministically against the
//! in-memory broker: forwarding, redelivery budgets, circuit-open
//! escalation, cache hits, and error-queue recovery.

use docflow_core::cache::CacheService;
use docflow_core::messaging::{InMemoryQueueClient, QueueClient, StageMessage};
use docflow_core::orchestration::{
    all_queue_names, queues_for, ErrorRetention, FailureRouter, FailureRouterConfig,
    MessageOutcome, PipelineSystem, PipelineSystemConfig, RouterOutcome, StageConsumer,
    StageConsumerConfig, ERROR_QUEUE_SOURCE, RESULT_QUEUE,
};
use docflow_core::resilience::{BreakerSettings, CircuitBreaker, CircuitState, RetryPolicy};
use docflow_core::stages::{ScriptedStageService, StageKind, StageService};
use std::sync::Arc;
use std::time::Duration;

fn quick_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
    }
}

fn breaker_settings(failure_threshold: u32) -> BreakerSettings {
    BreakerSettings {
        failure_threshold,
        reset_timeout: Duration::from_millis(50),
        half_open_success_threshold: 1,
        monitor_interval: Duration::from_millis(10),
    }
}

async fn broker_with_queues() -> Arc<InMemoryQueueClient> {
    let broker = Arc::new(InMemoryQueueClient::new());
    for queue in all_queue_names() {
        broker.create_queue(queue).await.unwrap();
    }
    broker
}

fn consumer(
    stage: StageKind,
    service: &Arc<ScriptedStageService>,
    breaker: &Arc<CircuitBreaker>,
    broker: &Arc<InMemoryQueueClient>,
    cache: &CacheService,
    retry: RetryPolicy,
    cache_ttl: Option<Duration>,
) -> StageConsumer<InMemoryQueueClient> {
    StageConsumer::new(
        0,
        stage,
        queues_for(stage),
        Arc::clone(service) as Arc<dyn StageService>,
        Arc::clone(breaker),
        cache.clone(),
        Arc::clone(broker),
        retry,
        StageConsumerConfig {
            consumers: 1,
            visibility_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(10),
            cache_ttl,
        },
    )
}

async fn publish_entry(broker: &InMemoryQueueClient, queue: &str, image_ref: &str) {
    let payload = StageMessage::entry(image_ref).to_json().unwrap();
    broker.publish_json(queue, &payload).await.unwrap();
}

fn parse(payload: serde_json::Value) -> StageMessage {
    StageMessage::from_json(payload).unwrap()
}

#[tokio::test]
async fn healthy_ocr_stage_forwards_exactly_one_translation_message() {
    let broker = broker_with_queues().await;
    let cache = CacheService::local_only(Duration::from_secs(60));
    let service = Arc::new(ScriptedStageService::new(StageKind::Recognition, |input| {
        format!("text from {input}")
    }));
    let breaker = Arc::new(CircuitBreaker::new(
        StageKind::Recognition,
        breaker_settings(5),
    ));
    let ocr = consumer(
        StageKind::Recognition,
        &service,
        &breaker,
        &broker,
        &cache,
        quick_retry(3),
        None,
    );

    publish_entry(&broker, "ocr_queue", "img-1").await;

    let outcome = ocr.poll_once().await.unwrap().unwrap();
    assert_eq!(outcome, MessageOutcome::Forwarded { cached: false });

    assert_eq!(broker.depth("translation_queue"), 1);
    let forwarded = parse(broker.take_ready("translation_queue").unwrap());
    assert_eq!(
        forwarded.envelope.extracted_text.as_deref(),
        Some("text from img-1")
    );
    assert_eq!(forwarded.envelope.source_image_ref, "img-1");
    assert!(!forwarded.headers.cached);

    // The original message was acked, nothing left behind
    assert_eq!(broker.depth("ocr_queue"), 0);
    assert_eq!(broker.depth("ocr_dlq"), 0);
}

#[tokio::test]
async fn first_transient_failure_requeues_exactly_once_then_dead_letters() {
    let broker = broker_with_queues().await;
    let cache = CacheService::local_only(Duration::from_secs(60));
    let service = Arc::new(
        ScriptedStageService::new(StageKind::Translation, |s| s.to_string()).fail_next(u32::MAX),
    );
    let breaker = Arc::new(CircuitBreaker::new(
        StageKind::Translation,
        breaker_settings(100),
    ));
    let translation = consumer(
        StageKind::Translation,
        &service,
        &breaker,
        &broker,
        &cache,
        quick_retry(1),
        None,
    );

    let envelope = StageMessage::entry("img-2")
        .envelope
        .with_stage_output(StageKind::Recognition, "hello".into());
    let payload = StageMessage::forward(envelope, 0, false).to_json().unwrap();
    broker
        .publish_json("translation_queue", &payload)
        .await
        .unwrap();

    // First failure: requeued, never straight to the DLQ
    let first = translation.poll_once().await.unwrap().unwrap();
    assert_eq!(first, MessageOutcome::Requeued);
    assert_eq!(broker.depth("translation_queue"), 1);
    assert_eq!(broker.depth("translation_dlq"), 0);

    // Redelivered failure: dead-lettered and acked, never requeued again
    let second = translation.poll_once().await.unwrap().unwrap();
    assert_eq!(second, MessageOutcome::DeadLettered);
    assert_eq!(broker.depth("translation_queue"), 0);

    let terminal = parse(broker.take_ready("translation_dlq").unwrap());
    assert!(terminal.headers.error.is_some());
    assert_eq!(terminal.envelope.extracted_text.as_deref(), Some("hello"));
}

#[tokio::test]
async fn circuit_opens_after_threshold_and_routes_to_error_queue_without_invoking() {
    let broker = broker_with_queues().await;
    let cache = CacheService::local_only(Duration::from_secs(60));
    let service = Arc::new(
        ScriptedStageService::new(StageKind::Translation, |s| s.to_string()).fail_next(u32::MAX),
    );
    let breaker = Arc::new(CircuitBreaker::new(
        StageKind::Translation,
        BreakerSettings {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            half_open_success_threshold: 2,
            monitor_interval: Duration::from_secs(5),
        },
    ));
    // Five attempts on the first delivery produce exactly five consecutive
    // failures, opening the circuit mid-sequence.
    let translation = consumer(
        StageKind::Translation,
        &service,
        &breaker,
        &broker,
        &cache,
        quick_retry(5),
        None,
    );

    let envelope = StageMessage::entry("img-3")
        .envelope
        .with_stage_output(StageKind::Recognition, "hello".into());
    let payload = StageMessage::forward(envelope.clone(), 0, false)
        .to_json()
        .unwrap();
    broker
        .publish_json("translation_queue", &payload)
        .await
        .unwrap();

    let first = translation.poll_once().await.unwrap().unwrap();
    assert_eq!(first, MessageOutcome::Requeued);
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(service.invocation_count(), 5);

    // Sixth call fails fast: no sixth invocation, message to the error queue
    let second = translation.poll_once().await.unwrap().unwrap();
    assert_eq!(second, MessageOutcome::RoutedToErrorQueue);
    assert_eq!(service.invocation_count(), 5);

    let errored = parse(broker.take_ready("translation_error_queue").unwrap());
    assert_eq!(errored.headers.error.as_deref(), Some("circuit open"));
    // The envelope travels unmodified
    assert_eq!(errored.envelope, envelope);
    assert_eq!(broker.depth("translation_queue"), 0);
    assert_eq!(broker.depth("translation_dlq"), 0);
}

#[tokio::test]
async fn identical_input_submitted_twice_invokes_recognition_once() {
    let broker = broker_with_queues().await;
    let cache = CacheService::local_only(Duration::from_secs(60));
    let service = Arc::new(ScriptedStageService::new(StageKind::Recognition, |input| {
        format!("text from {input}")
    }));
    let breaker = Arc::new(CircuitBreaker::new(
        StageKind::Recognition,
        breaker_settings(5),
    ));
    let ocr = consumer(
        StageKind::Recognition,
        &service,
        &breaker,
        &broker,
        &cache,
        quick_retry(3),
        Some(Duration::from_secs(60)),
    );

    publish_entry(&broker, "ocr_queue", "img-7").await;
    publish_entry(&broker, "ocr_queue", "img-7").await;

    let first = ocr.poll_once().await.unwrap().unwrap();
    assert_eq!(first, MessageOutcome::Forwarded { cached: false });
    let second = ocr.poll_once().await.unwrap().unwrap();
    assert_eq!(second, MessageOutcome::Forwarded { cached: true });

    // The external operation ran exactly once in total
    assert_eq!(service.invocation_count(), 1);

    let first_out = parse(broker.take_ready("translation_queue").unwrap());
    let second_out = parse(broker.take_ready("translation_queue").unwrap());
    assert!(!first_out.headers.cached);
    assert!(second_out.headers.cached);
    assert_eq!(
        first_out.envelope.extracted_text,
        second_out.envelope.extracted_text
    );
}

#[tokio::test]
async fn cache_is_not_written_when_the_invocation_fails() {
    let broker = broker_with_queues().await;
    let cache = CacheService::local_only(Duration::from_secs(60));
    let service = Arc::new(
        ScriptedStageService::new(StageKind::Recognition, |input| format!("text from {input}"))
            .fail_next(1),
    );
    let breaker = Arc::new(CircuitBreaker::new(
        StageKind::Recognition,
        breaker_settings(5),
    ));
    let ocr = consumer(
        StageKind::Recognition,
        &service,
        &breaker,
        &broker,
        &cache,
        quick_retry(1),
        Some(Duration::from_secs(60)),
    );

    publish_entry(&broker, "ocr_queue", "img-8").await;
    assert_eq!(
        ocr.poll_once().await.unwrap().unwrap(),
        MessageOutcome::Requeued
    );

    // The redelivery succeeds and must actually invoke: nothing was cached
    // by the failed attempt.
    assert_eq!(
        ocr.poll_once().await.unwrap().unwrap(),
        MessageOutcome::Forwarded { cached: false }
    );
    assert_eq!(service.invocation_count(), 2);
}

#[tokio::test]
async fn message_missing_its_stage_input_dead_letters_without_invocation() {
    let broker = broker_with_queues().await;
    let cache = CacheService::local_only(Duration::from_secs(60));
    let service = Arc::new(ScriptedStageService::new(StageKind::Translation, |s| {
        s.to_string()
    }));
    let breaker = Arc::new(CircuitBreaker::new(
        StageKind::Translation,
        breaker_settings(5),
    ));
    let translation = consumer(
        StageKind::Translation,
        &service,
        &breaker,
        &broker,
        &cache,
        quick_retry(3),
        None,
    );

    // An entry message has no extracted text yet; the translation stage
    // cannot process it.
    publish_entry(&broker, "translation_queue", "img-9").await;

    let outcome = translation.poll_once().await.unwrap().unwrap();
    assert_eq!(outcome, MessageOutcome::DeadLettered);
    assert_eq!(service.invocation_count(), 0);

    let terminal = parse(broker.take_ready("translation_dlq").unwrap());
    assert!(terminal
        .headers
        .error
        .unwrap()
        .contains("missing stage input"));
}

#[tokio::test]
async fn failure_router_reinjects_once_the_circuit_closes() {
    let broker = broker_with_queues().await;
    let breaker = Arc::new(CircuitBreaker::new(
        StageKind::Translation,
        breaker_settings(5),
    ));
    let router = FailureRouter::new(
        StageKind::Translation,
        queues_for(StageKind::Translation),
        Arc::clone(&breaker),
        Arc::clone(&broker),
        FailureRouterConfig::default(),
    );

    let envelope = StageMessage::entry("img-4")
        .envelope
        .with_stage_output(StageKind::Recognition, "hello".into());
    let errored = StageMessage::forward(envelope, 3, false).with_error("circuit open", 3);
    broker
        .publish_json("translation_error_queue", &errored.to_json().unwrap())
        .await
        .unwrap();

    assert_eq!(breaker.state(), CircuitState::Closed);
    let outcome = router.drain_once().await.unwrap().unwrap();
    assert_eq!(outcome, RouterOutcome::Reinjected);

    let reinjected = parse(broker.take_ready("translation_queue").unwrap());
    assert_eq!(
        reinjected.headers.retried_from.as_deref(),
        Some(ERROR_QUEUE_SOURCE)
    );
    assert!(reinjected.headers.error.is_none());
    assert_eq!(broker.depth("translation_error_queue"), 0);
}

#[tokio::test]
async fn failure_router_retention_is_an_explicit_choice_while_circuit_open() {
    let broker = broker_with_queues().await;
    let breaker = Arc::new(CircuitBreaker::new(
        StageKind::Translation,
        breaker_settings(1),
    ));
    // Open the circuit
    let _ = breaker
        .execute(|| async { Err::<(), _>("down".to_string()) })
        .await;
    assert_eq!(breaker.state(), CircuitState::Open);

    let errored = StageMessage::entry("img-5").with_error("circuit open", 1);
    let payload = errored.to_json().unwrap();

    // Drop: the source system's lossy behavior
    let dropping = FailureRouter::new(
        StageKind::Translation,
        queues_for(StageKind::Translation),
        Arc::clone(&breaker),
        Arc::clone(&broker),
        FailureRouterConfig {
            retention: ErrorRetention::Drop,
            ..FailureRouterConfig::default()
        },
    );
    broker
        .publish_json("translation_error_queue", &payload)
        .await
        .unwrap();
    assert_eq!(
        dropping.drain_once().await.unwrap().unwrap(),
        RouterOutcome::Dropped
    );
    assert_eq!(broker.depth("translation_error_queue"), 0);
    assert_eq!(broker.depth("translation_queue"), 0);

    // Hold: keep the message queued until the circuit closes
    let holding = FailureRouter::new(
        StageKind::Translation,
        queues_for(StageKind::Translation),
        Arc::clone(&breaker),
        Arc::clone(&broker),
        FailureRouterConfig {
            retention: ErrorRetention::Hold,
            ..FailureRouterConfig::default()
        },
    );
    broker
        .publish_json("translation_error_queue", &payload)
        .await
        .unwrap();
    assert_eq!(
        holding.drain_once().await.unwrap().unwrap(),
        RouterOutcome::Held
    );
    assert_eq!(broker.depth("translation_error_queue"), 1);
}

#[tokio::test]
async fn full_pipeline_carries_a_job_to_the_result_queue() {
    let broker = broker_with_queues().await;
    let cache = CacheService::local_only(Duration::from_secs(60));
    let mut system = PipelineSystem::new(
        Arc::clone(&broker),
        cache,
        PipelineSystemConfig::default(),
    );

    let transforms: [(StageKind, fn(&str) -> String); 3] = [
        (StageKind::Recognition, |s| format!("text({s})")),
        (StageKind::Translation, |s| format!("vi({s})")),
        (StageKind::Rendering, |_| "output-1.pdf".to_string()),
    ];
    for (kind, transform) in transforms {
        system.register_stage(
            Arc::new(ScriptedStageService::new(kind, transform)),
            BreakerSettings::default(),
            StageConsumerConfig {
                consumers: 2,
                visibility_timeout: Duration::from_secs(30),
                poll_interval: Duration::from_millis(10),
                cache_ttl: None,
            },
        );
    }

    system.start().await.unwrap();
    system.submit_job("img-1.png").await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(payload) = broker.take_ready(RESULT_QUEUE) {
                return parse(payload);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job should reach the result queue");

    assert_eq!(result.envelope.source_image_ref, "img-1.png");
    assert_eq!(
        result.envelope.extracted_text.as_deref(),
        Some("text(img-1.png)")
    );
    assert_eq!(
        result.envelope.translated_text.as_deref(),
        Some("vi(text(img-1.png))")
    );
    assert_eq!(
        result.envelope.rendered_artifact_ref.as_deref(),
        Some("output-1.pdf")
    );

    system.shutdown().await;
}
