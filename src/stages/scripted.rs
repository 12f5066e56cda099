//! # Scripted Stage Collaborator
//!
//! Deterministic in-process stage used by the test suites and for local
//! development without the sidecar services. The service follows a script:
//! fail the next `n` invocations, then succeed by applying a pure transform
//! to the input. Invocation counting makes cache-hit assertions possible.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::{StageKind, StageService, StageServiceError};

type Transform = dyn Fn(&str) -> String + Send + Sync;

/// Stage service with scripted failures and a pure output transform.
pub struct ScriptedStageService {
    kind: StageKind,
    transform: Arc<Transform>,
    failures_remaining: AtomicU32,
    invocations: AtomicU32,
}

impl ScriptedStageService {
    /// A service that always succeeds, deriving output from input
    pub fn new(kind: StageKind, transform: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self {
            kind,
            transform: Arc::new(transform),
            failures_remaining: AtomicU32::new(0),
            invocations: AtomicU32::new(0),
        }
    }

    /// Fail the next `count` invocations with a transient error
    pub fn fail_next(self, count: u32) -> Self {
        self.failures_remaining.store(count, Ordering::SeqCst);
        self
    }

    /// Fail every invocation from now on
    pub fn set_always_failing(&self) {
        self.failures_remaining.store(u32::MAX, Ordering::SeqCst);
    }

    /// Stop failing; subsequent invocations succeed
    pub fn set_healthy(&self) {
        self.failures_remaining.store(0, Ordering::SeqCst);
    }

    /// How many times `invoke` has actually run (cache hits do not count)
    pub fn invocation_count(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageService for ScriptedStageService {
    fn kind(&self) -> StageKind {
        self.kind
    }

    async fn invoke(&self, input: &str) -> Result<String, StageServiceError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            }
            return Err(StageServiceError::transient(
                self.kind,
                "scripted failure",
            ));
        }

        Ok((self.transform)(input))
    }
}
