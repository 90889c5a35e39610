//! Call chain execution.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::chain::hop::{Hop, HopContext, HopFailure, HopOutcome, HopSpec, Requirement};
use crate::observability::logging::LogScope;
use crate::observability::span::{Span, SpanKind, SpanStatus};
use crate::observability::Telemetry;
use crate::resilience::timeouts;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("required hop '{operation}' failed: {failure}")]
    RequiredHopFailure {
        operation: &'static str,
        failure: HopFailure,
    },

    #[error("call chain aborted by an earlier required hop failure")]
    Aborted,

    #[error("hop '{operation}' does not match the declared plan")]
    UnexpectedHop { operation: &'static str },

    #[error("call chain used before its trace context was bound")]
    Unbound,

    #[error("call chain already responded")]
    Finished,
}

/// Lifecycle of one inbound request's chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Received,
    ContextBound,
    /// Number of hops started so far.
    Hop(usize),
    Responded,
    Aborted,
}

/// Terminal outcome of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutcome {
    Success,
    /// Every required hop succeeded but at least one optional hop did not.
    Degraded,
    RequiredHopFailure,
}

impl ChainOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainOutcome::Success => "success",
            ChainOutcome::Degraded => "degraded",
            ChainOutcome::RequiredHopFailure => "required_hop_failure",
        }
    }
}

impl fmt::Display for ChainOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    pub name: &'static str,
    pub outcome: ChainOutcome,
    pub hops: Vec<Hop>,
}

impl ChainReport {
    pub fn is_degraded(&self) -> bool {
        self.outcome == ChainOutcome::Degraded
    }
}

/// Everything a chain needs from the request it serves.
#[derive(Clone)]
pub struct ChainBinding {
    pub telemetry: Telemetry,
    pub root: Span,
    pub request_id: Option<String>,
    pub hop_timeout: Duration,
}

impl ChainBinding {
    pub fn new(telemetry: &Telemetry, root: &Span, scope: &LogScope, hop_timeout: Duration) -> Self {
        Self {
            telemetry: telemetry.clone(),
            root: root.clone(),
            request_id: Some(scope.request_id().to_string()),
            hop_timeout,
        }
    }
}

/// Runs a declared plan of downstream hops for one inbound request.
///
/// Hops run strictly in declared order. A failed required hop aborts the
/// chain: the root span is marked as failed and every later hop is skipped
/// without running its closure. A failed optional hop only degrades the
/// result.
pub struct CallChain {
    name: &'static str,
    hops: Vec<Hop>,
    cursor: usize,
    state: ChainState,
    binding: Option<ChainBinding>,
}

impl CallChain {
    pub fn new(name: &'static str, plan: &[HopSpec]) -> Self {
        Self {
            name,
            hops: plan
                .iter()
                .map(|spec| Hop {
                    spec: *spec,
                    outcome: HopOutcome::Pending,
                })
                .collect(),
            cursor: 0,
            state: ChainState::Received,
            binding: None,
        }
    }

    /// Attach the request's root span and telemetry.
    pub fn bind(&mut self, binding: ChainBinding) {
        if self.state == ChainState::Received {
            self.binding = Some(binding);
            self.state = ChainState::ContextBound;
        }
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    /// Run the next hop; its failure aborts the chain.
    pub async fn required<T, F, Fut>(
        &mut self,
        operation: &'static str,
        call: F,
    ) -> Result<T, ChainError>
    where
        F: FnOnce(HopContext) -> Fut,
        Fut: Future<Output = Result<T, HopFailure>>,
    {
        let index = self.advance(operation, Requirement::Required)?;
        match self.execute(index, call).await {
            Ok(value) => Ok(value),
            Err(failure) => Err(self.abort(index, failure)),
        }
    }

    /// Run the next hop; its failure is recorded and yields `Ok(None)`.
    pub async fn optional<T, F, Fut>(
        &mut self,
        operation: &'static str,
        call: F,
    ) -> Result<Option<T>, ChainError>
    where
        F: FnOnce(HopContext) -> Fut,
        Fut: Future<Output = Result<T, HopFailure>>,
    {
        let index = self.advance(operation, Requirement::Optional)?;
        match self.execute(index, call).await {
            Ok(value) => Ok(Some(value)),
            Err(failure) => {
                let spec = self.hops[index].spec;
                tracing::warn!(
                    chain = self.name,
                    hop = spec.operation,
                    service = spec.service.as_str(),
                    error = %failure,
                    "Optional hop failed, continuing degraded"
                );
                Ok(None)
            }
        }
    }

    /// Mark the chain as responded and summarize it.
    pub fn finish(&mut self) -> ChainReport {
        let report = self.report();
        if self.state != ChainState::Aborted {
            self.state = ChainState::Responded;
        }
        if let Some(binding) = &self.binding {
            let _ = binding
                .root
                .set_attribute("chain.outcome", report.outcome.as_str());
        }
        report
    }

    /// Current summary without changing state.
    pub fn report(&self) -> ChainReport {
        let failed = |required: bool| {
            self.hops.iter().any(|hop| {
                hop.spec.is_required() == required
                    && matches!(hop.outcome, HopOutcome::Failed | HopOutcome::TimedOut)
            })
        };
        let outcome = if self.state == ChainState::Aborted || failed(true) {
            ChainOutcome::RequiredHopFailure
        } else if failed(false) {
            ChainOutcome::Degraded
        } else {
            ChainOutcome::Success
        };
        ChainReport {
            name: self.name,
            outcome,
            hops: self.hops.clone(),
        }
    }

    fn advance(
        &mut self,
        operation: &'static str,
        requirement: Requirement,
    ) -> Result<usize, ChainError> {
        match self.state {
            ChainState::Received => return Err(ChainError::Unbound),
            ChainState::Aborted => {
                tracing::debug!(chain = self.name, hop = operation, "Skipping hop after abort");
                return Err(ChainError::Aborted);
            }
            ChainState::Responded => return Err(ChainError::Finished),
            ChainState::ContextBound | ChainState::Hop(_) => {}
        }

        let index = self.cursor;
        match self.hops.get(index) {
            Some(hop)
                if hop.spec.operation == operation && hop.spec.requirement == requirement => {}
            _ => return Err(ChainError::UnexpectedHop { operation }),
        }

        self.cursor += 1;
        self.state = ChainState::Hop(self.cursor);
        Ok(index)
    }

    async fn execute<T, F, Fut>(&mut self, index: usize, call: F) -> Result<T, HopFailure>
    where
        F: FnOnce(HopContext) -> Fut,
        Fut: Future<Output = Result<T, HopFailure>>,
    {
        let Some(binding) = self.binding.as_ref() else {
            return Err(HopFailure::Transport("call chain is not bound".to_string()));
        };
        let spec = self.hops[index].spec;

        let span = binding
            .telemetry
            .tracer()
            .span_builder(spec.operation)
            .kind(SpanKind::Client)
            .parent(Some(&binding.root.context()))
            .attribute("peer.service", spec.service.as_str())
            .attribute("hop.required", spec.is_required())
            .start();
        let context = HopContext {
            trace: span.context(),
            request_id: binding.request_id.clone(),
        };

        tracing::debug!(
            hop = spec.operation,
            service = spec.service.as_str(),
            span_id = %context.trace.span_id(),
            "Calling downstream"
        );
        let result = timeouts::with_deadline(binding.hop_timeout, call(context)).await;

        let outcome = match &result {
            Ok(_) => HopOutcome::Success,
            Err(failure) => failure.outcome(),
        };
        if let Some(label) = outcome.call_outcome() {
            binding
                .telemetry
                .metrics()
                .record_downstream_call(spec.service, label);
        }
        let status = match &result {
            Ok(_) => SpanStatus::Ok,
            Err(failure) => {
                let _ = span.set_attribute("hop.outcome", format!("{:?}", outcome));
                SpanStatus::error(failure.to_string())
            }
        };
        let _ = span.end(status);

        self.hops[index].outcome = outcome;
        result
    }

    fn abort(&mut self, index: usize, failure: HopFailure) -> ChainError {
        let spec = self.hops[index].spec;
        self.state = ChainState::Aborted;

        tracing::error!(
            chain = self.name,
            hop = spec.operation,
            service = spec.service.as_str(),
            error = %failure,
            "Required hop failed, aborting call chain"
        );
        if let Some(binding) = &self.binding {
            let _ = binding.root.set_status(SpanStatus::error(format!(
                "required hop '{}' failed: {}",
                spec.operation, failure
            )));
            let _ = binding
                .root
                .set_attribute("chain.outcome", ChainOutcome::RequiredHopFailure.as_str());
        }

        ChainError::RequiredHopFailure {
            operation: spec.operation,
            failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::labels::Downstream;
    use crate::observability::span::SpanData;
    use crate::observability::ServiceIdentity;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    const PLAN: [HopSpec; 3] = [
        HopSpec::required("user-check", Downstream::UserService),
        HopSpec::required("order-creation", Downstream::OrderService),
        HopSpec::optional("notification", Downstream::NotificationService),
    ];

    struct Harness {
        telemetry: Telemetry,
        spans: mpsc::Receiver<SpanData>,
    }

    impl Harness {
        fn new() -> Self {
            let (telemetry, spans) =
                Telemetry::in_memory(ServiceIdentity::new("api-gateway", "1.0.0", "test"), 64)
                    .unwrap();
            Self { telemetry, spans }
        }

        fn chain(&self, root: &Span, hop_timeout: Duration) -> CallChain {
            let mut chain = CallChain::new("place-order", &PLAN);
            chain.bind(ChainBinding {
                telemetry: self.telemetry.clone(),
                root: root.clone(),
                request_id: Some("req-1".to_string()),
                hop_timeout,
            });
            chain
        }

        fn drain(&mut self) -> Vec<SpanData> {
            let mut spans = Vec::new();
            while let Ok(span) = self.spans.try_recv() {
                spans.push(span);
            }
            spans
        }
    }

    #[tokio::test]
    async fn test_all_hops_succeed() {
        let mut harness = Harness::new();
        let root = harness.telemetry.tracer().start("POST /api/v1/orders", None);
        let mut chain = harness.chain(&root, Duration::from_secs(1));
        assert_eq!(chain.state(), ChainState::ContextBound);

        let user = chain.required("user-check", |_| async { Ok(1u64) }).await.unwrap();
        let order = chain
            .required("order-creation", |_| async { Ok("O1".to_string()) })
            .await
            .unwrap();
        let sent = chain.optional("notification", |_| async { Ok(true) }).await.unwrap();
        assert_eq!(chain.state(), ChainState::Hop(3));

        let report = chain.finish();
        assert_eq!((user, order.as_str(), sent), (1, "O1", Some(true)));
        assert_eq!(report.outcome, ChainOutcome::Success);
        assert!(report.hops.iter().all(|h| h.outcome == HopOutcome::Success));
        assert_eq!(chain.state(), ChainState::Responded);

        drop(root);
        let spans = harness.drain();
        assert_eq!(spans.len(), 4);
        let root_span = spans.iter().find(|s| s.parent_span_id.is_none()).unwrap();
        for span in spans.iter().filter(|s| s.parent_span_id.is_some()) {
            assert_eq!(span.trace_id, root_span.trace_id);
            assert_eq!(span.parent_span_id, Some(root_span.span_id));
            assert_eq!(span.status, SpanStatus::Ok);
        }
        assert_eq!(
            root_span.attribute("chain.outcome").map(|v| v.to_string()),
            Some("success".to_string())
        );
    }

    #[tokio::test]
    async fn test_hop_receives_its_own_span_context() {
        let mut harness = Harness::new();
        let root = harness.telemetry.tracer().start("GET /api/v1/users/{id}", None);
        let mut chain = CallChain::new(
            "get-user",
            &[HopSpec::required("user-lookup", Downstream::UserService)],
        );
        chain.bind(ChainBinding {
            telemetry: harness.telemetry.clone(),
            root: root.clone(),
            request_id: Some("req-9".to_string()),
            hop_timeout: Duration::from_secs(1),
        });

        let seen = chain
            .required("user-lookup", |hop| async move { Ok(hop) })
            .await
            .unwrap();
        let hop_span = harness.drain().pop().unwrap();

        assert_eq!(seen.trace.trace_id(), root.context().trace_id());
        assert_eq!(seen.trace.span_id(), hop_span.span_id);
        assert_eq!(seen.trace.parent_span_id(), Some(root.context().span_id()));
        assert_eq!(seen.request_id.as_deref(), Some("req-9"));
    }

    #[tokio::test]
    async fn test_required_failure_aborts_chain() {
        let mut harness = Harness::new();
        let root = harness.telemetry.tracer().start("POST /api/v1/orders", None);
        let mut chain = harness.chain(&root, Duration::from_secs(1));

        chain.required("user-check", |_| async { Ok(()) }).await.unwrap();
        let err = chain
            .required("order-creation", |_| async {
                Err::<(), _>(HopFailure::Transport("connection refused".to_string()))
            })
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ChainError::RequiredHopFailure {
                operation: "order-creation",
                failure: HopFailure::Transport("connection refused".to_string()),
            }
        );
        assert_eq!(chain.state(), ChainState::Aborted);

        let flag = AtomicBool::new(false);
        let invoked = &flag;
        let skipped = chain
            .optional("notification", |_| async move {
                invoked.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert_eq!(skipped, Err(ChainError::Aborted));
        assert!(!flag.load(Ordering::SeqCst));

        let report = chain.finish();
        assert_eq!(report.outcome, ChainOutcome::RequiredHopFailure);
        assert_eq!(report.hops[2].outcome, HopOutcome::Pending);
        assert!(root.status().is_error());

        let rendered = harness.telemetry.metrics().render();
        assert!(rendered
            .contains(r#"downstream_calls_total{service="order-service",outcome="failed"} 1"#));
        assert!(!rendered.contains("notification-service"));
        drop(root);
        assert_eq!(harness.drain().len(), 3);
    }

    #[tokio::test]
    async fn test_optional_failure_degrades() {
        let harness = Harness::new();
        let root = harness.telemetry.tracer().start("POST /api/v1/orders", None);
        let mut chain = harness.chain(&root, Duration::from_secs(1));

        chain.required("user-check", |_| async { Ok(()) }).await.unwrap();
        let order = chain
            .required("order-creation", |_| async { Ok("O123") })
            .await
            .unwrap();
        let notified = chain
            .optional("notification", |_| async {
                Err::<(), _>(HopFailure::Status(503))
            })
            .await
            .unwrap();

        let report = chain.finish();
        assert_eq!(order, "O123");
        assert_eq!(notified, None);
        assert!(report.is_degraded());
        assert_eq!(report.hops[2].outcome, HopOutcome::Failed);
        assert!(!root.status().is_error());
    }

    #[tokio::test]
    async fn test_hop_timeout_is_classified() {
        let harness = Harness::new();
        let root = harness.telemetry.tracer().start("POST /api/v1/orders", None);
        let mut chain = harness.chain(&root, Duration::from_millis(20));

        let err = chain
            .required("user-check", |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();

        match err {
            ChainError::RequiredHopFailure { failure, .. } => assert!(failure.is_timeout()),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(chain.hops()[0].outcome, HopOutcome::TimedOut);
        assert!(harness
            .telemetry
            .metrics()
            .render()
            .contains(r#"downstream_calls_total{service="user-service",outcome="timed_out"} 1"#));
    }

    #[tokio::test]
    async fn test_plan_order_enforced() {
        let harness = Harness::new();
        let root = harness.telemetry.tracer().start("POST /api/v1/orders", None);

        let mut unbound = CallChain::new("place-order", &PLAN);
        assert_eq!(
            unbound.required("user-check", |_| async { Ok(()) }).await,
            Err(ChainError::Unbound)
        );

        let mut chain = harness.chain(&root, Duration::from_secs(1));
        assert_eq!(
            chain.required("order-creation", |_| async { Ok(()) }).await,
            Err(ChainError::UnexpectedHop {
                operation: "order-creation"
            })
        );
        assert_eq!(
            chain.optional("user-check", |_| async { Ok(()) }).await,
            Err(ChainError::UnexpectedHop {
                operation: "user-check"
            })
        );
        // A rejected call does not consume the hop.
        assert!(chain.required("user-check", |_| async { Ok(()) }).await.is_ok());
    }
}
