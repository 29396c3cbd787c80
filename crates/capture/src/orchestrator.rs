//! Capture-and-maybe-deliver, invoked by manual requests, timers and activity signals.

use pagesync_core::{Error, ModelId, Outcome, RequesterId, Result, Target, TargetId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::filename::sanitize_filename;
use crate::gate::FingerprintGate;
use crate::host::{DeliverySink, TargetHost};
use crate::pipeline::ExtractionPipeline;
use crate::registry::DebugSessionRegistry;

/// One finished capture, as broadcast to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeEvent {
    pub target: TargetId,
    pub model: ModelId,
    pub automatic: bool,
    pub outcome: Outcome,
}

/// A capture request as issued from the outside.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// Defaults to the active target.
    pub target: Option<TargetId>,
    /// Defaults to the panel bound to the target.
    pub requester: Option<RequesterId>,
    pub model: ModelId,
    pub automatic: bool,
    /// Drop the requester's session reference once the capture finished.
    pub release_after: bool,
}

impl CaptureRequest {
    pub fn manual(model: impl Into<ModelId>) -> Self {
        Self {
            target: None,
            requester: None,
            model: model.into(),
            automatic: false,
            release_after: false,
        }
    }
}

pub struct CaptureOrchestrator {
    pipeline: Arc<ExtractionPipeline>,
    gate: Arc<FingerprintGate>,
    sink: Arc<dyn DeliverySink>,
    outcomes: Mutex<HashMap<(TargetId, ModelId), Outcome>>,
    events: broadcast::Sender<OutcomeEvent>,
}

impl CaptureOrchestrator {
    pub fn new(
        pipeline: Arc<ExtractionPipeline>,
        gate: Arc<FingerprintGate>,
        sink: Arc<dyn DeliverySink>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            pipeline,
            gate,
            sink,
            outcomes: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn registry(&self) -> &Arc<DebugSessionRegistry> {
        self.pipeline.registry()
    }

    pub fn host(&self) -> &Arc<dyn TargetHost> {
        self.pipeline.host()
    }

    pub fn gate(&self) -> &Arc<FingerprintGate> {
        &self.gate
    }

    fn outcomes(&self) -> MutexGuard<'_, HashMap<(TargetId, ModelId), Outcome>> {
        self.outcomes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Resolve defaults, capture, and optionally drop the session afterwards.
    pub async fn capture(&self, request: CaptureRequest) -> Result<(TargetId, Outcome)> {
        let target = match request.target {
            Some(id) => id,
            None => self.host().query_active().await?.id,
        };
        let requester = request
            .requester
            .unwrap_or_else(|| RequesterId::for_panel(&target));

        let outcome = self
            .capture_and_deliver(&target, &requester, &request.model, request.automatic)
            .await;

        if request.release_after {
            self.registry().release(&target, &requester).await;
        }
        Ok((target, outcome))
    }

    pub async fn capture_and_deliver(
        &self,
        target: &TargetId,
        requester: &RequesterId,
        model: &ModelId,
        automatic: bool,
    ) -> Outcome {
        let outcome = match self.run(target, requester, model, automatic).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(target = %target, model = %model, automatic, error = %e, "Capture failed");
                Outcome::Failed {
                    reason: e.user_message(),
                }
            }
        };

        self.outcomes()
            .insert((target.clone(), model.clone()), outcome.clone());
        let _ = self.events.send(OutcomeEvent {
            target: target.clone(),
            model: model.clone(),
            automatic,
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn run(
        &self,
        target: &TargetId,
        requester: &RequesterId,
        model: &ModelId,
        automatic: bool,
    ) -> Result<Outcome> {
        let page = self.resolve(target).await?;
        let result = self.pipeline.extract(&page, requester).await?;

        if !self
            .gate
            .should_deliver(target, model, &result.address, &result.fingerprint_text, automatic)
        {
            debug!(target = %target, model = %model, "Content unchanged, skipping delivery");
            return Ok(Outcome::SkippedUnchanged);
        }

        let filename = result
            .filename
            .clone()
            .unwrap_or_else(|| sanitize_filename(&result.title));
        self.sink
            .deliver(&result.bytes, &filename, target, model)
            .await?;
        self.gate
            .record(target, model, &result.address, &result.fingerprint_text);

        info!(target = %target, model = %model, filename = %filename, automatic, "Capture delivered");
        Ok(Outcome::Delivered { filename })
    }

    async fn resolve(&self, target: &TargetId) -> Result<Target> {
        let not_found = || Error::NotFound("Target page not found".to_string());
        let page = self.host().get(target).await.map_err(|e| {
            debug!(target = %target, error = %e, "Target lookup failed");
            not_found()
        })?;
        if !page.is_capturable() {
            return Err(not_found());
        }
        Ok(page)
    }

    /// Most recent outcome for the pair, if any capture ran.
    pub fn outcome(&self, target: &TargetId, model: &ModelId) -> Option<Outcome> {
        self.outcomes()
            .get(&(target.clone(), model.clone()))
            .cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutcomeEvent> {
        self.events.subscribe()
    }

    pub fn forget_target(&self, target: &TargetId) {
        self.outcomes().retain(|(t, _), _| t != target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{commands, AttachError};
    use crate::testing::{eval_result, FakeCapability, FakeFetcher, FakeHost, FakeSink};
    use pagesync_core::config::CaptureConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        host: Arc<FakeHost>,
        cap: Arc<FakeCapability>,
        sink: Arc<FakeSink>,
        orchestrator: CaptureOrchestrator,
    }

    fn fixture(target: Target) -> Fixture {
        let host = Arc::new(FakeHost::with_target(target));
        let cap = Arc::new(FakeCapability::default());
        let sink = Arc::new(FakeSink::default());
        let registry = Arc::new(DebugSessionRegistry::new(cap.clone()));
        let pipeline = Arc::new(ExtractionPipeline::new(
            registry,
            host.clone(),
            Arc::new(FakeFetcher::failing("offline")),
            CaptureConfig::default(),
        ));
        let orchestrator =
            CaptureOrchestrator::new(pipeline, Arc::new(FingerprintGate::new()), sink.clone());
        Fixture {
            host,
            cap,
            sink,
            orchestrator,
        }
    }

    fn ids() -> (TargetId, RequesterId, ModelId) {
        (
            TargetId::from("1"),
            RequesterId::from("101"),
            ModelId::from("chatgpt"),
        )
    }

    #[tokio::test]
    async fn test_manual_capture_delivers_with_title_filename() {
        let f = fixture(Target::new("1", "https://test.com", "Hello World!"));
        let (t, r, m) = ids();

        let outcome = f.orchestrator.capture_and_deliver(&t, &r, &m, false).await;
        assert_eq!(
            outcome,
            Outcome::Delivered {
                filename: "Hello_World_.pdf".into()
            }
        );
        assert_eq!(f.sink.deliveries()[0].0, "Hello_World_.pdf");
        assert_eq!(f.orchestrator.outcome(&t, &m), Some(outcome));

        // Manual intent overrides dedup.
        let again = f.orchestrator.capture_and_deliver(&t, &r, &m, false).await;
        assert!(again.is_delivered());
        assert_eq!(f.sink.deliveries().len(), 2);
    }

    #[tokio::test]
    async fn test_automatic_capture_skips_unchanged() {
        let f = fixture(Target::new("1", "https://test.com", "Page"));
        let (t, r, m) = ids();

        assert!(f.orchestrator.capture_and_deliver(&t, &r, &m, true).await.is_delivered());
        let second = f.orchestrator.capture_and_deliver(&t, &r, &m, true).await;
        assert_eq!(second, Outcome::SkippedUnchanged);
        assert_eq!(f.sink.deliveries().len(), 1);
        // The session stays held for the requester between captures.
        assert_eq!(f.cap.attach_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_delivery_does_not_record() {
        let f = fixture(Target::new("1", "https://test.com", "Page"));
        let (t, r, m) = ids();
        f.sink.set_failing(true);

        let outcome = f.orchestrator.capture_and_deliver(&t, &r, &m, true).await;
        assert!(matches!(outcome, Outcome::Failed { ref reason } if reason.contains("drop target")));
        assert!(f.orchestrator.gate().last(&t, &m).is_none());

        f.sink.set_failing(false);
        let retry = f.orchestrator.capture_and_deliver(&t, &r, &m, true).await;
        assert!(retry.is_delivered());
    }

    #[tokio::test]
    async fn test_unknown_and_restricted_targets_fail() {
        let f = fixture(Target::new("1", "chrome://settings", "Settings"));
        let (t, r, m) = ids();

        let outcome = f.orchestrator.capture_and_deliver(&t, &r, &m, false).await;
        assert_eq!(
            outcome,
            Outcome::Failed {
                reason: "Not found: Target page not found".into()
            }
        );
        let missing = f
            .orchestrator
            .capture_and_deliver(&TargetId::from("404"), &r, &m, false)
            .await;
        assert!(matches!(missing, Outcome::Failed { .. }));
        assert_eq!(f.cap.attach_count(), 0);
    }

    #[tokio::test]
    async fn test_conflict_surfaces_actionable_reason() {
        let f = fixture(Target::new("1", "https://test.com", "Page"));
        f.cap.fail_attach_with(AttachError::CapabilityConflict(
            "Cannot access a chrome-extension:// URL of different extension".into(),
        ));
        let (t, r, m) = ids();

        let outcome = f.orchestrator.capture_and_deliver(&t, &r, &m, false).await;
        match outcome {
            Outcome::Failed { reason } => assert!(reason.contains("another extension")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!f.orchestrator.registry().is_held(&t));
    }

    #[tokio::test]
    async fn test_overlapping_automatic_captures_deliver_once() {
        let f = fixture(Target::new("B", "https://b.example", "B page"));
        let t = TargetId::from("B");
        let m = ModelId::from("chatgpt");
        f.orchestrator
            .gate()
            .record(&t, &m, "https://b.example", "old text");

        let evaluations = Arc::new(AtomicUsize::new(0));
        let counter = evaluations.clone();
        f.cap.set_handler(move |_, command, _| match command {
            commands::EVALUATE => {
                let text = if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    "old text"
                } else {
                    "new text"
                };
                Ok(eval_result(json!(text)))
            }
            commands::PRINT_TO_PDF => Ok(json!({"data": "cGRm"})),
            _ => Ok(json!({})),
        });

        let r1 = RequesterId::from("timer");
        let r2 = RequesterId::from("activity");
        let (a, b) = tokio::join!(
            f.orchestrator.capture_and_deliver(&t, &r1, &m, true),
            f.orchestrator.capture_and_deliver(&t, &r2, &m, true),
        );

        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|o| o.is_delivered()).count(), 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| **o == Outcome::SkippedUnchanged)
                .count(),
            1
        );
        assert_eq!(
            f.orchestrator.gate().last(&t, &m),
            Some(crate::gate::fingerprint("https://b.example", "new text"))
        );
        assert_eq!(f.sink.deliveries().len(), 1);
    }

    #[tokio::test]
    async fn test_request_defaults_and_release() {
        let f = fixture(Target::new("1", "https://test.com", "Page"));
        let mut events = f.orchestrator.subscribe();

        let mut request = CaptureRequest::manual("gemini");
        request.release_after = true;
        let (target, outcome) = f.orchestrator.capture(request).await.unwrap();

        assert_eq!(target, TargetId::from("1"));
        assert!(outcome.is_delivered());
        assert_eq!(f.cap.detach_count(), 1);
        assert!(!f.orchestrator.registry().is_held(&target));

        let event = events.recv().await.unwrap();
        assert_eq!(event.model, ModelId::from("gemini"));
        assert!(!event.automatic);
        assert!(f.host.removed().is_empty());
    }
}
