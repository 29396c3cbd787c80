//! Ordered capture strategies.
//!
//! Each strategy either captures, declines (`NotApplicable`, the chain moves on)
//! or fails hard (`Fatal`, the chain stops). Only the generic strategy at the end
//! of the default chain turns its own failures into `Fatal`; the earlier ones
//! decline on anything but a session acquisition failure.

pub mod direct_fetch;
pub mod generic;
pub mod print_view;

use async_trait::async_trait;
use base64::Engine;
use pagesync_core::config::CaptureConfig;
use pagesync_core::{CaptureResult, Error, RequesterId, Result, Target, TargetId};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::host::{commands, DebugCapability, ResourceFetcher, TargetHost};
use crate::registry::DebugSessionRegistry;

pub use direct_fetch::{DirectFetchStrategy, HttpFetcher};
pub use generic::GenericStrategy;
pub use print_view::{PrintViewSite, PrintViewStrategy, GMAIL};

/// Full rendered text of the page, used only as a change fingerprint.
pub const PAGE_TEXT_EXPRESSION: &str = "document.body ? document.body.innerText : ''";

#[derive(Debug)]
pub enum StrategyOutcome {
    Captured(CaptureResult),
    NotApplicable(String),
    Fatal(Error),
}

/// What a strategy may touch while it runs.
pub struct StrategyContext<'a> {
    pub registry: &'a DebugSessionRegistry,
    pub host: &'a dyn TargetHost,
    /// Holder of the reference on the original target.
    pub requester: &'a RequesterId,
    pub config: &'a CaptureConfig,
}

#[async_trait]
pub trait CaptureStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap address-based check; `capture` may still decline.
    fn applies_to(&self, target: &Target) -> bool;

    async fn capture(&self, ctx: &StrategyContext<'_>, target: &Target) -> StrategyOutcome;
}

pub struct ExtractionPipeline {
    strategies: Vec<Box<dyn CaptureStrategy>>,
    registry: Arc<DebugSessionRegistry>,
    host: Arc<dyn TargetHost>,
    config: CaptureConfig,
}

impl ExtractionPipeline {
    /// The standard chain: direct fetch, site print views, generic render.
    pub fn new(
        registry: Arc<DebugSessionRegistry>,
        host: Arc<dyn TargetHost>,
        fetcher: Arc<dyn ResourceFetcher>,
        config: CaptureConfig,
    ) -> Self {
        let strategies: Vec<Box<dyn CaptureStrategy>> = vec![
            Box::new(DirectFetchStrategy::new(fetcher)),
            Box::new(PrintViewStrategy::default()),
            Box::new(GenericStrategy),
        ];
        Self::with_strategies(registry, host, config, strategies)
    }

    pub fn with_strategies(
        registry: Arc<DebugSessionRegistry>,
        host: Arc<dyn TargetHost>,
        config: CaptureConfig,
        strategies: Vec<Box<dyn CaptureStrategy>>,
    ) -> Self {
        Self {
            strategies,
            registry,
            host,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<DebugSessionRegistry> {
        &self.registry
    }

    pub fn host(&self) -> &Arc<dyn TargetHost> {
        &self.host
    }

    pub async fn extract(&self, target: &Target, requester: &RequesterId) -> Result<CaptureResult> {
        let ctx = StrategyContext {
            registry: &self.registry,
            host: self.host.as_ref(),
            requester,
            config: &self.config,
        };

        for strategy in &self.strategies {
            if !strategy.applies_to(target) {
                continue;
            }
            match strategy.capture(&ctx, target).await {
                StrategyOutcome::Captured(result) => {
                    info!(
                        target = %target.id,
                        strategy = strategy.name(),
                        bytes = result.bytes.len(),
                        "Captured page"
                    );
                    return Ok(result);
                }
                StrategyOutcome::NotApplicable(reason) => {
                    debug!(target = %target.id, strategy = strategy.name(), reason = %reason, "Strategy fell through");
                }
                StrategyOutcome::Fatal(err) => return Err(err),
            }
        }

        Err(Error::ExtractionFailure(format!(
            "no capture strategy produced a result for {}",
            target.url
        )))
    }
}

/// Evaluate an expression and return its by-value result.
pub async fn evaluate(
    capability: &dyn DebugCapability,
    target: &TargetId,
    expression: &str,
    await_promise: bool,
) -> Result<Value> {
    let response = capability
        .invoke(
            target,
            commands::EVALUATE,
            json!({
                "expression": expression,
                "returnByValue": true,
                "awaitPromise": await_promise,
            }),
        )
        .await?;

    if let Some(details) = response.get("exceptionDetails") {
        let text = details
            .get("exception")
            .and_then(|e| e.get("description"))
            .or_else(|| details.get("text"))
            .and_then(|v| v.as_str())
            .unwrap_or("exception");
        return Err(Error::Cdp(format!("Evaluation threw: {}", text)));
    }

    Ok(response
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null))
}

pub async fn page_text(capability: &dyn DebugCapability, target: &TargetId) -> Result<String> {
    let value = evaluate(capability, target, PAGE_TEXT_EXPRESSION, false).await?;
    Ok(value.as_str().unwrap_or_default().to_string())
}

/// Render the target to PDF bytes.
pub async fn print_to_pdf(
    capability: &dyn DebugCapability,
    target: &TargetId,
    config: &CaptureConfig,
) -> Result<Vec<u8>> {
    let response = capability
        .invoke(
            target,
            commands::PRINT_TO_PDF,
            json!({
                "printBackground": config.print_background,
                "preferCSSPageSize": config.prefer_css_page_size,
            }),
        )
        .await?;

    let data = response
        .get("data")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Cdp("No PDF data returned".to_string()))?;

    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| Error::Cdp(format!("Invalid PDF data: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{eval_result, FakeCapability, FakeFetcher, FakeHost};

    fn pipeline(
        host: Arc<FakeHost>,
        cap: Arc<FakeCapability>,
        fetcher: Arc<FakeFetcher>,
    ) -> ExtractionPipeline {
        let registry = Arc::new(DebugSessionRegistry::new(cap));
        ExtractionPipeline::new(registry, host, fetcher, CaptureConfig::default())
    }

    #[tokio::test]
    async fn test_pdf_address_is_fetched_without_attaching() {
        let target = Target::new("A", "https://example.com/test.pdf", "Test PDF");
        let host = Arc::new(FakeHost::with_target(target.clone()));
        let cap = Arc::new(FakeCapability::default());
        let fetcher = Arc::new(FakeFetcher::returning("application/pdf", b"%PDF-1.4"));

        let p = pipeline(host, cap.clone(), fetcher.clone());
        let result = p.extract(&target, &RequesterId::from("101")).await.unwrap();

        assert_eq!(result.bytes, b"%PDF-1.4");
        assert_eq!(result.fingerprint_text, "https://example.com/test.pdf");
        assert_eq!(result.filename.as_deref(), Some("test.pdf"));
        assert_eq!(fetcher.calls(), vec!["https://example.com/test.pdf"]);
        assert_eq!(cap.attach_count(), 0);
        assert!(cap.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_content_type_mismatch_falls_through_to_generic() {
        let target = Target::new("1", "https://example.com/test.pdf", "Test PDF");
        let host = Arc::new(FakeHost::with_target(target.clone()));
        let cap = Arc::new(FakeCapability::default());
        cap.set_handler(|_, command, _| match command {
            commands::PRINT_TO_PDF => Ok(json!({"data": "ZmFsbGJhY2s="})),
            commands::EVALUATE => Ok(eval_result(json!("fallback text"))),
            _ => Ok(json!({})),
        });
        let fetcher = Arc::new(FakeFetcher::returning("text/html", b"<html>"));

        let p = pipeline(host, cap.clone(), fetcher.clone());
        let result = p.extract(&target, &RequesterId::from("101")).await.unwrap();

        assert_eq!(fetcher.calls().len(), 1);
        assert_eq!(result.bytes, b"fallback");
        assert_eq!(result.fingerprint_text, "fallback text");
        assert_eq!(cap.attach_count(), 1);
        assert!(cap.commands_for(&target.id).contains(&commands::PRINT_TO_PDF.to_string()));
    }

    #[tokio::test]
    async fn test_fetch_error_falls_through_to_generic() {
        let target = Target::new("1", "https://example.com/test.pdf", "Test PDF");
        let host = Arc::new(FakeHost::with_target(target.clone()));
        let cap = Arc::new(FakeCapability::default());
        let fetcher = Arc::new(FakeFetcher::failing("Fetch failed"));

        let p = pipeline(host, cap.clone(), fetcher);
        let result = p.extract(&target, &RequesterId::from("101")).await.unwrap();
        assert_eq!(result.bytes, b"pdf");
        assert_eq!(cap.attach_count(), 1);
    }

    #[tokio::test]
    async fn test_generic_failure_is_extraction_failure() {
        let target = Target::new("1", "https://test.com", "Test Page");
        let host = Arc::new(FakeHost::with_target(target.clone()));
        let cap = Arc::new(FakeCapability::default());
        cap.set_handler(|_, command, _| match command {
            commands::PRINT_TO_PDF => Err(Error::Cdp("Printing failed".into())),
            _ => Ok(json!({})),
        });
        let fetcher = Arc::new(FakeFetcher::failing("unused"));

        let p = pipeline(host, cap, fetcher.clone());
        let err = p.extract(&target, &RequesterId::from("101")).await.unwrap_err();
        assert!(matches!(err, Error::ExtractionFailure(_)));
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_chain_reports_extraction_failure() {
        let target = Target::new("1", "https://test.com", "Test Page");
        let host = Arc::new(FakeHost::with_target(target.clone()));
        let registry = Arc::new(DebugSessionRegistry::new(Arc::new(FakeCapability::default())));
        let p = ExtractionPipeline::with_strategies(registry, host, CaptureConfig::default(), vec![]);
        let err = p.extract(&target, &RequesterId::from("x")).await.unwrap_err();
        assert!(matches!(err, Error::ExtractionFailure(_)));
    }

    #[tokio::test]
    async fn test_evaluate_surfaces_exceptions() {
        let cap = FakeCapability::default();
        cap.set_handler(|_, _, _| {
            Ok(json!({"result": {}, "exceptionDetails": {"text": "Uncaught ReferenceError"}}))
        });
        let err = evaluate(&cap, &TargetId::from("1"), "nope()", false).await.unwrap_err();
        assert!(err.to_string().contains("Uncaught ReferenceError"));
    }
}
