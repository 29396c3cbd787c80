use async_trait::async_trait;
use pagesync_core::{CaptureResult, Error, Target};

use super::{page_text, print_to_pdf, CaptureStrategy, StrategyContext, StrategyOutcome};

/// Render the target itself. Always applicable; the end of the chain.
pub struct GenericStrategy;

#[async_trait]
impl CaptureStrategy for GenericStrategy {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn applies_to(&self, _target: &Target) -> bool {
        true
    }

    async fn capture(&self, ctx: &StrategyContext<'_>, target: &Target) -> StrategyOutcome {
        if let Err(e) = ctx.registry.acquire(&target.id, ctx.requester).await {
            return StrategyOutcome::Fatal(e);
        }

        let capability = ctx.registry.capability().as_ref();
        let bytes = match print_to_pdf(capability, &target.id, ctx.config).await {
            Ok(bytes) => bytes,
            Err(e) => return StrategyOutcome::Fatal(Error::ExtractionFailure(e.to_string())),
        };
        let text = match page_text(capability, &target.id).await {
            Ok(text) => text,
            Err(e) => return StrategyOutcome::Fatal(Error::ExtractionFailure(e.to_string())),
        };

        StrategyOutcome::Captured(CaptureResult {
            bytes,
            fingerprint_text: text,
            address: target.url.clone(),
            title: target.title.clone(),
            filename: None,
        })
    }
}
