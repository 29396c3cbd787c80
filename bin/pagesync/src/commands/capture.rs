use pagesync_capture::CaptureRequest;
use pagesync_core::{Outcome, RequesterId, TargetId};

use super::runtime::Runtime;

pub async fn run(
    target: Option<String>,
    model: Option<String>,
    requester: Option<String>,
    automatic: bool,
    release: bool,
) -> anyhow::Result<()> {
    let rt = Runtime::build().await?;
    let request = CaptureRequest {
        target: target.map(TargetId::new),
        requester: requester.map(RequesterId::new),
        model: rt.model(model),
        automatic,
        release_after: release || rt.config.sync.release_after_capture,
    };
    let model = request.model.clone();

    let (target, outcome) = rt.orchestrator.capture(request).await?;
    match &outcome {
        Outcome::Delivered { filename } => {
            println!("✓ Delivered {} from {} to {}", filename, target, model);
        }
        Outcome::SkippedUnchanged => {
            println!("= {} unchanged since the last delivery to {}", target, model);
        }
        Outcome::Failed { reason } => {
            eprintln!("✗ Capture of {} failed: {}", target, reason);
            std::process::exit(1);
        }
    }
    Ok(())
}
