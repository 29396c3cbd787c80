use pagesync_capture::{AutoSync, TargetHost, TargetLifecycleSweeper};
use pagesync_core::{Outcome, RequesterId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

use super::runtime::Runtime;

pub async fn run(target: Option<String>, model: Option<String>) -> anyhow::Result<()> {
    let rt = Runtime::build().await?;
    let target = rt.resolve_target(target).await?;
    let model = rt.model(model);

    let autosync = Arc::new(AutoSync::new(
        rt.orchestrator.clone(),
        rt.store.clone(),
        rt.config.sync.clone(),
    ));
    let sweeper = Arc::new(
        TargetLifecycleSweeper::new(rt.orchestrator.clone(), rt.store.clone())
            .with_autosync(autosync.clone()),
    );
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let sweeper_handle = tokio::spawn(sweeper.run_loop(rt.host.on_destroyed(), shutdown_rx));

    let mut events = rt.orchestrator.subscribe();
    let restored = autosync.restore(&model).await?;
    if !restored.is_empty() {
        info!(count = restored.len(), "Restored auto-sync bindings");
    }
    autosync.enable(&target, &RequesterId::for_panel(&target), &model)?;

    println!(
        "👀 Watching {} → {} every {}s (Ctrl-C to stop)",
        target, model, rt.config.sync.interval_secs
    );

    let mut liveness = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("Stopping.");
                break;
            }
            event = events.recv() => {
                let Ok(event) = event else { continue };
                let time = chrono::Local::now().format("%H:%M:%S");
                match &event.outcome {
                    Outcome::Delivered { filename } => {
                        println!("[{}] ✓ {} delivered to {}", time, filename, event.model);
                    }
                    Outcome::SkippedUnchanged => {
                        println!("[{}] = {} unchanged", time, event.target);
                    }
                    Outcome::Failed { reason } => {
                        println!("[{}] ✗ {}: {}", time, event.target, reason);
                    }
                }
            }
            _ = liveness.tick() => {
                if !autosync.is_enabled(&target) {
                    println!("Page {} closed.", target);
                    break;
                }
            }
        }
    }

    // Keep the persisted flags so the next watch can restore them.
    autosync.shutdown();
    let _ = shutdown_tx.send(());
    let _ = sweeper_handle.await;
    rt.release_all().await;
    Ok(())
}
