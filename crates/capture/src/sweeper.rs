//! Tears down everything tied to a target once the browser reports it gone.

use pagesync_core::{RequesterId, TargetId};
use pagesync_storage::{keys, StateStore};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::autosync::AutoSync;
use crate::orchestrator::CaptureOrchestrator;

pub struct TargetLifecycleSweeper {
    orchestrator: Arc<CaptureOrchestrator>,
    store: Arc<dyn StateStore>,
    autosync: Option<Arc<AutoSync>>,
}

impl TargetLifecycleSweeper {
    pub fn new(orchestrator: Arc<CaptureOrchestrator>, store: Arc<dyn StateStore>) -> Self {
        Self {
            orchestrator,
            store,
            autosync: None,
        }
    }

    pub fn with_autosync(mut self, autosync: Arc<AutoSync>) -> Self {
        self.autosync = Some(autosync);
        self
    }

    /// Returns every target whose session was swept, `target` first.
    pub async fn on_target_destroyed(&self, target: &TargetId) -> Vec<TargetId> {
        let registry = self.orchestrator.registry();
        registry.sweep(target).await;
        let mut swept = vec![target.clone()];

        // A panel bound to the closed target may hold references elsewhere.
        for orphan in registry.drop_requester(&RequesterId::for_panel(target)) {
            registry.sweep(&orphan).await;
            swept.push(orphan);
        }

        if let Some(autosync) = &self.autosync {
            autosync.forget_target(target);
        }
        self.orchestrator.gate().purge_target(target);
        self.orchestrator.forget_target(target);

        let purged = keys::target_family(self.store.as_ref(), target)
            .and_then(|family| self.store.remove(&family));
        if let Err(e) = purged {
            warn!(target = %target, error = %e, "Failed to purge target state");
        }

        info!(target = %target, swept = swept.len(), "Target closed, state swept");
        swept
    }

    pub async fn run_loop(
        self: Arc<Self>,
        mut destroyed: broadcast::Receiver<TargetId>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("TargetLifecycleSweeper started");
        loop {
            tokio::select! {
                event = destroyed.recv() => match event {
                    Ok(target) => {
                        self.on_target_destroyed(&target).await;
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Sweeper lagged behind target events");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Target events closed");
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    info!("TargetLifecycleSweeper shutting down");
                    break;
                }
            }
        }
    }
}
