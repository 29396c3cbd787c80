//! Automatic re-capture for targets with sync turned on.
//!
//! Timers, page-load and activity triggers are independent callers into the
//! orchestrator; the fingerprint gate decides whether anything gets delivered.

use pagesync_core::config::SyncConfig;
use pagesync_core::{ModelId, Outcome, RequesterId, Result, TargetId};
use pagesync_storage::{keys, StateStore};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::orchestrator::CaptureOrchestrator;

struct Binding {
    requester: RequesterId,
    model: ModelId,
    timer: JoinHandle<()>,
    last_activity: Option<Instant>,
}

pub struct AutoSync {
    orchestrator: Arc<CaptureOrchestrator>,
    store: Arc<dyn StateStore>,
    config: SyncConfig,
    bindings: Mutex<HashMap<TargetId, Binding>>,
}

impl AutoSync {
    pub fn new(
        orchestrator: Arc<CaptureOrchestrator>,
        store: Arc<dyn StateStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            orchestrator,
            store,
            config,
            bindings: Mutex::new(HashMap::new()),
        }
    }

    fn bindings(&self) -> MutexGuard<'_, HashMap<TargetId, Binding>> {
        self.bindings.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn spawn_timer(
        &self,
        target: TargetId,
        requester: RequesterId,
        model: ModelId,
        immediate: bool,
    ) -> JoinHandle<()> {
        let orchestrator = self.orchestrator.clone();
        let period = self.config.interval();
        tokio::spawn(async move {
            let start = if immediate {
                Instant::now()
            } else {
                Instant::now() + period
            };
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let outcome = orchestrator
                    .capture_and_deliver(&target, &requester, &model, true)
                    .await;
                debug!(target = %target, model = %model, ?outcome, "Timed capture finished");
            }
        })
    }

    /// Turn sync on for `target`: persist the flag, capture now, then every interval.
    pub fn enable(&self, target: &TargetId, requester: &RequesterId, model: &ModelId) -> Result<()> {
        self.store
            .set(&keys::auto_sync_enabled(target), Value::Bool(true))?;

        let timer = self.spawn_timer(target.clone(), requester.clone(), model.clone(), true);
        let previous = self.bindings().insert(
            target.clone(),
            Binding {
                requester: requester.clone(),
                model: model.clone(),
                timer,
                last_activity: None,
            },
        );
        if let Some(previous) = previous {
            previous.timer.abort();
        }
        info!(target = %target, model = %model, interval_secs = self.config.interval_secs, "Auto-sync enabled");
        Ok(())
    }

    /// Turn sync off and give the session back.
    pub async fn disable(&self, target: &TargetId) -> Result<()> {
        self.store
            .set(&keys::auto_sync_enabled(target), Value::Bool(false))?;
        let binding = self.bindings().remove(target);
        if let Some(binding) = binding {
            binding.timer.abort();
            self.orchestrator
                .registry()
                .release(target, &binding.requester)
                .await;
            info!(target = %target, "Auto-sync disabled");
        }
        Ok(())
    }

    pub fn is_enabled(&self, target: &TargetId) -> bool {
        self.bindings().contains_key(target)
    }

    pub fn model_for(&self, target: &TargetId) -> Option<ModelId> {
        self.bindings().get(target).map(|b| b.model.clone())
    }

    fn binding_for(&self, target: &TargetId) -> Option<(RequesterId, ModelId)> {
        self.bindings()
            .get(target)
            .map(|b| (b.requester.clone(), b.model.clone()))
    }

    fn spawn_capture(
        &self,
        target: &TargetId,
        requester: RequesterId,
        model: ModelId,
        delay: Duration,
    ) -> JoinHandle<Outcome> {
        let orchestrator = self.orchestrator.clone();
        let target = target.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            orchestrator
                .capture_and_deliver(&target, &requester, &model, true)
                .await
        })
    }

    /// The destination finished loading; capture once it has settled.
    pub fn notify_page_loaded(&self, target: &TargetId) -> Option<JoinHandle<Outcome>> {
        let (requester, model) = self.binding_for(target)?;
        debug!(target = %target, "Destination loaded, scheduling capture");
        Some(self.spawn_capture(target, requester, model, self.config.load_settle()))
    }

    /// A conversation turn was observed. Throttled per target.
    pub fn notify_activity(&self, target: &TargetId) -> Option<JoinHandle<Outcome>> {
        let (requester, model) = {
            let mut bindings = self.bindings();
            let binding = bindings.get_mut(target)?;
            let now = Instant::now();
            if let Some(last) = binding.last_activity {
                if now.duration_since(last) < self.config.activity_throttle() {
                    debug!(target = %target, "Activity capture throttled");
                    return None;
                }
            }
            binding.last_activity = Some(now);
            (binding.requester.clone(), binding.model.clone())
        };
        Some(self.spawn_capture(target, requester, model, Duration::ZERO))
    }

    /// Point the binding at another destination. Its fingerprint starts fresh.
    pub fn bind_model(&self, target: &TargetId, model: &ModelId) -> bool {
        let mut bindings = self.bindings();
        let Some(binding) = bindings.get_mut(target) else {
            return false;
        };
        if &binding.model == model {
            return true;
        }
        self.orchestrator.gate().reset(target, model);
        binding.timer.abort();
        binding.timer = self.spawn_timer(target.clone(), binding.requester.clone(), model.clone(), false);
        info!(target = %target, from = %binding.model, to = %model, "Auto-sync model switched");
        binding.model = model.clone();
        true
    }

    /// Re-enable every target whose persisted flag is on and which still exists.
    pub async fn restore(&self, model: &ModelId) -> Result<Vec<TargetId>> {
        let mut restored = Vec::new();
        for key in self.store.keys_with_prefix(keys::AUTO_SYNC_PREFIX)? {
            let Some(target) = keys::auto_sync_target(&key) else {
                continue;
            };
            if !self.store.get_bool(&key)? || self.is_enabled(&target) {
                continue;
            }
            match self.orchestrator.host().get(&target).await {
                Ok(_) => {
                    self.enable(&target, &RequesterId::for_panel(&target), model)?;
                    restored.push(target);
                }
                Err(e) => {
                    warn!(target = %target, error = %e, "Dropping auto-sync flag for missing target");
                    self.store.remove(&[key])?;
                }
            }
        }
        Ok(restored)
    }

    /// Stop the binding without touching sessions; the target is gone.
    pub fn forget_target(&self, target: &TargetId) {
        if let Some(binding) = self.bindings().remove(target) {
            binding.timer.abort();
        }
    }

    pub fn shutdown(&self) {
        for (_, binding) in self.bindings().drain() {
            binding.timer.abort();
        }
    }
}

impl Drop for AutoSync {
    fn drop(&mut self) {
        self.shutdown();
    }
}
