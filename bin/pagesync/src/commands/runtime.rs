use pagesync_capture::{
    CaptureOrchestrator, ChromeHost, DebugSessionRegistry, DeliverySink, ExtractionPipeline,
    FingerprintGate, HttpFetcher, OutboxSink, PendingStoreSink, TargetHost,
};
use pagesync_core::{Config, ModelId, Paths, TargetId};
use pagesync_storage::{SqliteStateStore, StateStore};
use std::sync::Arc;
use tracing::debug;

/// Everything a command needs to capture: browser, state and the wired-up core.
pub struct Runtime {
    pub config: Config,
    pub host: Arc<ChromeHost>,
    pub store: Arc<dyn StateStore>,
    pub orchestrator: Arc<CaptureOrchestrator>,
}

impl Runtime {
    pub async fn build() -> anyhow::Result<Self> {
        let paths = Paths::new();
        paths.ensure_dirs()?;
        let config = Config::load_or_default(&paths)?;
        let store: Arc<dyn StateStore> = Arc::new(SqliteStateStore::open(&paths.state_db())?);

        let host = Arc::new(ChromeHost::connect(&config, &paths).await?);
        let registry = Arc::new(DebugSessionRegistry::new(host.clone()));
        let fetcher = Arc::new(HttpFetcher::new(
            std::time::Duration::from_secs(config.capture.fetch_timeout_secs),
            config.capture.max_fetch_bytes,
        )?);
        let pipeline = Arc::new(ExtractionPipeline::new(
            registry,
            host.clone(),
            fetcher,
            config.capture.clone(),
        ));

        let sink: Arc<dyn DeliverySink> = match &config.delivery.outbox_dir {
            Some(dir) => Arc::new(OutboxSink::new(dir)),
            None => Arc::new(PendingStoreSink::new(store.clone())),
        };
        debug!(outbox = ?config.delivery.outbox_dir, "Delivery sink selected");

        let orchestrator = Arc::new(CaptureOrchestrator::new(
            pipeline,
            Arc::new(FingerprintGate::new()),
            sink,
        ));

        Ok(Self {
            config,
            host,
            store,
            orchestrator,
        })
    }

    pub fn model(&self, model: Option<String>) -> ModelId {
        ModelId::new(model.unwrap_or_else(|| self.config.delivery.default_model.clone()))
    }

    /// The given target, or the page the user is looking at.
    pub async fn resolve_target(&self, target: Option<String>) -> anyhow::Result<TargetId> {
        match target {
            Some(id) => Ok(TargetId::new(id)),
            None => Ok(self.host.query_active().await?.id),
        }
    }

    /// Drop every session this process still holds.
    pub async fn release_all(&self) {
        let registry = self.orchestrator.registry();
        for target in registry.snapshot().into_keys() {
            registry.sweep(&target).await;
        }
    }
}
