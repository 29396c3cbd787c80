//! Delivery sinks: where a capture goes once the gate lets it through.

use async_trait::async_trait;
use pagesync_core::{Error, ModelId, Result, TargetId};
use pagesync_storage::{PendingCapture, StateStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::host::DeliverySink;

/// Leaves the capture in the state store for the destination surface to pick up.
pub struct PendingStoreSink {
    store: Arc<dyn StateStore>,
}

impl PendingStoreSink {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DeliverySink for PendingStoreSink {
    async fn deliver(
        &self,
        bytes: &[u8],
        filename: &str,
        target: &TargetId,
        model: &ModelId,
    ) -> Result<()> {
        PendingCapture::new(bytes, filename)
            .write(self.store.as_ref(), model, target)
            .map_err(|e| Error::DeliveryFailure(e.to_string()))?;
        info!(target = %target, model = %model, filename = %filename, "Capture queued for pickup");
        Ok(())
    }
}

/// Writes captures to `<root>/<model>/<target>/<filename>`.
pub struct OutboxSink {
    root: PathBuf,
}

impl OutboxSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, model: &ModelId, target: &TargetId, filename: &str) -> PathBuf {
        let safe_target: String = target
            .as_str()
            .chars()
            .map(|c| if matches!(c, ':' | '/' | '\\') { '_' } else { c })
            .collect();
        self.root
            .join(model.as_str())
            .join(safe_target)
            .join(filename)
    }
}

#[async_trait]
impl DeliverySink for OutboxSink {
    async fn deliver(
        &self,
        bytes: &[u8],
        filename: &str,
        target: &TargetId,
        model: &ModelId,
    ) -> Result<()> {
        let path = self.path_for(model, target, filename);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::DeliveryFailure(format!("{}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Error::DeliveryFailure(format!("{}: {}", path.display(), e)))?;
        info!(target = %target, model = %model, path = %path.display(), "Capture written");
        Ok(())
    }
}
