//! Hand-off record for captures waiting to be dropped into a destination.

use base64::Engine;
use pagesync_core::{Error, ModelId, Result, TargetId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::keys;
use crate::store::StateStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCapture {
    /// Base64 of the captured bytes.
    pub pdf_data: String,
    pub filename: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl PendingCapture {
    pub fn new(bytes: &[u8], filename: &str) -> Self {
        Self {
            pdf_data: base64::engine::general_purpose::STANDARD.encode(bytes),
            filename: filename.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn decode(&self) -> Result<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.pdf_data)
            .map_err(|e| Error::Validation(format!("Invalid pending capture data: {}", e)))
    }

    pub fn is_fresh(&self, now_ms: i64, max_age: Duration) -> bool {
        now_ms - self.timestamp < max_age.as_millis() as i64
    }

    pub fn write(&self, store: &dyn StateStore, model: &ModelId, target: &TargetId) -> Result<()> {
        store.set(&keys::pending_capture(model, target), serde_json::to_value(self)?)
    }

    /// Remove and return the pending capture for (model, target). Stale records are
    /// dropped and reported as absent.
    pub fn take(
        store: &dyn StateStore,
        model: &ModelId,
        target: &TargetId,
        max_age: Duration,
    ) -> Result<Option<Self>> {
        let key = keys::pending_capture(model, target);
        let Some(raw) = store.get(&key)? else {
            return Ok(None);
        };
        store.remove(&[key])?;

        let pending: PendingCapture = serde_json::from_value(raw)?;
        if pending.is_fresh(chrono::Utc::now().timestamp_millis(), max_age) {
            Ok(Some(pending))
        } else {
            debug!(target = %target, model = %model, "Dropping stale pending capture");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStateStore;

    #[test]
    fn test_write_and_take() {
        let store = MemoryStateStore::new();
        let model = ModelId::from("chatgpt");
        let target = TargetId::from("123");

        PendingCapture::new(b"%PDF-1.4", "Test_Page.pdf")
            .write(&store, &model, &target)
            .unwrap();
        let raw = store.get("pendingPDF_chatgpt_123").unwrap().unwrap();
        assert_eq!(raw["filename"], "Test_Page.pdf");
        assert!(raw["pdfData"].is_string());

        let taken = PendingCapture::take(&store, &model, &target, Duration::from_secs(10))
            .unwrap()
            .unwrap();
        assert_eq!(taken.decode().unwrap(), b"%PDF-1.4");
        assert!(store.get("pendingPDF_chatgpt_123").unwrap().is_none());
    }

    #[test]
    fn test_stale_record_is_dropped() {
        let store = MemoryStateStore::new();
        let model = ModelId::from("gemini");
        let target = TargetId::from("9");
        let mut pending = PendingCapture::new(b"data", "page.pdf");
        pending.timestamp -= 60_000;
        pending.write(&store, &model, &target).unwrap();

        let taken = PendingCapture::take(&store, &model, &target, Duration::from_secs(10)).unwrap();
        assert!(taken.is_none());
        assert!(store.get("pendingPDF_gemini_9").unwrap().is_none());
    }
}
