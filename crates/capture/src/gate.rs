//! Change detection for automatic deliveries.

use pagesync_core::{ModelId, TargetId};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

type GateKey = (TargetId, ModelId);

/// Stable digest of what a capture showed.
pub fn fingerprint(address: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update((address.len() as u64).to_be_bytes());
    hasher.update(address.as_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Last delivered fingerprint per (target, model). Process memory only.
#[derive(Default)]
pub struct FingerprintGate {
    records: Mutex<HashMap<GateKey, String>>,
}

impl FingerprintGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<GateKey, String>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Manual captures always deliver; automatic ones only when the content moved.
    pub fn should_deliver(
        &self,
        target: &TargetId,
        model: &ModelId,
        address: &str,
        text: &str,
        automatic: bool,
    ) -> bool {
        if !automatic {
            return true;
        }
        let current = fingerprint(address, text);
        self.records()
            .get(&(target.clone(), model.clone()))
            .map(|last| *last != current)
            .unwrap_or(true)
    }

    /// Call only after the delivery succeeded.
    pub fn record(&self, target: &TargetId, model: &ModelId, address: &str, text: &str) {
        self.records()
            .insert((target.clone(), model.clone()), fingerprint(address, text));
    }

    /// Forget the record for one pair, e.g. when the destination model changes.
    pub fn reset(&self, target: &TargetId, model: &ModelId) {
        self.records().remove(&(target.clone(), model.clone()));
    }

    pub fn purge_target(&self, target: &TargetId) {
        self.records().retain(|(t, _), _| t != target);
    }

    pub fn last(&self, target: &TargetId, model: &ModelId) -> Option<String> {
        self.records()
            .get(&(target.clone(), model.clone()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
