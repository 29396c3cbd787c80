//! Key scheme for the namespaced state store.
//!
//! Every key embeds the target id, and the model id where the value belongs to
//! one destination, so two tabs (or two models on one tab) never read each
//! other's state.

use pagesync_core::{ModelId, Result, TargetId};

use crate::store::StateStore;

pub const LAST_CHAT_URL_PREFIX: &str = "lastChatUrl_";

pub fn last_chat_url(model: &ModelId, target: &TargetId) -> String {
    format!("{}{}_{}", LAST_CHAT_URL_PREFIX, model, target)
}

pub const PENDING_PREFIX: &str = "pendingPDF_";

pub fn pending_capture(model: &ModelId, target: &TargetId) -> String {
    format!("{}{}_{}", PENDING_PREFIX, model, target)
}

pub const AUTO_SYNC_PREFIX: &str = "autoAttachEnabled_";

pub fn auto_sync_enabled(target: &TargetId) -> String {
    format!("{}{}", AUTO_SYNC_PREFIX, target)
}

/// Inverse of [`auto_sync_enabled`].
pub fn auto_sync_target(key: &str) -> Option<TargetId> {
    key.strip_prefix(AUTO_SYNC_PREFIX)
        .filter(|id| !id.is_empty())
        .map(TargetId::from)
}

/// Whether the part of a key after its family prefix belongs to `target`:
/// either the target id itself (keys written before destinations were split
/// by model) or `{model}_{target}`.
fn names_target(rest: &str, target: &TargetId) -> bool {
    let target = target.as_str();
    rest == target
        || rest
            .strip_suffix(target)
            .map(|model| model.len() > 1 && model.ends_with('_'))
            .unwrap_or(false)
}

/// Every stored key holding state for `target`, whichever model wrote it.
pub fn target_family(store: &dyn StateStore, target: &TargetId) -> Result<Vec<String>> {
    let mut keys = vec![auto_sync_enabled(target)];
    for prefix in [LAST_CHAT_URL_PREFIX, PENDING_PREFIX] {
        for key in store.keys_with_prefix(prefix)? {
            if names_target(&key[prefix.len()..], target) {
                keys.push(key);
            }
        }
    }
    Ok(keys)
}
