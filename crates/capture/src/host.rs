//! Adapter seams for the host browser.
//!
//! Everything the capture core needs from the outside world goes through one of
//! these traits: the exclusive debugging capability, the target (tab) registry,
//! plain network fetches and the delivery sink. `ChromeHost` implements the
//! first two over CDP; tests use in-memory fakes.

use async_trait::async_trait;
use pagesync_core::{ModelId, Result, Target, TargetId};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

/// Commands issued through [`DebugCapability::invoke`].
pub mod commands {
    pub const PRINT_TO_PDF: &str = "Page.printToPDF";
    pub const EVALUATE: &str = "Runtime.evaluate";
    pub const ENABLE_PAGE_EVENTS: &str = "Page.enable";
    pub const ADD_SCRIPT_ON_NEW_DOCUMENT: &str = "Page.addScriptToEvaluateOnNewDocument";
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachError {
    /// Someone outside our bookkeeping already holds the capability; it is usable.
    #[error("already attached")]
    AlreadyAttached,
    /// Another extension or client blocks access to the target.
    #[error("capability held by another principal: {0}")]
    CapabilityConflict(String),
    #[error("{0}")]
    Other(String),
}

/// Classify a raw attach failure message reported by the browser.
pub fn classify_attach_error(message: &str) -> AttachError {
    let lower = message.to_lowercase();
    if lower.contains("already attached") {
        AttachError::AlreadyAttached
    } else if lower.contains("chrome-extension://")
        || lower.contains("cannot access")
        || lower.contains("another debugger")
    {
        AttachError::CapabilityConflict(message.to_string())
    } else {
        AttachError::Other(message.to_string())
    }
}

/// Exclusive per-target remote debugging capability.
#[async_trait]
pub trait DebugCapability: Send + Sync {
    async fn attach(&self, target: &TargetId) -> std::result::Result<(), AttachError>;

    async fn detach(&self, target: &TargetId) -> Result<()>;

    async fn invoke(&self, target: &TargetId, command: &str, params: Value) -> Result<Value>;
}

/// The browser's registry of pages.
#[async_trait]
pub trait TargetHost: Send + Sync {
    /// Fails with `Error::NotFound` for unknown ids.
    async fn get(&self, id: &TargetId) -> Result<Target>;

    /// The page the user is currently looking at.
    async fn query_active(&self) -> Result<Target>;

    async fn list(&self) -> Result<Vec<Target>>;

    async fn create(&self, url: &str, visible: bool) -> Result<Target>;

    async fn update(&self, id: &TargetId, url: &str) -> Result<()>;

    async fn remove(&self, id: &TargetId) -> Result<()>;

    fn on_destroyed(&self) -> broadcast::Receiver<TargetId>;

    fn on_navigation_complete(&self) -> broadcast::Receiver<TargetId>;
}

/// A resource retrieved over plain HTTP.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub status: u16,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedResource>;
}

/// Injects a capture into a destination surface.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(
        &self,
        bytes: &[u8],
        filename: &str,
        target: &TargetId,
        model: &ModelId,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_attach_error() {
        assert_eq!(
            classify_attach_error("Another debugger is already attached to the tab with id: 4."),
            AttachError::AlreadyAttached
        );
        assert!(matches!(
            classify_attach_error("Cannot access a chrome-extension:// URL of different extension"),
            AttachError::CapabilityConflict(_)
        ));
        assert!(matches!(
            classify_attach_error("No target with given id found"),
            AttachError::Other(_)
        ));
    }
}
