pub mod autosync;
pub mod browser;
pub mod delivery;
pub mod filename;
pub mod gate;
pub mod host;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;
pub mod sweeper;

#[cfg(test)]
mod testing;

pub use autosync::AutoSync;
pub use browser::ChromeHost;
pub use delivery::{OutboxSink, PendingStoreSink};
pub use filename::sanitize_filename;
pub use gate::FingerprintGate;
pub use host::{AttachError, DebugCapability, DeliverySink, FetchedResource, ResourceFetcher, TargetHost};
pub use orchestrator::{CaptureOrchestrator, CaptureRequest, OutcomeEvent};
pub use pipeline::{ExtractionPipeline, HttpFetcher};
pub use registry::DebugSessionRegistry;
pub use sweeper::TargetLifecycleSweeper;
