pub mod keys;
pub mod pending;
pub mod store;

pub use pending::PendingCapture;
pub use store::{MemoryStateStore, SqliteStateStore, StateStore};
