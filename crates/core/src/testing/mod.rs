//! Test doubles for the engine's trait seams.

mod memory_snapshot_store;
mod mock_fetch_backend;

pub use memory_snapshot_store::MemorySnapshotStore;
pub use mock_fetch_backend::{MockFetchBackend, ScriptedOutcome, ScriptedRun};
