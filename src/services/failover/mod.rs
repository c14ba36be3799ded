//! Disk-backed failover cache with a manual switch file.

pub mod store;
pub mod types;

pub use store::FailoverStore;
pub use types::{FAILOVER_SWITCH, FailoverError, FailoverStoreConfig, RESERVED_NAMES, Snapshot, SnapshotSource};
