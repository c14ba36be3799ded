//! Config client module
//!
//! - `types`: snapshots, requests and client configuration
//! - `error`: client error type
//! - `filter`: pluggable content filter chain
//! - `agent`: server transport abstraction and its HTTP implementation
//! - `snapshot`: always-on last-known-good snapshot files
//! - `service`: the client itself

pub mod agent;
pub mod error;
pub mod filter;
pub mod service;
pub mod snapshot;
pub mod types;

pub use agent::{ConfigServerAgent, HttpConfigAgent};
pub use error::ConfigError;
pub use filter::{ConfigFilter, ConfigFilterChain};
pub use service::ConfigClient;
pub use snapshot::LocalSnapshotStore;
pub use types::{ConfigClientConfig, ConfigRequest, ConfigResponse, ConfigSnapshot, PublishRequest};
