//! Naming module
//!
//! - `types`: instances, services and the client-side `ServiceInfo` view
//! - `registry`: the live instance registry
//! - `health`: per-service client beat check and its reactor
//! - `distro`: partition ownership predicate
//! - `push`: service change notifications
//! - `deleter`: expired instance removal
//! - `switches`: cluster-wide runtime switches

pub mod deleter;
pub mod distro;
pub mod health;
pub mod push;
pub mod registry;
pub mod switches;
pub mod types;

pub use deleter::{DeleteError, DeleteInstanceRequest, HttpInstanceDeleter, InstanceDeleter, QueuedInstanceDeleter};
pub use distro::{DistroMapper, HashDistroMapper};
pub use health::{CheckOutcome, ClientBeatCheckTask, HealthCheckContext, HealthCheckReactor, SkipReason};
pub use push::{BroadcastPushService, PushConfig, PushService, PushStats, ServiceChangeEvent};
pub use registry::ServiceRegistry;
pub use switches::HealthSwitches;
pub use types::{DeleterKind, Instance, NamingConfig, RegistryError, Service, ServiceInfo};
