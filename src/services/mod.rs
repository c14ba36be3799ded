pub mod config_client;
pub mod diff;
pub mod failover;
pub mod naming;
pub mod scheduler;

pub use config_client::ConfigClient;
pub use failover::FailoverStore;
pub use naming::{HealthCheckReactor, ServiceRegistry};
pub use scheduler::Scheduler;
