pub mod collector;
pub mod config;
pub mod error;
pub mod inventory;
pub mod net;
pub mod scheduler;
pub mod scrape;
pub mod server;
pub mod task;

pub use error::{FleetmapError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix for every exported metric family.
pub const METRIC_NAMESPACE: &str = "fleetmap";
