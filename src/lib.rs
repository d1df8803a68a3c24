pub mod batch;
pub mod config;
pub mod controller;
pub mod error;
pub mod log;
pub mod manifest;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod types;

pub use error::LoadError;
pub use registry::AssetRegistry;
pub use scheduler::{spawn_scheduler, BatchTicket, SchedulerHandle};
pub use types::{AssetId, BatchId, BatchOutcome, LoadOptions, SchedulerEvent};
