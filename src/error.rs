use crate::types::AssetId;

/// Errors surfaced by the scheduler handle and batch futures.
///
/// Categories:
/// - Asset: a registry load failed; the batch still ran to completion
/// - Cancelled: the batch was torn down by `cancel_all` or scheduler shutdown
/// - Shutdown: the scheduler task is gone
/// - Config: configuration could not be read or failed validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to load {asset}: {message}")]
    AssetFailed { asset: AssetId, message: String },

    #[error("Batch cancelled")]
    Cancelled,

    #[error("Scheduler shut down")]
    SchedulerShutDown,

    #[error("Config validation failed:\n{}", format_config_errors(.0))]
    InvalidConfig(Vec<String>),

    #[error("Config error: {0}")]
    Config(String),
}

impl LoadError {
    /// Returns true if the batch was cancelled rather than failed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LoadError::Cancelled)
    }

    /// Returns true if one of the batch's assets failed to load.
    pub fn is_asset_failure(&self) -> bool {
        matches!(self, LoadError::AssetFailed { .. })
    }
}

fn format_config_errors(errors: &[String]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}
