use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// --- Identifiers ---

/// Registry-assigned asset identifier. Ordering doubles as the dispatch tie-break.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct AssetId(pub u64);

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "asset-{}", self.0)
    }
}

/// Batch identity, allocated monotonically from 1 by the scheduler.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch-{}", self.0)
    }
}

// --- Enums ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    #[default]
    Idle,
    Queued,
    Loading,
    Loaded,
    Error,
}

impl AssetStatus {
    /// True once a load attempt has finished, successfully or not.
    pub fn is_settled(&self) -> bool {
        matches!(self, AssetStatus::Loaded | AssetStatus::Error)
    }
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetStatus::Idle => write!(f, "idle"),
            AssetStatus::Queued => write!(f, "queued"),
            AssetStatus::Loading => write!(f, "loading"),
            AssetStatus::Loaded => write!(f, "loaded"),
            AssetStatus::Error => write!(f, "error"),
        }
    }
}

// --- Batch options and results ---

/// Per-batch progress callback, invoked on the scheduler task.
pub type ProgressCallback = Arc<dyn Fn(&BatchProgress) + Send + Sync>;

/// Caller options for a `load_by_tags` request.
#[derive(Clone, Default)]
pub struct LoadOptions {
    /// Higher dispatches first.
    pub priority: i32,
    /// Opaque label echoed back in progress and outcome payloads.
    pub phase: Option<String>,
    pub on_progress: Option<ProgressCallback>,
}

impl LoadOptions {
    pub fn with_priority(priority: i32) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }

    pub fn phase(mut self, phase: &str) -> Self {
        self.phase = Some(phase.to_string());
        self
    }

    pub fn on_progress(mut self, callback: impl Fn(&BatchProgress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadOptions")
            .field("priority", &self.priority)
            .field("phase", &self.phase)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// Value a batch resolves to once every one of its assets has loaded.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct BatchOutcome {
    pub id: BatchId,
    pub loaded: usize,
    pub total: usize,
    pub tags: Vec<String>,
    pub phase: Option<String>,
}

// --- Events ---

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct BatchProgress {
    pub id: BatchId,
    pub loaded: usize,
    pub total: usize,
    pub tags: Vec<String>,
    pub phase: Option<String>,
}

/// Aggregate counts across every asset the scheduler has tracked.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct GlobalProgress {
    /// Finished assets, success or failure.
    pub loaded: usize,
    pub total: usize,
    pub errors: usize,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    BatchProgress(BatchProgress),
    GlobalProgress {
        loaded: usize,
        total: usize,
        errors: usize,
        asset: AssetId,
        error: Option<String>,
    },
    ConcurrencyChanged {
        current: usize,
        base: usize,
        cap: usize,
    },
}

// --- Snapshot ---

/// Read-only copy of the scheduler's observable state.
#[derive(Serialize, Clone, Debug, PartialEq, Default)]
pub struct SchedulerSnapshot {
    pub current_concurrency: usize,
    pub base_concurrency: usize,
    pub phase_concurrency: Option<usize>,
    pub effective_cap: usize,
    pub spike_count: u32,
    pub recovery_count: u32,
    pub in_flight: usize,
    pub queued: usize,
    pub live_batches: usize,
    pub progress: GlobalProgress,
    pub assets: Vec<(AssetId, AssetStatus)>,
}

impl SchedulerSnapshot {
    pub fn status_of(&self, asset: AssetId) -> Option<AssetStatus> {
        self.assets
            .iter()
            .find(|(id, _)| *id == asset)
            .map(|(_, status)| *status)
    }

    pub fn count_with_status(&self, status: AssetStatus) -> usize {
        self.assets.iter().filter(|(_, s)| *s == status).count()
    }
}
