use std::collections::{BTreeMap, BTreeSet};

use crate::types::{AssetId, AssetStatus, BatchId, GlobalProgress};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetState {
    pub status: AssetStatus,
    pub dependents: BTreeSet<BatchId>,
}

/// Per-asset bookkeeping plus the global progress aggregate.
#[derive(Debug, Default)]
pub struct AssetTable {
    assets: BTreeMap<AssetId, AssetState>,
    progress: GlobalProgress,
}

impl AssetTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, asset: AssetId) -> AssetStatus {
        self.assets
            .get(&asset)
            .map(|s| s.status)
            .unwrap_or_default()
    }

    /// Get or create the state for `asset`. New entries count toward the global total.
    pub fn entry(&mut self, asset: AssetId) -> &mut AssetState {
        let progress = &mut self.progress;
        self.assets.entry(asset).or_insert_with(|| {
            progress.total += 1;
            AssetState::default()
        })
    }

    pub fn set_status(&mut self, asset: AssetId, status: AssetStatus) {
        self.entry(asset).status = status;
    }

    /// Record a finished load: set the terminal status, bump global counters,
    /// and hand back the batches that were waiting on it.
    pub fn finish(&mut self, asset: AssetId, ok: bool) -> BTreeSet<BatchId> {
        let state = self.entry(asset);
        state.status = if ok {
            AssetStatus::Loaded
        } else {
            AssetStatus::Error
        };
        let dependents = std::mem::take(&mut state.dependents);

        self.progress.loaded += 1;
        if !ok {
            self.progress.errors += 1;
        }
        dependents
    }

    /// Take a settled asset back out of the finished counts before it is
    /// loaded again, so `loaded` never exceeds `total`.
    pub fn reopen(&mut self, asset: AssetId) {
        let status = self.status(asset);
        if status.is_settled() {
            self.progress.loaded = self.progress.loaded.saturating_sub(1);
        }
        if status == AssetStatus::Error {
            self.progress.errors = self.progress.errors.saturating_sub(1);
        }
    }

    /// Reset queued assets back to idle.
    pub fn requeue_as_idle(&mut self, assets: &[AssetId]) {
        for asset in assets {
            if let Some(state) = self.assets.get_mut(asset) {
                if state.status == AssetStatus::Queued {
                    state.status = AssetStatus::Idle;
                }
            }
        }
    }

    pub fn clear_dependents(&mut self) {
        for state in self.assets.values_mut() {
            state.dependents.clear();
        }
    }

    pub fn progress(&self) -> GlobalProgress {
        self.progress
    }

    pub fn statuses(&self) -> Vec<(AssetId, AssetStatus)> {
        self.assets
            .iter()
            .map(|(id, state)| (*id, state.status))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reopen_undoes_finished_counts() {
        let mut table = AssetTable::new();
        table.entry(AssetId(1));
        table.entry(AssetId(2));
        table.finish(AssetId(1), false);
        table.finish(AssetId(2), true);

        table.reopen(AssetId(1));
        assert_eq!(
            table.progress(),
            GlobalProgress {
                loaded: 1,
                total: 2,
                errors: 0
            }
        );

        table.finish(AssetId(1), true);
        assert_eq!(table.progress().loaded, 2);
        assert_eq!(table.progress().total, 2);
    }

    #[test]
    fn entry_creates_idle_state_once() {
        let mut table = AssetTable::new();
        table.entry(AssetId(1)).dependents.insert(BatchId(1));
        table.entry(AssetId(1)).dependents.insert(BatchId(2));

        let state = table.entry(AssetId(1));
        assert_eq!(state.status, AssetStatus::Idle);
        assert_eq!(state.dependents.len(), 2);
        assert_eq!(table.progress().total, 1);
    }

    #[test]
    fn unknown_asset_reads_as_idle() {
        let table = AssetTable::new();
        assert_eq!(table.status(AssetId(42)), AssetStatus::Idle);
        assert!(table.statuses().is_empty());
    }

    #[test]
    fn finish_takes_dependents_and_counts() {
        let mut table = AssetTable::new();
        table.entry(AssetId(1)).dependents.insert(BatchId(7));
        table.set_status(AssetId(1), AssetStatus::Loading);
        table.set_status(AssetId(2), AssetStatus::Loading);

        let dependents = table.finish(AssetId(1), true);
        assert_eq!(dependents.into_iter().collect::<Vec<_>>(), vec![BatchId(7)]);
        assert!(table.entry(AssetId(1)).dependents.is_empty());
        assert_eq!(table.status(AssetId(1)), AssetStatus::Loaded);

        assert!(table.finish(AssetId(2), false).is_empty());
        assert_eq!(table.status(AssetId(2)), AssetStatus::Error);

        assert_eq!(
            table.progress(),
            GlobalProgress {
                loaded: 2,
                total: 2,
                errors: 1
            }
        );
    }

    #[test]
    fn requeue_only_touches_queued_assets() {
        let mut table = AssetTable::new();
        table.set_status(AssetId(1), AssetStatus::Queued);
        table.set_status(AssetId(2), AssetStatus::Loading);

        table.requeue_as_idle(&[AssetId(1), AssetId(2), AssetId(3)]);
        assert_eq!(table.status(AssetId(1)), AssetStatus::Idle);
        assert_eq!(table.status(AssetId(2)), AssetStatus::Loading);
        assert_eq!(table.status(AssetId(3)), AssetStatus::Idle);
    }
}
