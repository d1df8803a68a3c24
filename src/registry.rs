use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::oneshot;

use crate::types::AssetId;

/// The host's asset registry. Enables mocking in scheduler tests.
///
/// `load` starts the load when called; the returned future is the one-shot
/// ready/error signal for that attempt. Calling `load` for an asset the registry
/// is already loading must join the existing load rather than start another.
pub trait AssetRegistry: Send + Sync {
    fn find_by_tag(&self, tag: &str) -> Vec<AssetId>;

    fn has_resource(&self, asset: AssetId) -> bool;

    fn is_loading(&self, asset: AssetId) -> bool;

    fn load(&self, asset: AssetId) -> impl Future<Output = Result<(), String>> + Send + 'static;
}

// --- Mock ---

#[derive(Default)]
struct MockState {
    tags: HashMap<String, Vec<AssetId>>,
    resources: HashSet<AssetId>,
    pending: HashMap<AssetId, oneshot::Sender<Result<(), String>>>,
    load_calls: HashMap<AssetId, usize>,
    load_order: Vec<AssetId>,
    immediate: bool,
    failures: HashMap<AssetId, String>,
}

/// In-memory registry whose loads stay pending until the test completes them.
///
/// In immediate mode, loads resolve as soon as they are requested, failing for
/// assets registered through `fail_on`.
#[derive(Default)]
pub struct MockAssetRegistry {
    state: Mutex<MockState>,
}

impl MockAssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Builder form of `add_tag`.
    pub fn with_tag(self, tag: &str, assets: &[u64]) -> Self {
        self.add_tag(tag, assets);
        self
    }

    pub fn add_tag(&self, tag: &str, assets: &[u64]) {
        let mut state = self.state();
        let entry = state.tags.entry(tag.to_string()).or_default();
        for id in assets {
            if !entry.contains(&AssetId(*id)) {
                entry.push(AssetId(*id));
            }
        }
    }

    pub fn insert_resource(&self, asset: u64) {
        self.state().resources.insert(AssetId(asset));
    }

    pub fn remove_resource(&self, asset: u64) {
        self.state().resources.remove(&AssetId(asset));
    }

    pub fn set_immediate(&self, immediate: bool) {
        self.state().immediate = immediate;
    }

    pub fn fail_on(&self, asset: u64, message: &str) {
        self.state()
            .failures
            .insert(AssetId(asset), message.to_string());
    }

    /// Resolve a pending load. Returns false if `asset` has no pending load.
    pub fn complete(&self, asset: u64, result: Result<(), String>) -> bool {
        let mut state = self.state();
        let asset = AssetId(asset);
        let Some(sender) = state.pending.remove(&asset) else {
            return false;
        };
        if result.is_ok() {
            state.resources.insert(asset);
        }
        let _ = sender.send(result);
        true
    }

    /// Assets with an outstanding load, ascending.
    pub fn pending(&self) -> Vec<AssetId> {
        let mut pending: Vec<AssetId> = self.state().pending.keys().copied().collect();
        pending.sort();
        pending
    }

    pub fn load_calls(&self, asset: u64) -> usize {
        self.state()
            .load_calls
            .get(&AssetId(asset))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_load_calls(&self) -> usize {
        self.state().load_calls.values().sum()
    }

    /// Every `load` call in the order it was made.
    pub fn load_order(&self) -> Vec<AssetId> {
        self.state().load_order.clone()
    }
}

impl AssetRegistry for MockAssetRegistry {
    fn find_by_tag(&self, tag: &str) -> Vec<AssetId> {
        self.state().tags.get(tag).cloned().unwrap_or_default()
    }

    fn has_resource(&self, asset: AssetId) -> bool {
        self.state().resources.contains(&asset)
    }

    fn is_loading(&self, asset: AssetId) -> bool {
        self.state().pending.contains_key(&asset)
    }

    fn load(&self, asset: AssetId) -> impl Future<Output = Result<(), String>> + Send + 'static {
        let mut state = self.state();
        *state.load_calls.entry(asset).or_insert(0) += 1;
        state.load_order.push(asset);

        let (tx, rx) = oneshot::channel();
        if state.immediate {
            let result = match state.failures.get(&asset) {
                Some(message) => Err(message.clone()),
                None => {
                    state.resources.insert(asset);
                    Ok(())
                }
            };
            let _ = tx.send(result);
        } else {
            state.pending.insert(asset, tx);
        }

        async move {
            rx.await
                .unwrap_or_else(|_| Err("MockAssetRegistry: load abandoned".to_string()))
        }
    }
}
