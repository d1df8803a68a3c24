use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::watch;

use crate::registry::AssetRegistry;
use crate::types::AssetId;

#[derive(Default, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Manifest {
    pub assets: Vec<ManifestAsset>,
}

/// One simulated asset. `fail` makes every load of it fail with that message.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct ManifestAsset {
    pub id: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub fail: Option<String>,
}

pub fn parse_manifest(contents: &str) -> Result<Manifest, String> {
    let manifest: Manifest =
        toml::from_str(contents).map_err(|e| format!("Invalid manifest: {}", e))?;

    let mut seen = HashSet::new();
    for asset in &manifest.assets {
        if !seen.insert(asset.id) {
            return Err(format!("Duplicate asset id {} in manifest", asset.id));
        }
    }
    Ok(manifest)
}

pub fn load_manifest(path: &Path) -> Result<Manifest, String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    parse_manifest(&contents).map_err(|e| format!("{}: {}", path.display(), e))
}

#[derive(Default)]
struct Runtime {
    resources: HashSet<AssetId>,
    loading: HashMap<AssetId, watch::Sender<Option<Result<(), String>>>>,
}

/// Registry backed by a manifest, simulating load latency with timers.
///
/// Loads run on their own task from the moment `load` is called; a second
/// `load` for the same asset subscribes to the first.
pub struct ManifestRegistry {
    assets: HashMap<AssetId, ManifestAsset>,
    tags: BTreeMap<String, Vec<AssetId>>,
    runtime: Arc<Mutex<Runtime>>,
}

fn lock(runtime: &Mutex<Runtime>) -> MutexGuard<'_, Runtime> {
    runtime.lock().unwrap_or_else(|e| e.into_inner())
}

impl ManifestRegistry {
    pub fn new(manifest: Manifest) -> Self {
        let mut tags: BTreeMap<String, Vec<AssetId>> = BTreeMap::new();
        let mut assets = HashMap::new();
        for asset in manifest.assets {
            for tag in &asset.tags {
                tags.entry(tag.clone()).or_default().push(AssetId(asset.id));
            }
            assets.insert(AssetId(asset.id), asset);
        }
        for ids in tags.values_mut() {
            ids.sort();
            ids.dedup();
        }
        Self {
            assets,
            tags,
            runtime: Arc::new(Mutex::new(Runtime::default())),
        }
    }

    pub fn tag_names(&self) -> Vec<&str> {
        self.tags.keys().map(String::as_str).collect()
    }

    fn begin(&self, asset: AssetId) -> watch::Receiver<Option<Result<(), String>>> {
        let mut runtime = lock(&self.runtime);
        if let Some(tx) = runtime.loading.get(&asset) {
            return tx.subscribe();
        }
        let (tx, rx) = watch::channel(None);
        runtime.loading.insert(asset, tx);
        drop(runtime);

        let (latency, failure) = match self.assets.get(&asset) {
            Some(entry) => (Duration::from_millis(entry.latency_ms), entry.fail.clone()),
            None => (Duration::ZERO, Some(format!("{} is not in the manifest", asset))),
        };
        let shared = Arc::clone(&self.runtime);

        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            let result = match failure {
                Some(message) => Err(message),
                None => Ok(()),
            };
            let mut runtime = lock(&shared);
            if result.is_ok() {
                runtime.resources.insert(asset);
            }
            if let Some(tx) = runtime.loading.remove(&asset) {
                let _ = tx.send(Some(result));
            }
        });

        rx
    }
}

impl AssetRegistry for ManifestRegistry {
    fn find_by_tag(&self, tag: &str) -> Vec<AssetId> {
        self.tags.get(tag).cloned().unwrap_or_default()
    }

    fn has_resource(&self, asset: AssetId) -> bool {
        lock(&self.runtime).resources.contains(&asset)
    }

    fn is_loading(&self, asset: AssetId) -> bool {
        lock(&self.runtime).loading.contains_key(&asset)
    }

    fn load(&self, asset: AssetId) -> impl Future<Output = Result<(), String>> + Send + 'static {
        let mut rx = self.begin(asset);
        async move {
            match rx.wait_for(Option::is_some).await {
                Ok(value) => (*value)
                    .clone()
                    .unwrap_or_else(|| Err(format!("{} load produced no result", asset))),
                Err(_) => Err(format!("{} load abandoned", asset)),
            }
        }
    }
}
