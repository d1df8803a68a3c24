#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use tag_loader::config::{ConcurrencyConfig, SchedulerConfig};
use tag_loader::registry::MockAssetRegistry;
use tag_loader::types::SchedulerSnapshot;
use tag_loader::{spawn_scheduler, SchedulerHandle};

/// Frame delta comfortably above the default spike threshold.
pub const SLOW_FRAME: f64 = 0.2;

/// A 60 fps frame.
pub const FAST_FRAME: f64 = 1.0 / 60.0;

/// Creates a `SchedulerConfig` with the given concurrency bounds.
///
/// Adaptive mode is on with short sample windows so tests stay small:
/// 3 spike frames to back off, 5 calm frames to recover.
pub fn test_config(min: usize, base: usize, max: usize) -> SchedulerConfig {
    let mut config = SchedulerConfig::default();
    config.concurrency = ConcurrencyConfig { min, base, max };
    config.adaptive.spike_threshold_secs = 0.05;
    config.adaptive.spike_samples = 3;
    config.adaptive.recovery_samples = 5;
    config
}

/// Same as `test_config` with the feedback loop turned off.
pub fn fixed_config(min: usize, base: usize, max: usize) -> SchedulerConfig {
    let mut config = test_config(min, base, max);
    config.adaptive.enabled = false;
    config
}

/// Spawns a scheduler over `registry`.
///
/// The task handle is dropped; the actor stops once the returned handle and
/// all its clones are dropped.
pub fn start(registry: &Arc<MockAssetRegistry>, config: SchedulerConfig) -> SchedulerHandle {
    let (handle, _task) = spawn_scheduler(Arc::clone(registry), config);
    handle
}

/// Polls snapshots until `predicate` holds, panicking after five seconds.
pub async fn wait_until<F>(handle: &SchedulerHandle, predicate: F) -> SchedulerSnapshot
where
    F: Fn(&SchedulerSnapshot) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = handle.snapshot().await.expect("scheduler should be running");
        if predicate(&snapshot) {
            return snapshot;
        }
        assert!(
            Instant::now() < deadline,
            "Timed out waiting for scheduler state, last snapshot: {:?}",
            snapshot
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Waits until `count` loads have finished (success or failure).
pub async fn wait_for_finished(handle: &SchedulerHandle, count: usize) -> SchedulerSnapshot {
    wait_until(handle, |s| s.progress.loaded >= count).await
}

/// Feeds `frames` identical frame deltas.
pub async fn feed_frames(handle: &SchedulerHandle, delta: f64, frames: usize) {
    for _ in 0..frames {
        handle.tick(delta).await.expect("tick");
    }
}
