mod common;

use std::sync::Arc;

use tag_loader::manifest::{load_manifest, parse_manifest, ManifestRegistry};
use tag_loader::{spawn_scheduler, AssetId, LoadError, LoadOptions};

const LEVEL: &str = r#"
[[assets]]
id = 1
tags = ["level-1"]
latency_ms = 5

[[assets]]
id = 2
tags = ["level-1", "hud"]
latency_ms = 10

[[assets]]
id = 3
tags = ["hud"]
latency_ms = 1

[[assets]]
id = 4
tags = ["broken"]
fail = "checksum mismatch"
"#;

#[tokio::test]
async fn manifest_batches_load_end_to_end() {
    let registry = Arc::new(ManifestRegistry::new(parse_manifest(LEVEL).unwrap()));
    let (handle, task) = spawn_scheduler(Arc::clone(&registry), common::test_config(1, 2, 4));

    let level = handle
        .submit(&["level-1"], LoadOptions::default())
        .await
        .unwrap();
    let hud = handle.submit(&["hud"], LoadOptions::default()).await.unwrap();

    assert_eq!(level.wait().await.unwrap().loaded, 2);
    assert_eq!(hud.wait().await.unwrap().loaded, 2);

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.progress.loaded, 3);
    assert_eq!(snapshot.progress.errors, 0);

    drop(handle);
    task.await.unwrap();
}

#[tokio::test]
async fn manifest_failure_rejects_batch() {
    let registry = Arc::new(ManifestRegistry::new(parse_manifest(LEVEL).unwrap()));
    let (handle, _task) = spawn_scheduler(registry, common::test_config(1, 2, 4));

    let err = handle
        .load_by_tags(&["broken", "hud"], LoadOptions::default())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LoadError::AssetFailed {
            asset: AssetId(4),
            message: "checksum mismatch".to_string()
        }
    );
}

#[test]
fn load_manifest_reports_path_on_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("level.toml");
    std::fs::write(&path, "[[assets]]\nid = 1\n[[assets]]\nid = 1\n").unwrap();

    let err = load_manifest(&path).unwrap_err();
    assert!(err.contains("level.toml"), "got: {}", err);
    assert!(err.contains("Duplicate asset id 1"), "got: {}", err);

    let missing = load_manifest(&dir.path().join("nope.toml")).unwrap_err();
    assert!(missing.starts_with("Failed to read"), "got: {}", missing);
}
