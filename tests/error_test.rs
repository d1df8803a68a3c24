use tag_loader::{AssetId, LoadError};

#[test]
fn asset_failure_names_asset_and_message() {
    let err = LoadError::AssetFailed {
        asset: AssetId(42),
        message: "texture decode failed".to_string(),
    };
    assert_eq!(err.to_string(), "Failed to load asset-42: texture decode failed");
    assert!(err.is_asset_failure());
    assert!(!err.is_cancelled());
}

#[test]
fn cancelled_is_distinguishable() {
    assert!(LoadError::Cancelled.is_cancelled());
    assert!(!LoadError::Cancelled.is_asset_failure());
    assert!(!LoadError::SchedulerShutDown.is_cancelled());
    assert_eq!(LoadError::Cancelled.to_string(), "Batch cancelled");
}

#[test]
fn invalid_config_lists_each_error() {
    let err = LoadError::InvalidConfig(vec![
        "concurrency.min must be >= 1".to_string(),
        "adaptive.spike_samples must be >= 1".to_string(),
    ]);
    assert_eq!(
        err.to_string(),
        "Config validation failed:\n  - concurrency.min must be >= 1\n  - adaptive.spike_samples must be >= 1"
    );
}

#[test]
fn errors_are_cloneable_for_shared_batches() {
    let err = LoadError::AssetFailed {
        asset: AssetId(1),
        message: "404".to_string(),
    };
    assert_eq!(err.clone(), err);
}
