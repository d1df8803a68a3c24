use std::path::Path;

use serde::Deserialize;

use crate::error::LoadError;

#[derive(Default, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub concurrency: ConcurrencyConfig,
    pub adaptive: AdaptiveConfig,
    pub scheduler: ChannelConfig,
}

/// Concurrency bounds. `base` is the caller-facing target, clamped to `[min, max]`.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub min: usize,
    pub base: usize,
    pub max: usize,
}

/// Frame-time feedback loop tuning.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub enabled: bool,
    /// Frame delta (seconds) above which a frame counts as a spike.
    pub spike_threshold_secs: f64,
    /// Consecutive spike frames before the cap drops by one.
    pub spike_samples: u32,
    /// Consecutive calm frames before the cap rises by one.
    pub recovery_samples: u32,
    pub spike_decay: u32,
    pub recovery_decay: u32,
    pub success_recovery_bonus: u32,
    pub failure_spike_penalty: u32,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ChannelConfig {
    pub command_capacity: usize,
    pub event_capacity: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            min: 1,
            base: 4,
            max: 8,
        }
    }
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            spike_threshold_secs: 0.05,
            spike_samples: 3,
            recovery_samples: 60,
            spike_decay: 1,
            recovery_decay: 5,
            success_recovery_bonus: 3,
            failure_spike_penalty: 1,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_capacity: 64,
            event_capacity: 256,
        }
    }
}

pub fn validate(config: &SchedulerConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    let c = &config.concurrency;

    if c.min < 1 {
        errors.push("concurrency.min must be >= 1".to_string());
    }
    if c.max < c.min {
        errors.push(format!(
            "concurrency.max ({}) must be >= concurrency.min ({})",
            c.max, c.min
        ));
    }
    if c.base < c.min || c.base > c.max {
        errors.push(format!(
            "concurrency.base ({}) must be within [{}, {}]",
            c.base, c.min, c.max
        ));
    }

    let a = &config.adaptive;
    if !(a.spike_threshold_secs.is_finite() && a.spike_threshold_secs > 0.0) {
        errors.push("adaptive.spike_threshold_secs must be a positive number".to_string());
    }
    if a.spike_samples < 1 {
        errors.push("adaptive.spike_samples must be >= 1".to_string());
    }
    if a.recovery_samples < 1 {
        errors.push("adaptive.recovery_samples must be >= 1".to_string());
    }

    if config.scheduler.command_capacity < 1 {
        errors.push("scheduler.command_capacity must be >= 1".to_string());
    }
    if config.scheduler.event_capacity < 1 {
        errors.push("scheduler.event_capacity must be >= 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub fn parse_config(contents: &str) -> Result<SchedulerConfig, LoadError> {
    let config: SchedulerConfig =
        toml::from_str(contents).map_err(|e| LoadError::Config(e.to_string()))?;
    validate(&config).map_err(LoadError::InvalidConfig)?;
    Ok(config)
}

/// Load a config file, falling back to defaults when it does not exist.
pub fn load_config(path: &Path) -> Result<SchedulerConfig, LoadError> {
    if !path.exists() {
        return Ok(SchedulerConfig::default());
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| LoadError::Config(format!("Failed to read {}: {}", path.display(), e)))?;

    parse_config(&contents).map_err(|e| match e {
        LoadError::Config(msg) => {
            LoadError::Config(format!("Failed to parse {}: {}", path.display(), msg))
        }
        other => other,
    })
}
