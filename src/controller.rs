use crate::config::{AdaptiveConfig, SchedulerConfig};

/// Result of feeding one frame into the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Unchanged,
    Decreased,
    Increased,
}

/// Adaptive concurrency cap driven by frame-time pressure.
///
/// Additive in both directions: a run of slow frames while loads are active
/// drops `current` by one, a longer run of calm frames raises it by one.
/// Counters decay rather than reset so a short idle gap keeps history.
#[derive(Debug, Clone)]
pub struct ConcurrencyController {
    min: usize,
    max: usize,
    base: usize,
    phase: Option<usize>,
    current: usize,
    spike_count: u32,
    recovery_count: u32,
    tuning: AdaptiveConfig,
}

impl ConcurrencyController {
    pub fn new(config: &SchedulerConfig) -> Self {
        let min = config.concurrency.min.max(1);
        let max = config.concurrency.max.max(min);
        let mut controller = Self {
            min,
            max,
            base: config.concurrency.base.clamp(min, max),
            phase: None,
            current: 0,
            spike_count: 0,
            recovery_count: 0,
            tuning: config.adaptive.clone(),
        };
        controller.current = controller.effective_cap();
        controller
    }

    /// `clamp(min(base, phase), min, max)`.
    pub fn effective_cap(&self) -> usize {
        let target = match self.phase {
            Some(phase) => self.base.min(phase),
            None => self.base,
        };
        target.clamp(self.min, self.max)
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn phase(&self) -> Option<usize> {
        self.phase
    }

    pub fn spike_count(&self) -> u32 {
        self.spike_count
    }

    pub fn recovery_count(&self) -> u32 {
        self.recovery_count
    }

    /// Re-apply the cap to `current`. Returns true if `current` moved.
    ///
    /// With adaptive mode on, `current` only moves down here; the feedback loop
    /// is responsible for climbing back. With it off, `current` tracks the cap.
    pub fn clamp_to_cap(&mut self) -> bool {
        let cap = self.effective_cap();
        let next = if self.tuning.enabled {
            self.current.min(cap).max(self.min)
        } else {
            cap
        };
        let changed = next != self.current;
        self.current = next;
        changed
    }

    pub fn set_base(&mut self, base: usize) {
        self.base = base.clamp(self.min, self.max);
        self.clamp_to_cap();
    }

    pub fn set_phase(&mut self, phase: Option<usize>) {
        self.phase = phase;
        self.clamp_to_cap();
    }

    /// Feed one frame's delta time. `active_loads` is the number of in-flight loads.
    pub fn on_frame(&mut self, delta_secs: f64, active_loads: usize) -> Adjustment {
        if !self.tuning.enabled {
            return Adjustment::Unchanged;
        }

        if active_loads == 0 {
            self.spike_count = self.spike_count.saturating_sub(self.tuning.spike_decay);
            self.recovery_count = self
                .recovery_count
                .saturating_sub(self.tuning.recovery_decay);
            return Adjustment::Unchanged;
        }

        if delta_secs > self.tuning.spike_threshold_secs {
            self.spike_count = self.spike_count.saturating_add(1);
            self.recovery_count = self
                .recovery_count
                .saturating_sub(self.tuning.recovery_decay);
            if self.spike_count >= self.tuning.spike_samples {
                self.spike_count = 0;
                if self.current > self.min {
                    self.current -= 1;
                    return Adjustment::Decreased;
                }
            }
        } else {
            self.recovery_count = self.recovery_count.saturating_add(1);
            self.spike_count = self.spike_count.saturating_sub(self.tuning.spike_decay);
            if self.recovery_count >= self.tuning.recovery_samples {
                self.recovery_count = 0;
                if self.current < self.effective_cap() {
                    self.current += 1;
                    return Adjustment::Increased;
                }
            }
        }

        Adjustment::Unchanged
    }

    pub fn record_success(&mut self) {
        if self.tuning.enabled {
            self.recovery_count = self
                .recovery_count
                .saturating_add(self.tuning.success_recovery_bonus);
        }
    }

    pub fn record_failure(&mut self) {
        if self.tuning.enabled {
            self.spike_count = self
                .spike_count
                .saturating_add(self.tuning.failure_spike_penalty);
        }
    }
}
