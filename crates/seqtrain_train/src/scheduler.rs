//! Metric-driven learning rate scheduling.

use serde::{Deserialize, Serialize};

use crate::config::EvalMode;

/// A scheduler stepped once per epoch with a monitored value.
pub trait LrScheduler {
    /// Record `metric`. Returns the new learning rate if it changed.
    fn step(&mut self, metric: f64) -> Option<f64>;

    /// Learning rate the scheduler currently prescribes.
    fn current_lr(&self) -> f64;

    /// Get the scheduler name.
    fn name(&self) -> &str;
}

/// Settings for [`ReduceLROnPlateau`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlateauConfig {
    /// Whether lower or higher values count as improvement.
    pub mode: EvalMode,
    /// Multiplier applied on reduction.
    pub factor: f64,
    /// Epochs without improvement tolerated before reducing.
    pub patience: usize,
    /// Relative margin a value must beat the best by.
    pub threshold: f64,
    /// Epochs to wait after a reduction before counting again.
    pub cooldown: usize,
    /// Floor for the learning rate.
    pub min_lr: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            mode: EvalMode::Min,
            factor: 0.5,
            patience: 100,
            threshold: 1e-4,
            cooldown: 0,
            min_lr: 0.0,
        }
    }
}

/// ReduceLROnPlateau - reduces LR when metric stops improving.
///
/// This is stateful and must be updated with metric values.
///
/// # Example
///
/// ```rust
/// use seqtrain_train::{LrScheduler, PlateauConfig, ReduceLROnPlateau};
///
/// let config = PlateauConfig { patience: 1, ..PlateauConfig::default() };
/// let mut sched = ReduceLROnPlateau::new(0.1, config);
/// assert_eq!(sched.step(1.0), None);
/// assert_eq!(sched.step(1.0), None);
/// assert_eq!(sched.step(1.0), Some(0.05));
/// ```
#[derive(Debug, Clone)]
pub struct ReduceLROnPlateau {
    config: PlateauConfig,
    current_lr: f64,
    best_value: f64,
    num_bad_epochs: usize,
    cooldown_counter: usize,
}

impl ReduceLROnPlateau {
    /// Create a scheduler starting from `initial_lr`.
    pub fn new(initial_lr: f64, config: PlateauConfig) -> Self {
        let best_value = match config.mode {
            EvalMode::Min => f64::INFINITY,
            EvalMode::Max => f64::NEG_INFINITY,
        };
        Self {
            config,
            current_lr: initial_lr,
            best_value,
            num_bad_epochs: 0,
            cooldown_counter: 0,
        }
    }

    /// Epochs since the last improvement.
    pub fn num_bad_epochs(&self) -> usize {
        self.num_bad_epochs
    }

    fn is_better(&self, metric: f64) -> bool {
        let margin = self.config.threshold;
        match self.config.mode {
            EvalMode::Min => metric < self.best_value * (1.0 - margin),
            EvalMode::Max => metric > self.best_value * (1.0 + margin),
        }
    }
}

impl LrScheduler for ReduceLROnPlateau {
    fn step(&mut self, metric: f64) -> Option<f64> {
        if self.is_better(metric) {
            self.best_value = metric;
            self.num_bad_epochs = 0;
        } else {
            self.num_bad_epochs += 1;
        }

        if self.cooldown_counter > 0 {
            self.cooldown_counter -= 1;
            self.num_bad_epochs = 0;
        }

        if self.num_bad_epochs > self.config.patience {
            self.num_bad_epochs = 0;
            self.cooldown_counter = self.config.cooldown;
            let new_lr = (self.current_lr * self.config.factor).max(self.config.min_lr);
            if new_lr < self.current_lr {
                self.current_lr = new_lr;
                return Some(new_lr);
            }
        }
        None
    }

    fn current_lr(&self) -> f64 {
        self.current_lr
    }

    fn name(&self) -> &str {
        "ReduceLROnPlateau"
    }
}
