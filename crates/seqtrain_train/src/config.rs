//! Trainer configuration.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use seqtrain_core::Split;

use crate::error::{Result, TrainError};
use crate::scheduler::PlateauConfig;

/// Direction in which a monitored metric improves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalMode {
    /// Lower is better.
    #[default]
    Min,
    /// Higher is better.
    Max,
}

impl EvalMode {
    /// Starting value of the best metric: the largest finite `f32` for
    /// `Min`, its negation for `Max`.
    #[must_use]
    pub const fn initial_best(&self) -> f32 {
        match self {
            EvalMode::Min => f32::MAX,
            EvalMode::Max => -f32::MAX,
        }
    }

    /// Whether `candidate` is strictly better than `best`.
    ///
    /// Non-finite candidates never improve.
    #[must_use]
    pub fn is_better(&self, candidate: f32, best: f32) -> bool {
        if !candidate.is_finite() {
            return false;
        }
        match self {
            EvalMode::Min => candidate < best,
            EvalMode::Max => candidate > best,
        }
    }
}

impl fmt::Display for EvalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalMode::Min => write!(f, "min"),
            EvalMode::Max => write!(f, "max"),
        }
    }
}

/// Configuration for the [`Trainer`](crate::Trainer).
///
/// # Example
///
/// ```rust
/// use seqtrain_train::{EvalMode, TrainerConfig};
///
/// let config = TrainerConfig::default()
///     .with_epochs(50)
///     .with_patience(10)
///     .with_eval_mode(EvalMode::Min);
/// assert_eq!(config.eval_metric, "mean_dev_loss");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Epochs per call to `train`.
    pub epochs: usize,
    /// Log the mean training loss every `epoch_verbose` epochs when no logger is set.
    pub epoch_verbose: usize,
    /// Non-improving epochs tolerated before stopping.
    pub patience: usize,
    /// Epochs whose lack of improvement does not count towards `patience`.
    pub warmup: usize,
    /// Ceiling for the global gradient norm.
    pub clip: f32,
    /// Loss backpropagated on training batches.
    pub train_metric: String,
    /// Metric averaged over dev batches.
    pub dev_metric: String,
    /// Metric averaged over test batches.
    pub test_metric: String,
    /// Output key used for model selection and early stopping.
    pub eval_metric: String,
    /// Improvement direction of `eval_metric`.
    pub eval_mode: EvalMode,
    /// Step a [`ReduceLROnPlateau`](crate::ReduceLROnPlateau) with the mean training loss.
    pub lr_scheduler: bool,
    /// Scheduler settings, used when `lr_scheduler` is set.
    pub plateau: PlateauConfig,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs: 1000,
            epoch_verbose: 1,
            patience: 5,
            warmup: 0,
            clip: 100.0,
            train_metric: "train_loss".to_string(),
            dev_metric: "dev_loss".to_string(),
            test_metric: "test_loss".to_string(),
            eval_metric: "mean_dev_loss".to_string(),
            eval_mode: EvalMode::Min,
            lr_scheduler: false,
            plateau: PlateauConfig::default(),
        }
    }
}

impl TrainerConfig {
    /// Read a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Set the epoch count.
    #[must_use]
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Set the early-stopping patience.
    #[must_use]
    pub fn with_patience(mut self, patience: usize) -> Self {
        self.patience = patience;
        self
    }

    /// Set the warmup length.
    #[must_use]
    pub fn with_warmup(mut self, warmup: usize) -> Self {
        self.warmup = warmup;
        self
    }

    /// Set the gradient norm ceiling.
    #[must_use]
    pub fn with_clip(mut self, clip: f32) -> Self {
        self.clip = clip;
        self
    }

    /// Set the model-selection metric.
    #[must_use]
    pub fn with_eval_metric(mut self, metric: impl Into<String>) -> Self {
        self.eval_metric = metric.into();
        self
    }

    /// Set the improvement direction.
    #[must_use]
    pub fn with_eval_mode(mut self, mode: EvalMode) -> Self {
        self.eval_mode = mode;
        self
    }

    /// Enable or disable the plateau scheduler.
    #[must_use]
    pub fn with_lr_scheduler(mut self, enabled: bool) -> Self {
        self.lr_scheduler = enabled;
        self
    }

    /// Set the logging interval.
    #[must_use]
    pub fn with_epoch_verbose(mut self, every: usize) -> Self {
        self.epoch_verbose = every;
        self
    }

    /// Metric evaluated on a split.
    #[must_use]
    pub fn metric_for(&self, split: Split) -> &str {
        match split {
            Split::Train => &self.train_metric,
            Split::Dev => &self.dev_metric,
            Split::Test => &self.test_metric,
        }
    }

    /// Output key of the epoch mean of a metric, e.g. `mean_train_loss`.
    #[must_use]
    pub fn mean_key(metric: &str) -> String {
        format!("mean_{metric}")
    }

    /// Whether `eval_metric` is produced by the dev pass.
    #[must_use]
    pub fn eval_uses_dev(&self) -> bool {
        self.eval_metric == self.dev_metric || self.eval_metric == Self::mean_key(&self.dev_metric)
    }

    /// Check values that would make training meaningless.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::Configuration`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.epoch_verbose == 0 {
            return Err(TrainError::Configuration(
                "epoch_verbose must be at least 1".to_string(),
            ));
        }
        if !(self.clip.is_finite() && self.clip > 0.0) {
            return Err(TrainError::Configuration(format!(
                "clip must be a positive finite number, got {}",
                self.clip
            )));
        }
        for (field, name) in [
            ("train_metric", &self.train_metric),
            ("dev_metric", &self.dev_metric),
            ("test_metric", &self.test_metric),
            ("eval_metric", &self.eval_metric),
        ] {
            if name.is_empty() {
                return Err(TrainError::Configuration(format!("{field} is empty")));
            }
        }
        if self.lr_scheduler && !(self.plateau.factor > 0.0 && self.plateau.factor < 1.0) {
            return Err(TrainError::Configuration(format!(
                "plateau factor must be in (0, 1), got {}",
                self.plateau.factor
            )));
        }
        Ok(())
    }
}
