//! Mutable trainer state and the summaries it produces.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::EvalMode;
use crate::error::Result;
use crate::snapshot::ModelSnapshot;

/// Where the trainer is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainerPhase {
    /// Built, not yet trained.
    #[default]
    Idle,
    /// Inside the epoch loop.
    Training,
    /// Left the loop because `bad_count` exceeded `patience`.
    EarlyStopped,
    /// Ran all epochs or was cancelled.
    Completed,
    /// Evaluating every split.
    Testing,
    /// Testing finished.
    Done,
    /// An error ended training or testing; the best snapshot was restored.
    Failed,
}

/// Why the epoch loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// All requested epochs ran.
    Completed,
    /// Patience was exhausted.
    EarlyStopped,
    /// A cancellation token or callback asked to stop.
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Completed => write!(f, "completed"),
            StopReason::EarlyStopped => write!(f, "early stopped"),
            StopReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Scalars observed at the end of one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// Epoch index.
    pub epoch: usize,
    /// Every scalar of the epoch output.
    #[serde(with = "crate::serde_float::scalar_map")]
    pub metrics: BTreeMap<String, f32>,
    /// Learning rate after the scheduler step.
    pub lr: f64,
    /// Whether the epoch produced a new best.
    pub improved: bool,
}

/// Mutable controller state.
///
/// `best_metric` only moves to strictly better values and `best_snapshot`
/// always holds the parameters of `best_epoch`. Serializable so a run can be
/// resumed from disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerState {
    /// Lifecycle phase.
    pub phase: TrainerPhase,
    /// Next epoch to run.
    pub current_epoch: usize,
    /// Epochs since the last improvement, not counting warmup.
    pub bad_count: usize,
    /// Best value of the evaluation metric so far.
    #[serde(with = "crate::serde_float::scalar")]
    pub best_metric: f32,
    /// Epoch of `best_metric`, `None` before any improvement.
    pub best_epoch: Option<usize>,
    /// Parameters at `best_epoch`, or the initial parameters before any improvement.
    pub best_snapshot: Option<ModelSnapshot>,
    /// Per-epoch records.
    pub history: Vec<EpochRecord>,
}

impl TrainerState {
    /// Fresh state for an evaluation direction.
    #[must_use]
    pub fn new(mode: EvalMode) -> Self {
        Self {
            phase: TrainerPhase::Idle,
            current_epoch: 0,
            bad_count: 0,
            best_metric: mode.initial_best(),
            best_epoch: None,
            best_snapshot: None,
            history: Vec::new(),
        }
    }

    /// Write the state as JSON.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Read a state written by [`save_json`](Self::save_json).
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Result of [`Trainer::train`](crate::Trainer::train).
#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    /// Parameters restored into the model.
    pub best: ModelSnapshot,
    /// Epoch that produced `best`, `None` if no epoch improved.
    pub best_epoch: Option<usize>,
    /// Evaluation metric at `best_epoch`.
    pub best_metric: f32,
    /// Why the loop ended.
    pub stop_reason: StopReason,
    /// Epochs completed in this call.
    pub epochs_run: usize,
    /// Per-epoch records of this and earlier calls.
    pub history: Vec<EpochRecord>,
}

/// Result of [`Trainer::test`](crate::Trainer::test).
#[derive(Debug, Clone, PartialEq)]
pub struct TestReport {
    /// `mean_{metric}` for every evaluated split.
    pub metrics: BTreeMap<String, f32>,
    /// Merged outputs of the last batch of every split plus the means.
    pub output: crate::trainable::Output,
}
