//! Metric and artifact logging.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::snapshot::ModelSnapshot;
use crate::trainable::Parameter;

/// Artifact key under which the trainer stores the best parameters.
pub const BEST_MODEL_ARTIFACT: &str = "best_model_state_dict";

/// A named result of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    /// Model parameters.
    Snapshot(ModelSnapshot),
    /// Any structured value.
    Json(serde_json::Value),
    /// Rendered text, e.g. a plot.
    Text(String),
}

impl Artifact {
    /// File extension used when the artifact is written to disk.
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Artifact::Snapshot(_) | Artifact::Json(_) => "json",
            Artifact::Text(_) => "txt",
        }
    }

    /// Write the artifact to `path`.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        match self {
            Artifact::Snapshot(snapshot) => snapshot.save_json(path)?,
            Artifact::Json(value) => std::fs::write(path, serde_json::to_string_pretty(value)?)?,
            Artifact::Text(text) => std::fs::write(path, text)?,
        }
        Ok(())
    }
}

/// Artifacts by name.
pub type Artifacts = BTreeMap<String, Artifact>;

/// Sink for metrics, weights and artifacts of a run.
pub trait MetricsLogger {
    /// Record scalar metrics, optionally tied to an epoch.
    fn log_metrics(&mut self, metrics: &BTreeMap<String, f32>, step: Option<usize>) -> Result<()>;

    /// Record model parameters. Called once when the trainer is built.
    fn log_weights(&mut self, _params: &[Parameter]) -> Result<()> {
        Ok(())
    }

    /// Record artifacts produced at the end of training.
    fn log_artifacts(&mut self, artifacts: &Artifacts) -> Result<()>;

    /// Persist artifacts.
    fn save_artifacts(&mut self, artifacts: &Artifacts) -> Result<()> {
        self.log_artifacts(artifacts)
    }
}

/// Logger that reports through `tracing` and optionally writes artifacts
/// to a directory.
///
/// # Example
///
/// ```rust
/// use std::collections::BTreeMap;
/// use seqtrain_train::{BasicLogger, MetricsLogger};
///
/// let mut logger = BasicLogger::new().with_keys(["mean_dev_loss"]);
/// let metrics = BTreeMap::from([("mean_dev_loss".to_string(), 0.5)]);
/// logger.log_metrics(&metrics, Some(0)).unwrap();
/// assert_eq!(logger.rows().len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct BasicLogger {
    save_dir: Option<PathBuf>,
    keys: Option<Vec<String>>,
    every: usize,
    rows: Vec<(Option<usize>, BTreeMap<String, f32>)>,
}

impl Default for BasicLogger {
    fn default() -> Self {
        Self {
            save_dir: None,
            keys: None,
            every: 1,
            rows: Vec::new(),
        }
    }
}

impl BasicLogger {
    /// Logger that prints every metric at every step and writes nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write artifacts under `dir`, creating it on first use.
    #[must_use]
    pub fn with_save_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = Some(dir.into());
        self
    }

    /// Print only these metrics.
    #[must_use]
    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Print every `every` steps. Metrics are recorded regardless.
    #[must_use]
    pub fn with_verbosity(mut self, every: usize) -> Self {
        self.every = every.max(1);
        self
    }

    /// Artifact directory, if any.
    pub fn save_dir(&self) -> Option<&Path> {
        self.save_dir.as_deref()
    }

    /// Every logged `(step, metrics)` pair, in call order.
    pub fn rows(&self) -> &[(Option<usize>, BTreeMap<String, f32>)] {
        &self.rows
    }

    fn selected<'m>(&self, metrics: &'m BTreeMap<String, f32>) -> Vec<(&'m str, f32)> {
        metrics
            .iter()
            .filter(|(k, _)| {
                self.keys
                    .as_ref()
                    .map_or(true, |keys| keys.iter().any(|s| s == *k))
            })
            .map(|(k, v)| (k.as_str(), *v))
            .collect()
    }
}

impl MetricsLogger for BasicLogger {
    fn log_metrics(&mut self, metrics: &BTreeMap<String, f32>, step: Option<usize>) -> Result<()> {
        let due = step.map_or(true, |s| s % self.every == 0);
        if due {
            let line = self
                .selected(metrics)
                .iter()
                .map(|(k, v)| format!("{k}: {v:.5}"))
                .collect::<Vec<_>>()
                .join("  ");
            match step {
                Some(step) => tracing::info!("epoch: {}  {}", step, line),
                None => tracing::info!("{}", line),
            }
        }
        self.rows.push((step, metrics.clone()));
        Ok(())
    }

    fn log_weights(&mut self, params: &[Parameter]) -> Result<()> {
        let total: usize = params.iter().map(Parameter::numel).sum();
        tracing::info!("Number of parameters: {} in {} tensors", total, params.len());
        Ok(())
    }

    fn log_artifacts(&mut self, artifacts: &Artifacts) -> Result<()> {
        let Some(dir) = &self.save_dir else {
            tracing::debug!(
                "No save directory; dropping artifacts {:?}",
                artifacts.keys().collect::<Vec<_>>()
            );
            return Ok(());
        };
        std::fs::create_dir_all(dir)?;
        for (name, artifact) in artifacts {
            let path = dir.join(format!("{name}.{}", artifact.extension()));
            artifact.write(&path)?;
            tracing::debug!("Wrote artifact {}", path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn test_rows_recorded_even_when_quiet() {
        let mut logger = BasicLogger::new().with_verbosity(10);
        let metrics = BTreeMap::from([("mean_train_loss".to_string(), 1.0)]);
        for step in 0..3 {
            logger.log_metrics(&metrics, Some(step)).unwrap();
        }
        assert_eq!(logger.rows().len(), 3);
        assert_eq!(logger.rows()[2].0, Some(2));
    }

    #[test]
    fn test_key_filter() {
        let logger = BasicLogger::new().with_keys(["b"]);
        let metrics = BTreeMap::from([("a".to_string(), 1.0), ("b".to_string(), 2.0)]);
        assert_eq!(logger.selected(&metrics), vec![("b", 2.0)]);
    }

    #[test]
    fn test_artifacts_written_to_save_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = BasicLogger::new().with_save_dir(dir.path().join("run"));

        let mut snapshot = ModelSnapshot::new();
        snapshot.insert("bias", arr1(&[0.5f32]).into_dyn());
        let artifacts = Artifacts::from([
            (BEST_MODEL_ARTIFACT.to_string(), Artifact::Snapshot(snapshot.clone())),
            ("trace".to_string(), Artifact::Text("...".to_string())),
        ]);
        logger.save_artifacts(&artifacts).unwrap();

        let saved = dir.path().join("run").join("best_model_state_dict.json");
        assert_eq!(ModelSnapshot::load_json(saved).unwrap(), snapshot);
        let text = std::fs::read_to_string(dir.path().join("run").join("trace.txt")).unwrap();
        assert_eq!(text, "...");
    }

    #[test]
    fn test_no_save_dir_is_noop() {
        let mut logger = BasicLogger::new();
        let artifacts = Artifacts::from([("x".to_string(), Artifact::Json(serde_json::json!(1)))]);
        logger.log_artifacts(&artifacts).unwrap();
        assert!(logger.save_dir().is_none());
    }
}
