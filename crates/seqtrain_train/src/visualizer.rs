//! Plotting hooks driven by the trainer.

use std::collections::BTreeMap;

use seqtrain_data::LoaderSet;

use crate::error::Result;
use crate::logger::{Artifact, Artifacts};
use crate::state::TrainerState;
use crate::trainable::{Mode, Output};

/// Produces figures from epoch outputs.
///
/// The trainer calls [`plot`](Visualizer::plot) after every dev pass while
/// training and once after testing, and merges [`output`](Visualizer::output)
/// into the artifacts it logs.
pub trait Visualizer {
    /// Tell the visualizer which phase the following `plot` calls belong to.
    fn set_mode(&mut self, _mode: Mode) {}

    /// Record or draw one output.
    fn plot(&mut self, output: &Output, data: &LoaderSet, state: &TrainerState) -> Result<()>;

    /// Figures produced so far, by name.
    fn output(&self) -> Artifacts;
}

/// A visualizer that draws nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpVisualizer;

impl Visualizer for NoOpVisualizer {
    fn plot(&mut self, _output: &Output, _data: &LoaderSet, _state: &TrainerState) -> Result<()> {
        Ok(())
    }

    fn output(&self) -> Artifacts {
        Artifacts::new()
    }
}

/// Renders epoch means as ASCII curves.
///
/// In train mode every `mean_*` scalar (or the configured subset) is
/// appended to its curve. In eval mode the scalars are kept as a summary
/// table instead.
#[derive(Debug, Clone)]
pub struct CurveVisualizer {
    mode: Mode,
    keys: Option<Vec<String>>,
    curves: BTreeMap<String, Vec<f32>>,
    summary: BTreeMap<String, f32>,
    width: usize,
    height: usize,
}

impl Default for CurveVisualizer {
    fn default() -> Self {
        Self {
            mode: Mode::Train,
            keys: None,
            curves: BTreeMap::new(),
            summary: BTreeMap::new(),
            width: 50,
            height: 10,
        }
    }
}

impl CurveVisualizer {
    /// Create a curve visualizer with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Plot only these scalars.
    #[must_use]
    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Set the graph width in characters.
    #[must_use]
    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width.max(20);
        self
    }

    /// Set the graph height in characters.
    #[must_use]
    pub fn with_height(mut self, height: usize) -> Self {
        self.height = height.max(5);
        self
    }

    /// Recorded values of one curve.
    pub fn curve(&self, name: &str) -> Option<&[f32]> {
        self.curves.get(name).map(Vec::as_slice)
    }

    fn wanted(&self, key: &str) -> bool {
        match &self.keys {
            Some(keys) => keys.iter().any(|k| k == key),
            None => key.starts_with("mean_"),
        }
    }

    fn render(&self, label: &str, values: &[f32]) -> String {
        let finite: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return format!("{label}: no finite values\n");
        }
        let min_val = finite.iter().copied().fold(f32::INFINITY, f32::min);
        let max_val = finite.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let range = (max_val - min_val).max(1e-6);

        let mut out = format!("┌─ {label} ");
        out.push_str(&"─".repeat(self.width.saturating_sub(label.len() + 4)));
        out.push_str("┐\n");

        let mut grid = vec![vec![' '; self.width]; self.height];
        let step = values.len() as f32 / self.width as f32;
        for col in 0..self.width {
            let idx = (col as f32 * step) as usize;
            let Some(&val) = values.get(idx) else { break };
            if !val.is_finite() {
                continue;
            }
            let normalized = (val - min_val) / range;
            let row = ((1.0 - normalized) * (self.height - 1) as f32) as usize;
            grid[row.min(self.height - 1)][col] = '█';
        }

        for (i, row) in grid.iter().enumerate() {
            if i == 0 {
                out.push_str(&format!("│{max_val:>8.4} "));
            } else if i == self.height - 1 {
                out.push_str(&format!("│{min_val:>8.4} "));
            } else {
                out.push_str("│         ");
            }
            out.extend(row.iter());
            out.push_str("│\n");
        }
        out.push_str("└─────────");
        out.push_str(&"─".repeat(self.width));
        out.push_str("┘\n");
        out.push_str(&format!("          Epochs: 1 → {}\n", values.len()));
        out
    }
}

impl Visualizer for CurveVisualizer {
    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn plot(&mut self, output: &Output, _data: &LoaderSet, _state: &TrainerState) -> Result<()> {
        let scalars = output.scalars();
        match self.mode {
            Mode::Train => {
                for (name, value) in scalars {
                    if self.wanted(&name) {
                        self.curves.entry(name).or_default().push(value);
                    }
                }
            }
            Mode::Eval => {
                let kept: Vec<_> = scalars.into_iter().filter(|(k, _)| self.wanted(k)).collect();
                self.summary.extend(kept);
            }
        }
        Ok(())
    }

    fn output(&self) -> Artifacts {
        let mut artifacts: Artifacts = self
            .curves
            .iter()
            .map(|(name, values)| {
                (format!("curve_{name}"), Artifact::Text(self.render(name, values)))
            })
            .collect();
        if !self.summary.is_empty() {
            let summary = self
                .summary
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::json!(v)))
                .collect::<serde_json::Map<_, _>>();
            artifacts.insert(
                "eval_summary".to_string(),
                Artifact::Json(serde_json::Value::Object(summary)),
            );
        }
        artifacts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvalMode;
    use ndarray::Array2;
    use seqtrain_core::Split;
    use seqtrain_data::{BundleLoader, SequenceDataset};

    fn loaders() -> LoaderSet {
        let ds = SequenceDataset::builder()
            .horizon(2)
            .sequence("Y", Array2::from_shape_fn((12, 1), |(t, _)| t as f32))
            .build()
            .unwrap();
        let train = BundleLoader::builder(ds.nstep(Split::Train).clone())
            .build()
            .unwrap();
        LoaderSet::new(train)
    }

    fn epoch_output(train: f32, dev: f32) -> Output {
        let mut output = Output::new();
        output.insert_scalar("train_loss", train);
        output.insert_scalar("mean_train_loss", train);
        output.insert_scalar("mean_dev_loss", dev);
        output
    }

    #[test]
    fn test_train_mode_builds_curves() {
        let data = loaders();
        let state = TrainerState::new(EvalMode::Min);
        let mut viz = CurveVisualizer::new();
        viz.set_mode(Mode::Train);
        viz.plot(&epoch_output(2.0, 3.0), &data, &state).unwrap();
        viz.plot(&epoch_output(1.0, 2.5), &data, &state).unwrap();

        assert_eq!(viz.curve("mean_train_loss").unwrap(), &[2.0, 1.0]);
        assert!(viz.curve("train_loss").is_none());

        let artifacts = viz.output();
        assert!(artifacts.contains_key("curve_mean_dev_loss"));
        assert!(!artifacts.contains_key("eval_summary"));
        match &artifacts["curve_mean_train_loss"] {
            Artifact::Text(text) => assert!(text.contains("Epochs: 1 → 2")),
            other => panic!("unexpected artifact {other:?}"),
        }
    }

    #[test]
    fn test_eval_mode_writes_summary() {
        let data = loaders();
        let state = TrainerState::new(EvalMode::Min);
        let mut viz = CurveVisualizer::new().with_keys(["mean_dev_loss"]);
        viz.set_mode(Mode::Eval);
        viz.plot(&epoch_output(1.0, 0.25), &data, &state).unwrap();

        let artifacts = viz.output();
        assert_eq!(
            artifacts["eval_summary"],
            Artifact::Json(serde_json::json!({"mean_dev_loss": 0.25}))
        );
    }

    #[test]
    fn test_render_handles_nan() {
        let viz = CurveVisualizer::new();
        assert!(viz.render("x", &[f32::NAN]).contains("no finite values"));
        let text = viz.render("x", &[1.0, f32::NAN, 0.5]);
        assert!(text.contains('█'));
    }

    #[test]
    fn test_noop_visualizer_produces_nothing() {
        let data = loaders();
        let state = TrainerState::new(EvalMode::Min);
        let mut viz = NoOpVisualizer;
        viz.set_mode(Mode::Eval);
        viz.plot(&epoch_output(1.0, 0.5), &data, &state).unwrap();
        assert!(viz.output().is_empty());
    }
}
