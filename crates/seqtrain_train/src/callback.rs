//! Callback system for training hooks.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::config::TrainerConfig;
use crate::error::{Result, TrainError};
use crate::state::TrainerState;
use crate::trainable::Output;

/// Lifecycle points, in the order they fire.
///
/// Per run: `BeginTrain`, then per epoch `EndBatch` once per training batch
/// followed by `BeginEpoch`, `BeginEval`, `EndEval`, `EndEpoch`; then
/// `EndTrain`. Testing fires `BeginTest` and `EndTest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    /// Before the first epoch.
    BeginTrain,
    /// After each optimizer step.
    EndBatch,
    /// After the training batches of an epoch, once the mean training loss is known.
    BeginEpoch,
    /// After the dev pass, before model selection.
    BeginEval,
    /// After model selection and metric logging.
    EndEval,
    /// Last hook of an epoch.
    EndEpoch,
    /// After the epoch loop, before the best snapshot is restored.
    EndTrain,
    /// Before the test pass.
    BeginTest,
    /// After the test pass.
    EndTest,
}

impl Hook {
    /// Snake-case name of the hook.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Hook::BeginTrain => "begin_train",
            Hook::EndBatch => "end_batch",
            Hook::BeginEpoch => "begin_epoch",
            Hook::BeginEval => "begin_eval",
            Hook::EndEval => "end_eval",
            Hook::EndEpoch => "end_epoch",
            Hook::EndTrain => "end_train",
            Hook::BeginTest => "begin_test",
            Hook::EndTest => "end_test",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the trainer passed to callbacks.
///
/// The only thing a callback can change is whether training continues,
/// through [`request_stop`](Self::request_stop).
pub struct CallbackContext<'a, M: ?Sized> {
    /// The model being trained.
    pub model: &'a M,
    /// Trainer configuration.
    pub config: &'a TrainerConfig,
    /// Trainer state as of this hook.
    pub state: &'a TrainerState,
    /// Current epoch.
    pub epoch: usize,
    /// Training batch index, set for `EndBatch` only.
    pub batch: Option<usize>,
    /// Current learning rate.
    pub lr: f64,
    stop: Option<String>,
}

impl<'a, M: ?Sized> CallbackContext<'a, M> {
    /// Create a context.
    pub fn new(
        model: &'a M,
        config: &'a TrainerConfig,
        state: &'a TrainerState,
        epoch: usize,
        lr: f64,
    ) -> Self {
        Self {
            model,
            config,
            state,
            epoch,
            batch: None,
            lr,
            stop: None,
        }
    }

    /// Set the batch index.
    #[must_use]
    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = Some(batch);
        self
    }

    /// Ask the trainer to stop at the next boundary. The best snapshot is
    /// still restored.
    pub fn request_stop(&mut self, reason: impl Into<String>) {
        if self.stop.is_none() {
            self.stop = Some(reason.into());
        }
    }

    /// Reason given by the first callback that requested a stop.
    #[must_use]
    pub fn stop_reason(&self) -> Option<&str> {
        self.stop.as_deref()
    }
}

/// Trait for training callbacks.
///
/// Every hook defaults to a no-op. Hooks receive the trainer context and
/// the output mapping current at that point (empty for `begin_train` and
/// `begin_test`). They run on the training thread and must return promptly.
pub trait Callback<M: ?Sized> {
    /// Called before training starts.
    fn begin_train(&mut self, _ctx: &mut CallbackContext<'_, M>, _output: &Output) -> Result<()> {
        Ok(())
    }

    /// Called after each training batch.
    fn end_batch(&mut self, _ctx: &mut CallbackContext<'_, M>, _output: &Output) -> Result<()> {
        Ok(())
    }

    /// Called once the epoch's training batches are done.
    fn begin_epoch(&mut self, _ctx: &mut CallbackContext<'_, M>, _output: &Output) -> Result<()> {
        Ok(())
    }

    /// Called after the dev pass.
    fn begin_eval(&mut self, _ctx: &mut CallbackContext<'_, M>, _output: &Output) -> Result<()> {
        Ok(())
    }

    /// Called after model selection.
    fn end_eval(&mut self, _ctx: &mut CallbackContext<'_, M>, _output: &Output) -> Result<()> {
        Ok(())
    }

    /// Called at the end of each epoch.
    fn end_epoch(&mut self, _ctx: &mut CallbackContext<'_, M>, _output: &Output) -> Result<()> {
        Ok(())
    }

    /// Called after the epoch loop.
    fn end_train(&mut self, _ctx: &mut CallbackContext<'_, M>, _output: &Output) -> Result<()> {
        Ok(())
    }

    /// Called before testing.
    fn begin_test(&mut self, _ctx: &mut CallbackContext<'_, M>, _output: &Output) -> Result<()> {
        Ok(())
    }

    /// Called after testing.
    fn end_test(&mut self, _ctx: &mut CallbackContext<'_, M>, _output: &Output) -> Result<()> {
        Ok(())
    }

    /// Get the callback name.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// An ordered list of callbacks.
pub struct CallbackList<M: ?Sized> {
    callbacks: Vec<Box<dyn Callback<M>>>,
}

impl<M: ?Sized> Default for CallbackList<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: ?Sized> CallbackList<M> {
    /// Create a new empty callback list.
    pub fn new() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }

    /// Add a callback.
    pub fn add<C: Callback<M> + 'static>(&mut self, callback: C) {
        self.callbacks.push(Box::new(callback));
    }

    /// Number of callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Names of the callbacks, in call order.
    pub fn names(&self) -> Vec<&str> {
        self.callbacks.iter().map(|c| c.name()).collect()
    }

    /// Invoke `hook` on every callback in insertion order.
    pub fn dispatch(
        &mut self,
        hook: Hook,
        ctx: &mut CallbackContext<'_, M>,
        output: &Output,
    ) -> Result<()> {
        for cb in &mut self.callbacks {
            match hook {
                Hook::BeginTrain => cb.begin_train(ctx, output)?,
                Hook::EndBatch => cb.end_batch(ctx, output)?,
                Hook::BeginEpoch => cb.begin_epoch(ctx, output)?,
                Hook::BeginEval => cb.begin_eval(ctx, output)?,
                Hook::EndEval => cb.end_eval(ctx, output)?,
                Hook::EndEpoch => cb.end_epoch(ctx, output)?,
                Hook::EndTrain => cb.end_train(ctx, output)?,
                Hook::BeginTest => cb.begin_test(ctx, output)?,
                Hook::EndTest => cb.end_test(ctx, output)?,
            }
        }
        Ok(())
    }
}

/// Logs run progress through `tracing`.
pub struct ProgressCallback {
    every: usize,
}

impl ProgressCallback {
    /// Log every `every` epochs (at least 1).
    pub fn new(every: usize) -> Self {
        Self {
            every: every.max(1),
        }
    }
}

impl Default for ProgressCallback {
    fn default() -> Self {
        Self::new(1)
    }
}

impl<M: ?Sized> Callback<M> for ProgressCallback {
    fn begin_train(&mut self, ctx: &mut CallbackContext<'_, M>, _output: &Output) -> Result<()> {
        tracing::info!(
            "Starting training at epoch {} for {} epochs",
            ctx.epoch,
            ctx.config.epochs
        );
        Ok(())
    }

    fn end_epoch(&mut self, ctx: &mut CallbackContext<'_, M>, output: &Output) -> Result<()> {
        if ctx.epoch % self.every != 0 {
            return Ok(());
        }
        let train_key = TrainerConfig::mean_key(&ctx.config.train_metric);
        let show = |key: &str| {
            output
                .get(key)
                .and_then(|v| v.as_scalar())
                .map(|v| format!("{v:.4}"))
                .unwrap_or_default()
        };
        tracing::info!(
            "Epoch {}: {}={}, {}={}, best={:.4}, bad_count={}, lr={:.6}",
            ctx.epoch,
            train_key,
            show(&train_key),
            ctx.config.eval_metric,
            show(&ctx.config.eval_metric),
            ctx.state.best_metric,
            ctx.state.bad_count,
            ctx.lr
        );
        Ok(())
    }

    fn end_train(&mut self, ctx: &mut CallbackContext<'_, M>, _output: &Output) -> Result<()> {
        match ctx.state.best_epoch {
            Some(epoch) => tracing::info!(
                "Training finished: best {}={:.4} at epoch {}",
                ctx.config.eval_metric,
                ctx.state.best_metric,
                epoch
            ),
            None => tracing::info!("Training finished without improvement"),
        }
        Ok(())
    }

    fn end_test(&mut self, _ctx: &mut CallbackContext<'_, M>, output: &Output) -> Result<()> {
        for (name, value) in output.scalars().iter().filter(|(k, _)| k.starts_with("mean_")) {
            tracing::info!("  {}: {:.4}", name, value);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "ProgressCallback"
    }
}

/// Per-epoch scalar series recorded by [`HistoryCallback`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricHistory {
    epochs: Vec<usize>,
    learning_rates: Vec<f64>,
    #[serde(with = "crate::serde_float::series_map")]
    series: BTreeMap<String, Vec<f32>>,
}

impl MetricHistory {
    /// Epoch indices, one per record.
    pub fn epochs(&self) -> &[usize] {
        &self.epochs
    }

    /// Learning rate at the end of each recorded epoch.
    pub fn learning_rates(&self) -> &[f64] {
        &self.learning_rates
    }

    /// Values of one metric. Epochs where it was absent hold NaN.
    pub fn series(&self, name: &str) -> Option<&[f32]> {
        self.series.get(name).map(Vec::as_slice)
    }

    /// Recorded metric names.
    pub fn metric_names(&self) -> Vec<&str> {
        self.series.keys().map(String::as_str).collect()
    }

    /// Number of recorded epochs.
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    fn record(&mut self, epoch: usize, lr: f64, scalars: BTreeMap<String, f32>) {
        let n = self.epochs.len();
        for (name, value) in scalars {
            let column = self
                .series
                .entry(name)
                .or_insert_with(|| vec![f32::NAN; n]);
            column.push(value);
        }
        for column in self.series.values_mut() {
            column.resize(n + 1, f32::NAN);
        }
        self.epochs.push(epoch);
        self.learning_rates.push(lr);
    }
}

/// Records every scalar of every epoch output.
///
/// Keep a [`handle`](Self::handle) before handing the callback to the
/// trainer to read the history afterwards.
#[derive(Default)]
pub struct HistoryCallback {
    history: Arc<Mutex<MetricHistory>>,
}

impl HistoryCallback {
    /// Create a new history callback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to the recorded history.
    pub fn handle(&self) -> Arc<Mutex<MetricHistory>> {
        Arc::clone(&self.history)
    }
}

impl<M: ?Sized> Callback<M> for HistoryCallback {
    fn end_epoch(&mut self, ctx: &mut CallbackContext<'_, M>, output: &Output) -> Result<()> {
        let mut history = self
            .history
            .lock()
            .map_err(|e| TrainError::CallbackError(format!("history lock poisoned: {e}")))?;
        history.record(ctx.epoch, ctx.lr, output.scalars());
        Ok(())
    }

    fn name(&self) -> &str {
        "HistoryCallback"
    }
}

/// Requests a stop as soon as a training batch produces a non-finite loss.
#[derive(Debug, Default)]
pub struct TerminateOnNanCallback {
    nan_count: usize,
}

impl TerminateOnNanCallback {
    /// Create a new terminate on NaN callback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-finite losses seen so far.
    pub fn nan_count(&self) -> usize {
        self.nan_count
    }
}

impl<M: ?Sized> Callback<M> for TerminateOnNanCallback {
    fn end_batch(&mut self, ctx: &mut CallbackContext<'_, M>, output: &Output) -> Result<()> {
        let loss = output.scalar(&ctx.config.train_metric)?;
        if !loss.is_finite() {
            self.nan_count += 1;
            tracing::error!(
                "NaN/Inf detected in training loss at epoch {} batch {:?}",
                ctx.epoch,
                ctx.batch
            );
            ctx.request_stop(format!("non-finite {}", ctx.config.train_metric));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "TerminateOnNanCallback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvalMode;

    struct Recorder {
        log: Arc<Mutex<Vec<Hook>>>,
    }

    impl Callback<()> for Recorder {
        fn begin_train(&mut self, _: &mut CallbackContext<'_, ()>, _: &Output) -> Result<()> {
            self.log.lock().unwrap().push(Hook::BeginTrain);
            Ok(())
        }

        fn end_test(&mut self, _: &mut CallbackContext<'_, ()>, _: &Output) -> Result<()> {
            self.log.lock().unwrap().push(Hook::EndTest);
            Ok(())
        }
    }

    fn loss_output(loss: f32) -> Output {
        let mut output = Output::new();
        output.insert_scalar("train_loss", loss);
        output
    }

    #[test]
    fn test_dispatch_runs_in_insertion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut list = CallbackList::<()>::new();
        list.add(Recorder { log: Arc::clone(&log) });
        list.add(Recorder { log: Arc::clone(&log) });
        list.add(ProgressCallback::default());

        let config = TrainerConfig::default();
        let state = TrainerState::new(EvalMode::Min);
        let mut ctx = CallbackContext::new(&(), &config, &state, 0, 0.1);

        list.dispatch(Hook::BeginTrain, &mut ctx, &Output::new()).unwrap();
        list.dispatch(Hook::EndEpoch, &mut ctx, &loss_output(1.0)).unwrap();
        list.dispatch(Hook::EndTest, &mut ctx, &Output::new()).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![Hook::BeginTrain, Hook::BeginTrain, Hook::EndTest, Hook::EndTest]
        );
        assert_eq!(list.len(), 3);
        assert_eq!(list.names()[2], "ProgressCallback");
    }

    #[test]
    fn test_terminate_on_nan_requests_stop() {
        let config = TrainerConfig::default();
        let state = TrainerState::new(EvalMode::Min);
        let mut cb = TerminateOnNanCallback::new();

        let mut ctx = CallbackContext::new(&(), &config, &state, 2, 0.1).with_batch(0);
        Callback::<()>::end_batch(&mut cb, &mut ctx, &loss_output(0.5)).unwrap();
        assert!(ctx.stop_reason().is_none());

        Callback::<()>::end_batch(&mut cb, &mut ctx, &loss_output(f32::NAN)).unwrap();
        assert_eq!(ctx.stop_reason(), Some("non-finite train_loss"));
        assert_eq!(cb.nan_count(), 1);
    }

    #[test]
    fn test_history_aligns_series() {
        let config = TrainerConfig::default();
        let state = TrainerState::new(EvalMode::Min);
        let mut cb = HistoryCallback::new();
        let handle = cb.handle();

        let mut ctx = CallbackContext::new(&(), &config, &state, 0, 0.1);
        Callback::<()>::end_epoch(&mut cb, &mut ctx, &loss_output(2.0)).unwrap();

        let mut later = loss_output(1.0);
        later.insert_scalar("mean_dev_loss", 0.5);
        let mut ctx = CallbackContext::new(&(), &config, &state, 1, 0.05);
        Callback::<()>::end_epoch(&mut cb, &mut ctx, &later).unwrap();

        let history = handle.lock().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.series("train_loss").unwrap(), &[2.0, 1.0]);
        let dev = history.series("mean_dev_loss").unwrap();
        assert!(dev[0].is_nan());
        assert_eq!(dev[1], 0.5);
        assert_eq!(history.learning_rates(), &[0.1, 0.05]);

        // Gaps recorded as NaN survive a JSON round trip.
        let json = serde_json::to_string(&*history).unwrap();
        let restored: MetricHistory = serde_json::from_str(&json).unwrap();
        assert!(restored.series("mean_dev_loss").unwrap()[0].is_nan());
        assert_eq!(restored.series("train_loss").unwrap(), &[2.0, 1.0]);
        assert_eq!(restored.epochs(), &[0, 1]);
    }
}
