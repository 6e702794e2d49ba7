//! The epoch loop: optimization, model selection, early stopping and testing.

use std::collections::BTreeMap;

use seqtrain_core::Split;
use seqtrain_data::{DataLoader, LoaderSet};

use crate::callback::{Callback, CallbackContext, CallbackList, Hook};
use crate::cancel::CancellationToken;
use crate::clip::clip_grad_norm;
use crate::config::TrainerConfig;
use crate::error::{Result, TrainError};
use crate::logger::{Artifact, Artifacts, MetricsLogger, BEST_MODEL_ARTIFACT};
use crate::optimizer::Optimizer;
use crate::scheduler::{LrScheduler, ReduceLROnPlateau};
use crate::snapshot::ModelSnapshot;
use crate::state::{EpochRecord, StopReason, TestReport, TrainReport, TrainerPhase, TrainerState};
use crate::trainable::{Mode, Output, Trainable};
use crate::visualizer::Visualizer;

/// Drives a [`Trainable`] through epochs of training and evaluation.
///
/// Each epoch trains on every batch of the train loader, evaluates the dev
/// loader, keeps a snapshot of the best parameters according to
/// `eval_metric`, and stops once `bad_count` exceeds `patience`. However the
/// loop ends, the best snapshot is restored into the model before `train`
/// returns.
///
/// # Example
///
/// ```rust
/// use ndarray::Array2;
/// use seqtrain_core::Seed;
/// use seqtrain_data::{DatasetConfig, LoaderSet, SequenceDataset};
/// use seqtrain_train::{LinearPredictor, Sgd, Trainer, TrainerConfig};
///
/// let y = Array2::from_shape_fn((60, 1), |(t, _)| (t as f32 * 0.3).sin());
/// let ds = SequenceDataset::builder().horizon(4).sequence("Y", y).build().unwrap();
/// let loaders = LoaderSet::nstep(&ds, &DatasetConfig::default()).unwrap();
///
/// let model = LinearPredictor::for_dataset(&ds, Seed::new(0)).unwrap();
/// let mut trainer = Trainer::builder(model, Sgd::with_lr(0.05), loaders)
///     .config(TrainerConfig::default().with_epochs(20))
///     .build()
///     .unwrap();
///
/// let report = trainer.train().unwrap();
/// assert!(report.epochs_run <= 20);
/// let test = trainer.test().unwrap();
/// assert!(test.metrics.contains_key("mean_test_loss"));
/// ```
pub struct Trainer<M: Trainable, O: Optimizer> {
    model: M,
    optimizer: O,
    loaders: LoaderSet,
    config: TrainerConfig,
    callbacks: CallbackList<M>,
    logger: Option<Box<dyn MetricsLogger>>,
    visualizer: Option<Box<dyn Visualizer>>,
    scheduler: Option<ReduceLROnPlateau>,
    cancel: CancellationToken,
    state: TrainerState,
}

impl<M: Trainable, O: Optimizer> Trainer<M, O> {
    /// Start building a trainer.
    pub fn builder(model: M, optimizer: O, loaders: LoaderSet) -> TrainerBuilder<M, O> {
        TrainerBuilder::new(model, optimizer, loaders)
    }

    /// The model.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Consume the trainer and return the model.
    pub fn into_model(self) -> M {
        self.model
    }

    /// The optimizer.
    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    /// The configuration.
    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// The loaders used by [`train`](Self::train) and [`test`](Self::test).
    pub fn loaders(&self) -> &LoaderSet {
        &self.loaders
    }

    /// Controller state, e.g. to save it for a later resume.
    pub fn state(&self) -> &TrainerState {
        &self.state
    }

    /// A handle that stops training at the next batch or epoch boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run epochs `[current_epoch, current_epoch + epochs)`.
    ///
    /// Cancellation, through the token or a callback, is not an error: the
    /// loop exits at the next boundary, the best snapshot is restored and
    /// the report carries [`StopReason::Cancelled`]. The token stays
    /// cancelled until it is reset.
    ///
    /// # Errors
    ///
    /// - [`TrainError::MissingMetric`] if an output lacks a configured metric.
    /// - Any error raised by the model, optimizer, callbacks or logger.
    ///
    /// After an error the phase is [`TrainerPhase::Failed`] and the model
    /// holds the best snapshot again, so the trainer can be tested, saved or
    /// trained further.
    pub fn train(&mut self) -> Result<TrainReport> {
        let result = self.run_train();
        self.recover_on_error(result)
    }

    fn run_train(&mut self) -> Result<TrainReport> {
        let start = self.state.current_epoch;
        let end = start + self.config.epochs;
        let train_mean = TrainerConfig::mean_key(&self.config.train_metric);

        self.state.phase = TrainerPhase::Training;
        if let Some(viz) = self.visualizer.as_mut() {
            viz.set_mode(Mode::Train);
        }

        let mut stop = self.fire(Hook::BeginTrain, start, &Output::new())?;
        let mut reason = StopReason::Completed;
        let mut epochs_run = 0;
        let mut output = Output::new();

        for epoch in start..end {
            if self.interrupted(&stop) {
                reason = StopReason::Cancelled;
                break;
            }
            let Some(mut epoch_output) = self.train_epoch(epoch, &mut stop)? else {
                reason = StopReason::Cancelled;
                break;
            };
            keep_first(&mut stop, self.fire(Hook::BeginEpoch, epoch, &epoch_output)?);

            let mean_train = epoch_output.scalar(&train_mean)?;
            if let Some(scheduler) = self.scheduler.as_mut() {
                if let Some(lr) = scheduler.step(f64::from(mean_train)) {
                    self.optimizer.set_learning_rate(lr);
                    tracing::info!("Epoch {}: reducing learning rate to {:.6e}", epoch, lr);
                }
            }

            if let Some(dev_output) = self.dev_pass(epoch)? {
                epoch_output.merge(dev_output);
            }
            keep_first(&mut stop, self.fire(Hook::BeginEval, epoch, &epoch_output)?);

            self.select(epoch, &epoch_output)?;
            match self.logger.as_mut() {
                Some(logger) => logger.log_metrics(&epoch_output.scalars(), Some(epoch))?,
                None if epoch % self.config.epoch_verbose == 0 => {
                    tracing::info!("epoch: {}  {}: {:.5}", epoch, train_mean, mean_train);
                }
                None => {}
            }
            if let Some(viz) = self.visualizer.as_mut() {
                viz.plot(&epoch_output, &self.loaders, &self.state)?;
            }

            keep_first(&mut stop, self.fire(Hook::EndEval, epoch, &epoch_output)?);
            keep_first(&mut stop, self.fire(Hook::EndEpoch, epoch, &epoch_output)?);
            epochs_run += 1;
            output = epoch_output;

            if self.state.bad_count > self.config.patience {
                tracing::warn!(
                    "Early stopping at epoch {}: no improvement of {} for {} epochs",
                    epoch,
                    self.config.eval_metric,
                    self.state.bad_count
                );
                reason = StopReason::EarlyStopped;
                break;
            }
        }

        self.state.phase = match reason {
            StopReason::EarlyStopped => TrainerPhase::EarlyStopped,
            StopReason::Completed | StopReason::Cancelled => TrainerPhase::Completed,
        };
        if reason == StopReason::Cancelled {
            tracing::warn!(
                "Training cancelled before epoch {}{}; restoring best parameters from epoch {:?}",
                self.state.current_epoch,
                stop.as_deref().map(|r| format!(" ({r})")).unwrap_or_default(),
                self.state.best_epoch
            );
        }

        self.fire(Hook::EndTrain, self.state.current_epoch, &output)?;
        let best = self.restore_best()?;

        if let Some(logger) = self.logger.as_mut() {
            let mut artifacts = Artifacts::new();
            artifacts.insert(BEST_MODEL_ARTIFACT.to_string(), Artifact::Snapshot(best.clone()));
            if let Some(viz) = self.visualizer.as_ref() {
                artifacts.extend(viz.output());
            }
            logger.log_artifacts(&artifacts)?;
        }

        Ok(TrainReport {
            best,
            best_epoch: self.state.best_epoch,
            best_metric: self.state.best_metric,
            stop_reason: reason,
            epochs_run,
            history: self.state.history.clone(),
        })
    }

    /// Evaluate the best parameters on every split of the training loaders.
    ///
    /// # Errors
    ///
    /// Fails if a split's output lacks its configured metric.
    pub fn test(&mut self) -> Result<TestReport> {
        let result = self.run_test(None);
        self.recover_on_error(result)
    }

    /// Evaluate the best parameters on another loader set, e.g.
    /// [`LoaderSet::open_loop`].
    ///
    /// # Errors
    ///
    /// Fails if a split's output lacks its configured metric.
    pub fn test_with(&mut self, loaders: &LoaderSet) -> Result<TestReport> {
        let result = self.run_test(Some(loaders));
        self.recover_on_error(result)
    }

    fn run_test(&mut self, alternate: Option<&LoaderSet>) -> Result<TestReport> {
        self.restore_best()?;
        self.state.phase = TrainerPhase::Testing;
        let epoch = self.state.current_epoch;
        self.fire(Hook::BeginTest, epoch, &Output::new())?;

        self.model.set_mode(Mode::Eval);
        let grad = self.model.grad_inference();
        self.model.set_grad_enabled(grad);
        let loaders = alternate.unwrap_or(&self.loaders);
        let evaluated = evaluate_splits(&mut self.model, loaders, &self.config, epoch);
        self.model.set_grad_enabled(true);
        let (output, metrics) = evaluated?;

        if let Some(viz) = self.visualizer.as_mut() {
            viz.set_mode(Mode::Eval);
            viz.plot(&output, loaders, &self.state)?;
        }
        self.fire(Hook::EndTest, epoch, &output)?;

        if let Some(logger) = self.logger.as_mut() {
            let best: BTreeMap<String, f32> = output
                .scalars()
                .into_iter()
                .map(|(k, v)| (format!("best_{k}"), v))
                .collect();
            logger.log_metrics(&best, None)?;
            if let Some(viz) = self.visualizer.as_ref() {
                let plots = viz.output();
                if !plots.is_empty() {
                    logger.log_artifacts(&plots)?;
                }
            }
        }

        self.state.phase = TrainerPhase::Done;
        Ok(TestReport { metrics, output })
    }

    /// One pass over the training batches. `None` if interrupted.
    fn train_epoch(&mut self, epoch: usize, stop: &mut Option<String>) -> Result<Option<Output>> {
        self.model.set_mode(Mode::Train);
        self.model.set_grad_enabled(true);
        let metric = self.config.train_metric.clone();

        let mut losses = Vec::with_capacity(self.loaders.train.n_batches());
        let mut last = None;
        for batch in self.loaders.train.batches(epoch) {
            let output = self.model.forward(&batch)?;
            let loss = output.scalar(&metric)?;
            self.optimizer.zero_grad(self.model.parameters_mut());
            self.model.backward(&output, &metric)?;
            let norm = clip_grad_norm(self.model.parameters_mut(), self.config.clip);
            if norm > self.config.clip {
                tracing::debug!(epoch, batch = batch.index(), norm, "clipped gradient");
            }
            self.optimizer.step(self.model.parameters_mut())?;
            losses.push(loss);

            let lr = self.optimizer.learning_rate();
            let mut ctx = CallbackContext::new(&self.model, &self.config, &self.state, epoch, lr)
                .with_batch(batch.index());
            self.callbacks.dispatch(Hook::EndBatch, &mut ctx, &output)?;
            keep_first(stop, ctx.stop_reason().map(str::to_owned));
            last = Some(output);

            if stop.is_some() || self.cancel.is_cancelled() {
                return Ok(None);
            }
        }

        let mut output = last.ok_or_else(|| {
            TrainError::Configuration(format!(
                "{} produced no batches in epoch {epoch}",
                self.loaders.train.name()
            ))
        })?;
        let mean = losses.iter().sum::<f32>() / losses.len() as f32;
        output.insert_scalar(TrainerConfig::mean_key(&metric), mean);
        Ok(Some(output))
    }

    fn dev_pass(&mut self, epoch: usize) -> Result<Option<Output>> {
        self.model.set_mode(Mode::Eval);
        let Some(dev) = self.loaders.dev.as_deref() else {
            return Ok(None);
        };
        let grad = self.model.grad_inference();
        self.model.set_grad_enabled(grad);
        let output = evaluate_loader(&mut self.model, dev, epoch, &self.config.dev_metric);
        self.model.set_grad_enabled(true);
        output?.map(Some).ok_or_else(|| {
            TrainError::Configuration(format!("{} produced no batches in epoch {epoch}", dev.name()))
        })
    }

    /// Compare the epoch against the best so far and record it.
    fn select(&mut self, epoch: usize, output: &Output) -> Result<bool> {
        let value = output.scalar(&self.config.eval_metric)?;
        let improved = self.config.eval_mode.is_better(value, self.state.best_metric);
        if improved {
            self.state.best_metric = value;
            self.state.best_epoch = Some(epoch);
            self.state.best_snapshot = Some(self.model.capture_state());
            self.state.bad_count = 0;
        } else if epoch > self.config.warmup {
            self.state.bad_count += 1;
        }
        self.state.history.push(EpochRecord {
            epoch,
            metrics: output.scalars(),
            lr: self.optimizer.learning_rate(),
            improved,
        });
        self.state.current_epoch = epoch + 1;
        Ok(improved)
    }

    fn restore_best(&mut self) -> Result<ModelSnapshot> {
        let best = match &self.state.best_snapshot {
            Some(snapshot) => snapshot.clone(),
            None => {
                let snapshot = self.model.capture_state();
                self.state.best_snapshot = Some(snapshot.clone());
                snapshot
            }
        };
        self.model.restore_state(&best)?;
        Ok(best)
    }

    /// Leave a consistent state behind when a phase fails part way.
    fn recover_on_error<T>(&mut self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                tracing::error!("Failed at epoch {}: {}", self.state.current_epoch, err);
                self.state.phase = TrainerPhase::Failed;
                self.model.set_grad_enabled(true);
                if let Err(restore) = self.restore_best() {
                    tracing::error!("Could not restore best parameters: {}", restore);
                }
                Err(err)
            }
        }
    }

    fn fire(&mut self, hook: Hook, epoch: usize, output: &Output) -> Result<Option<String>> {
        let lr = self.optimizer.learning_rate();
        let mut ctx = CallbackContext::new(&self.model, &self.config, &self.state, epoch, lr);
        self.callbacks.dispatch(hook, &mut ctx, output)?;
        Ok(ctx.stop_reason().map(str::to_owned))
    }

    fn interrupted(&self, stop: &Option<String>) -> bool {
        stop.is_some() || self.cancel.is_cancelled()
    }
}

fn keep_first(stop: &mut Option<String>, request: Option<String>) {
    if stop.is_none() {
        *stop = request;
    }
}

/// Run `metric` over one loader. The last batch output is returned with
/// `mean_{metric}` added, or `None` if the loader produced nothing.
fn evaluate_loader<M: Trainable>(
    model: &mut M,
    loader: &dyn DataLoader,
    epoch: usize,
    metric: &str,
) -> Result<Option<Output>> {
    let mut values = Vec::with_capacity(loader.n_batches());
    let mut last = None;
    for batch in loader.batches(epoch) {
        let output = model.forward(&batch)?;
        values.push(output.scalar(metric)?);
        last = Some(output);
    }
    Ok(last.map(|mut output| {
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        output.insert_scalar(TrainerConfig::mean_key(metric), mean);
        output
    }))
}

fn evaluate_splits<M: Trainable>(
    model: &mut M,
    loaders: &LoaderSet,
    config: &TrainerConfig,
    epoch: usize,
) -> Result<(Output, BTreeMap<String, f32>)> {
    let mut output = Output::new();
    let mut metrics = BTreeMap::new();
    for split in Split::ALL {
        let Some(loader) = loaders.get(split) else {
            continue;
        };
        let metric = config.metric_for(split);
        match evaluate_loader(model, loader, epoch, metric)? {
            Some(split_output) => {
                let key = TrainerConfig::mean_key(metric);
                metrics.insert(key.clone(), split_output.scalar(&key)?);
                output.merge(split_output);
            }
            None => tracing::warn!("{} produced no batches, skipped", loader.name()),
        }
    }
    Ok((output, metrics))
}

/// Builder for [`Trainer`].
pub struct TrainerBuilder<M: Trainable, O: Optimizer> {
    model: M,
    optimizer: O,
    loaders: LoaderSet,
    config: TrainerConfig,
    callbacks: CallbackList<M>,
    logger: Option<Box<dyn MetricsLogger>>,
    visualizer: Option<Box<dyn Visualizer>>,
    cancel: CancellationToken,
    state: Option<TrainerState>,
}

impl<M: Trainable, O: Optimizer> TrainerBuilder<M, O> {
    /// Create a builder with the default configuration.
    pub fn new(model: M, optimizer: O, loaders: LoaderSet) -> Self {
        Self {
            model,
            optimizer,
            loaders,
            config: TrainerConfig::default(),
            callbacks: CallbackList::new(),
            logger: None,
            visualizer: None,
            cancel: CancellationToken::new(),
            state: None,
        }
    }

    /// Set the configuration.
    #[must_use]
    pub fn config(mut self, config: TrainerConfig) -> Self {
        self.config = config;
        self
    }

    /// Append a callback. Callbacks run in insertion order.
    #[must_use]
    pub fn callback(mut self, callback: impl Callback<M> + 'static) -> Self {
        self.callbacks.add(callback);
        self
    }

    /// Set the metrics logger.
    #[must_use]
    pub fn logger(mut self, logger: impl MetricsLogger + 'static) -> Self {
        self.logger = Some(Box::new(logger));
        self
    }

    /// Set the visualizer.
    #[must_use]
    pub fn visualizer(mut self, visualizer: impl Visualizer + 'static) -> Self {
        self.visualizer = Some(Box::new(visualizer));
        self
    }

    /// Share a cancellation token with the caller.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Resume from a saved state.
    ///
    /// If the state holds a best snapshot, [`build`](Self::build) loads it
    /// into the model, so training continues from the best parameters.
    #[must_use]
    pub fn state(mut self, state: TrainerState) -> Self {
        self.state = Some(state);
        self
    }

    /// Validate the setup and build the trainer.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::Configuration`] if the configuration is invalid,
    /// the train loader is empty, a dev loader is empty, or `eval_metric`
    /// needs a dev loader that is missing. Returns [`TrainError::Snapshot`]
    /// if a resumed state's snapshot does not fit the model.
    pub fn build(mut self) -> Result<Trainer<M, O>> {
        self.config.validate()?;
        if self.loaders.train.n_batches() == 0 {
            return Err(TrainError::Configuration(format!(
                "train loader {} has no batches",
                self.loaders.train.name()
            )));
        }
        match self.loaders.dev.as_deref() {
            Some(dev) if dev.n_batches() == 0 => {
                return Err(TrainError::Configuration(format!(
                    "dev loader {} has no batches",
                    dev.name()
                )));
            }
            None if self.config.eval_uses_dev() => {
                return Err(TrainError::Configuration(format!(
                    "eval_metric '{}' is computed on the dev split but no dev loader was given; \
                     use a training metric such as '{}' instead",
                    self.config.eval_metric,
                    TrainerConfig::mean_key(&self.config.train_metric)
                )));
            }
            _ => {}
        }

        let mut state = match self.state {
            Some(state) => {
                if let Some(best) = &state.best_snapshot {
                    self.model.restore_state(best)?;
                    tracing::info!(
                        "Resuming at epoch {} from best parameters of epoch {:?}",
                        state.current_epoch,
                        state.best_epoch
                    );
                }
                state
            }
            None => TrainerState::new(self.config.eval_mode),
        };
        if state.best_snapshot.is_none() {
            state.best_snapshot = Some(self.model.capture_state());
        }

        let scheduler = self.config.lr_scheduler.then(|| {
            ReduceLROnPlateau::new(self.optimizer.learning_rate(), self.config.plateau.clone())
        });

        if let Some(logger) = self.logger.as_mut() {
            logger.log_weights(self.model.parameters())?;
        }
        tracing::debug!(
            loaders = ?self.loaders,
            callbacks = ?self.callbacks.names(),
            start_epoch = state.current_epoch,
            "built trainer"
        );

        Ok(Trainer {
            model: self.model,
            optimizer: self.optimizer,
            loaders: self.loaders,
            config: self.config,
            callbacks: self.callbacks,
            logger: self.logger,
            visualizer: self.visualizer,
            scheduler,
            cancel: self.cancel,
            state,
        })
    }
}
