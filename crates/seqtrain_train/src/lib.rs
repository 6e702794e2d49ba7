//! # seqtrain_train
//!
//! Epoch-driven training for sequence models.
//!
//! This crate provides:
//! - [`Trainer`] running epochs with model selection on a dev metric,
//!   patience-based early stopping and best-snapshot restoration
//! - The [`Trainable`] and [`Optimizer`] capabilities the loop drives
//! - A callback system with nine ordered lifecycle hooks
//! - [`ReduceLROnPlateau`], gradient norm clipping and cooperative cancellation
//! - [`MetricsLogger`] and [`Visualizer`] sinks for metrics and artifacts
//! - [`LinearPredictor`] and [`Sgd`], a baseline that exercises the loop end to end
//!
//! ## Example
//!
//! ```rust
//! use ndarray::Array2;
//! use seqtrain_core::Seed;
//! use seqtrain_data::{DatasetConfig, LoaderSet, SequenceDataset};
//! use seqtrain_train::{LinearPredictor, ProgressCallback, Sgd, Trainer, TrainerConfig};
//!
//! let y = Array2::from_shape_fn((90, 1), |(t, _)| (t as f32 * 0.2).sin());
//! let ds = SequenceDataset::builder().horizon(3).sequence("Y", y).build().unwrap();
//! let loaders = LoaderSet::nstep(&ds, &DatasetConfig::default()).unwrap();
//!
//! let model = LinearPredictor::for_dataset(&ds, Seed::new(1)).unwrap();
//! let mut trainer = Trainer::builder(model, Sgd::with_lr(0.1), loaders)
//!     .config(TrainerConfig::default().with_epochs(10).with_patience(3))
//!     .callback(ProgressCallback::new(5))
//!     .build()
//!     .unwrap();
//!
//! let report = trainer.train().unwrap();
//! println!("stopped: {} after {} epochs", report.stop_reason, report.epochs_run);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod baseline;
pub mod callback;
pub mod cancel;
pub mod clip;
pub mod config;
pub mod error;
pub mod logger;
pub mod optimizer;
pub mod scheduler;
mod serde_float;
pub mod snapshot;
pub mod state;
pub mod trainable;
pub mod trainer;
pub mod visualizer;

pub use baseline::LinearPredictor;
pub use callback::{
    Callback, CallbackContext, CallbackList, HistoryCallback, Hook, MetricHistory,
    ProgressCallback, TerminateOnNanCallback,
};
pub use cancel::CancellationToken;
pub use clip::clip_grad_norm;
pub use config::{EvalMode, TrainerConfig};
pub use error::{Result, TrainError};
pub use logger::{Artifact, Artifacts, BasicLogger, MetricsLogger, BEST_MODEL_ARTIFACT};
pub use optimizer::{Optimizer, Sgd, SgdConfig};
pub use scheduler::{LrScheduler, PlateauConfig, ReduceLROnPlateau};
pub use snapshot::ModelSnapshot;
pub use state::{EpochRecord, StopReason, TestReport, TrainReport, TrainerPhase, TrainerState};
pub use trainable::{Mode, Output, OutputValue, Parameter, Trainable};
pub use trainer::{Trainer, TrainerBuilder};
pub use visualizer::{CurveVisualizer, NoOpVisualizer, Visualizer};
