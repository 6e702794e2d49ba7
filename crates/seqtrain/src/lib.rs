//! # seqtrain
//!
//! Training of sequence predictors on windowed time series.
//!
//! seqtrain turns raw `(time, features)` signals into leakage-free training
//! data and drives a model through epochs with early stopping:
//!
//! - **Data**: min/max normalization, horizon windowing, chronological
//!   train/dev/test splits, n-step and open-loop bundles, batch loaders
//! - **Training**: epoch loop with model selection, patience, warmup,
//!   gradient clipping, plateau LR scheduling and cancellation
//! - **Hooks**: ordered lifecycle callbacks, metric loggers and visualizers
//!
//! ## Quick Start
//!
//! ```rust
//! use ndarray::Array2;
//! use seqtrain::prelude::*;
//!
//! let y = Array2::from_shape_fn((120, 1), |(t, _)| (t as f32 * 0.1).sin());
//! let u = Array2::from_shape_fn((120, 1), |(t, _)| (t as f32 * 0.1).cos());
//! let ds = SequenceDataset::builder()
//!     .horizon(4)
//!     .sequence("Y", y)
//!     .sequence("U", u)
//!     .build()?;
//!
//! let loaders = LoaderSet::nstep(&ds, &DatasetConfig::default())?;
//! let model = LinearPredictor::for_dataset(&ds, Seed::new(42))?;
//! let mut trainer = Trainer::builder(model, Sgd::with_lr(0.1), loaders)
//!     .config(TrainerConfig::default().with_epochs(30))
//!     .build()?;
//!
//! let report = trainer.train()?;
//! let test = trainer.test()?;
//! assert!(report.best_epoch.is_some());
//! assert!(test.metrics["mean_test_loss"].is_finite());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

// Re-export all crates
pub use seqtrain_core as core;
pub use seqtrain_data as data;
pub use seqtrain_train as train;

/// Prelude module for convenient imports.
///
/// ```rust
/// use seqtrain::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use seqtrain_core::{Seed, Split};

    // Data
    pub use seqtrain_data::{
        read_npy, BundleName, DataLoader, DatasetConfig, LoaderSet, NpySource, NpzSource,
        SequenceDataset, SignalKey, SignalSource,
    };

    // Training
    pub use seqtrain_train::{
        Callback, CallbackContext, CancellationToken, EvalMode, LinearPredictor, MetricsLogger,
        ModelSnapshot, Optimizer, Output, ProgressCallback, Sgd, StopReason, Trainable, Trainer,
        TrainerConfig, TrainerState,
    };
}

/// All module for importing everything.
pub mod all {
    pub use super::prelude::*;

    // Additional exports
    pub use seqtrain_data::{
        denormalize, fit_normalize, normalize, split_windows, unwindow, window, Batch,
        BundleLoader, DatasetBundle, MinMaxStats, NormalizationStore, View,
    };
    pub use seqtrain_train::{
        clip_grad_norm, Artifact, Artifacts, BasicLogger, CurveVisualizer, HistoryCallback, Hook,
        LrScheduler, Mode, OutputValue, Parameter, PlateauConfig, ReduceLROnPlateau, SgdConfig,
        TerminateOnNanCallback, TestReport, TrainReport, Visualizer, BEST_MODEL_ARTIFACT,
    };
}
