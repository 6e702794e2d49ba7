//! # seqtrain_data
//!
//! Turns raw `(time, features)` signals into leakage-free training data.
//!
//! This crate provides:
//! - [`NormalizationStore`] with per-signal min/max bounds
//! - [`window`] / [`unwindow`] for fixed-horizon windowing
//! - [`split_windows`] for the chronological train/dev/test partition
//! - [`SequenceDataset`] assembling the six n-step and open-loop bundles
//! - [`BundleLoader`] and [`LoaderSet`] for batched iteration
//! - [`NpzSource`] / [`NpySource`] for loading signals from NumPy files
//!
//! ## Example
//!
//! ```rust
//! use ndarray::Array2;
//! use seqtrain_data::{DatasetConfig, LoaderSet, SequenceDataset};
//!
//! let y = Array2::from_shape_fn((200, 2), |(t, j)| (t as f32 * 0.1).sin() + j as f32);
//! let u = Array2::from_shape_fn((200, 1), |(t, _)| (t as f32 * 0.05).cos());
//!
//! let ds = SequenceDataset::builder()
//!     .horizon(8)
//!     .sequence("Y", y)
//!     .sequence("U", u)
//!     .build()
//!     .unwrap();
//!
//! let loaders = LoaderSet::nstep(&ds, &DatasetConfig::default()).unwrap();
//! assert!(loaders.dev.is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod batching;
mod bundle;
mod dataset;
mod error;
mod io;
mod loader;
mod normalize;
mod splits;

pub use batching::{future_view, past_view, unwindow, window, WindowPlan};
pub use bundle::{BundleForm, BundleName, DatasetBundle, SignalKey, View};
pub use dataset::{DatasetConfig, SequenceDataset, SequenceDatasetBuilder, PRIMARY_SIGNAL};
pub use error::{DataError, Result};
pub use io::{read_npy, NpySource, NpzSource, SignalSource, Signals, NPZ_SIGNALS};
pub use loader::{Batch, BundleLoader, BundleLoaderBuilder, DataLoader, LoaderSet};
pub use normalize::{denormalize, fit_normalize, normalize, MinMaxStats, NormalizationStore};
pub use splits::{split_windows, SplitBundles, SplitIndices};
