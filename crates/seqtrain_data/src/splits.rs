//! Chronological train/dev/test partitioning of windowed tensors.
//!
//! Splits cut the window axis only. The horizon axis is never touched, so no
//! window straddles two partitions and no future rows leak into training.

use std::collections::BTreeMap;
use std::ops::Range;

use ndarray::{s, Array3, Axis};
use seqtrain_core::Split;

use crate::bundle::{BundleName, DatasetBundle, SignalKey};
use crate::error::{DataError, Result};

/// Window ranges of the three partitions.
///
/// With `train_index = n_windows / 3` and `dev_index = 2 * train_index`:
/// train is `[0, train_index)`, dev is `[train_index, dev_index)` and test is
/// `[dev_index, n_windows)`. Test absorbs the remainder, so it can be larger
/// than train and dev.
///
/// # Example
///
/// ```rust
/// use seqtrain_data::SplitIndices;
///
/// let idx = SplitIndices::new(10);
/// assert_eq!(idx.train, 0..3);
/// assert_eq!(idx.dev, 3..6);
/// assert_eq!(idx.test, 6..10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    /// Training windows.
    pub train: Range<usize>,
    /// Development windows.
    pub dev: Range<usize>,
    /// Test windows.
    pub test: Range<usize>,
}

impl SplitIndices {
    /// Partition `n_windows` windows.
    #[must_use]
    pub fn new(n_windows: usize) -> Self {
        let train_index = n_windows / 3;
        let dev_index = train_index * 2;
        Self {
            train: 0..train_index,
            dev: train_index..dev_index,
            test: dev_index..n_windows,
        }
    }

    /// Range for one split.
    #[must_use]
    pub fn range(&self, split: Split) -> Range<usize> {
        match split {
            Split::Train => self.train.clone(),
            Split::Dev => self.dev.clone(),
            Split::Test => self.test.clone(),
        }
    }
}

/// The three n-step bundles produced by [`split_windows`].
#[derive(Debug, Clone)]
pub struct SplitBundles {
    /// `nstep_train`.
    pub train: DatasetBundle,
    /// `nstep_dev`.
    pub dev: DatasetBundle,
    /// `nstep_test`.
    pub test: DatasetBundle,
}

impl SplitBundles {
    /// Bundle for one split.
    #[must_use]
    pub fn get(&self, split: Split) -> &DatasetBundle {
        match split {
            Split::Train => &self.train,
            Split::Dev => &self.dev,
            Split::Test => &self.test,
        }
    }
}

/// Partition windowed tensors `(horizon, n_windows, features)` into train/dev/test.
///
/// # Errors
///
/// Returns an error if `tensors` is empty or the tensors disagree on `n_windows`.
pub fn split_windows(tensors: &BTreeMap<SignalKey, Array3<f32>>) -> Result<SplitBundles> {
    let n_windows = common_window_count(tensors)?;
    let indices = SplitIndices::new(n_windows);
    tracing::debug!(
        n_windows,
        train = indices.train.len(),
        dev = indices.dev.len(),
        test = indices.test.len(),
        "splitting windows"
    );

    let take = |split: Split| -> Result<DatasetBundle> {
        let range = indices.range(split);
        let part = tensors
            .iter()
            .map(|(k, t)| (k.clone(), t.slice(s![.., range.clone(), ..]).to_owned()))
            .collect();
        DatasetBundle::new(BundleName::nstep(split), part)
    };

    Ok(SplitBundles {
        train: take(Split::Train)?,
        dev: take(Split::Dev)?,
        test: take(Split::Test)?,
    })
}

fn common_window_count(tensors: &BTreeMap<SignalKey, Array3<f32>>) -> Result<usize> {
    let mut counts = tensors.iter().map(|(k, t)| (k, t.len_of(Axis(1))));
    let (first_key, n) = counts
        .next()
        .ok_or_else(|| DataError::InvalidShape("no tensors to split".to_string()))?;
    for (key, m) in counts {
        if m != n {
            return Err(DataError::InvalidShape(format!(
                "'{key}' has {m} windows but '{first_key}' has {n}"
            )));
        }
    }
    Ok(n)
}
