//! Batch iteration over dataset bundles.

use std::collections::BTreeMap;

use ndarray::Array3;
use rand::seq::SliceRandom;
use seqtrain_core::{Seed, Split};

use crate::bundle::{BundleName, DatasetBundle, SignalKey};
use crate::dataset::{DatasetConfig, SequenceDataset};
use crate::error::{DataError, Result};

/// One batch: a slice of a bundle along its sample axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    name: BundleName,
    epoch: usize,
    index: usize,
    tensors: BTreeMap<SignalKey, Array3<f32>>,
}

impl Batch {
    /// Create a batch.
    #[must_use]
    pub fn new(
        name: BundleName,
        epoch: usize,
        index: usize,
        tensors: BTreeMap<SignalKey, Array3<f32>>,
    ) -> Self {
        Self {
            name,
            epoch,
            index,
            tensors,
        }
    }

    /// Name of the bundle the batch was cut from.
    #[must_use]
    pub const fn name(&self) -> BundleName {
        self.name
    }

    /// Split the batch belongs to.
    #[must_use]
    pub const fn split(&self) -> Split {
        self.name.split
    }

    /// Epoch the batch was produced for.
    #[must_use]
    pub const fn epoch(&self) -> usize {
        self.epoch
    }

    /// Position of the batch within its epoch.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Tensor for a key.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::MissingKey`] if the batch lacks the key.
    pub fn get(&self, key: &SignalKey) -> Result<&Array3<f32>> {
        self.tensors
            .get(key)
            .ok_or_else(|| DataError::MissingKey(format!("{key} in batch of {}", self.name)))
    }

    /// Iterate over keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &SignalKey> {
        self.tensors.keys()
    }

    /// Iterate over `(key, tensor)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&SignalKey, &Array3<f32>)> {
        self.tensors.iter()
    }

    /// Number of samples (axis 1).
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.tensors.values().next().map_or(0, |t| t.shape()[1])
    }
}

/// A finite, restartable producer of batches.
///
/// Calling [`batches`](DataLoader::batches) again starts a fresh pass; the
/// key set of every batch is fixed for the lifetime of the loader.
pub trait DataLoader {
    /// Bundle the loader iterates over.
    fn name(&self) -> BundleName;

    /// Number of batches per pass.
    fn n_batches(&self) -> usize;

    /// One pass over the data for `epoch`.
    fn batches(&self, epoch: usize) -> Box<dyn Iterator<Item = Batch> + '_>;
}

/// Cuts a [`DatasetBundle`] into batches along its sample axis.
///
/// # Example
///
/// ```rust
/// use ndarray::Array2;
/// use seqtrain_core::{Seed, Split};
/// use seqtrain_data::{BundleLoader, DataLoader, SequenceDataset};
///
/// let y = Array2::from_shape_fn((100, 1), |(t, _)| t as f32);
/// let ds = SequenceDataset::builder().horizon(4).sequence("Y", y).build().unwrap();
///
/// let loader = BundleLoader::builder(ds.nstep(Split::Train).clone())
///     .batch_size(3)
///     .shuffle(true)
///     .seed(Seed::new(42))
///     .build()
///     .unwrap();
///
/// assert_eq!(loader.n_batches(), 3); // 8 windows
/// assert_eq!(loader.batches(0).map(|b| b.n_samples()).sum::<usize>(), 8);
/// ```
#[derive(Debug, Clone)]
pub struct BundleLoader {
    bundle: DatasetBundle,
    batch_size: Option<usize>,
    shuffle: bool,
    drop_last: bool,
    seed: Seed,
}

impl BundleLoader {
    /// Create a new loader builder.
    #[must_use]
    pub fn builder(bundle: DatasetBundle) -> BundleLoaderBuilder {
        BundleLoaderBuilder::new(bundle)
    }

    /// The bundle being iterated.
    #[must_use]
    pub fn bundle(&self) -> &DatasetBundle {
        &self.bundle
    }

    /// Samples per batch, `None` for one batch holding everything.
    #[must_use]
    pub fn batch_size(&self) -> Option<usize> {
        self.batch_size
    }

    /// Sample order for an epoch.
    fn order(&self, epoch: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.bundle.n_samples()).collect();
        if self.shuffle {
            let mut rng = self.seed.for_epoch(epoch).to_rng();
            indices.shuffle(&mut rng);
        }
        indices
    }

    fn effective_batch_size(&self) -> usize {
        self.batch_size
            .unwrap_or_else(|| self.bundle.n_samples())
            .max(1)
    }
}

impl DataLoader for BundleLoader {
    fn name(&self) -> BundleName {
        self.bundle.name()
    }

    fn n_batches(&self) -> usize {
        let n = self.bundle.n_samples();
        let size = self.effective_batch_size();
        if self.drop_last {
            n / size
        } else {
            n.div_ceil(size)
        }
    }

    fn batches(&self, epoch: usize) -> Box<dyn Iterator<Item = Batch> + '_> {
        let order = self.order(epoch);
        let size = self.effective_batch_size();
        let n_batches = self.n_batches();
        Box::new((0..n_batches).map(move |i| {
            let start = i * size;
            let end = (start + size).min(order.len());
            let tensors = self.bundle.select_samples(&order[start..end]).into_tensors();
            Batch::new(self.bundle.name(), epoch, i, tensors)
        }))
    }
}

/// Builder for [`BundleLoader`].
#[derive(Debug)]
pub struct BundleLoaderBuilder {
    bundle: DatasetBundle,
    batch_size: Option<usize>,
    shuffle: bool,
    drop_last: bool,
    seed: Seed,
}

impl BundleLoaderBuilder {
    /// Create a builder that yields the whole bundle as one batch.
    #[must_use]
    pub fn new(bundle: DatasetBundle) -> Self {
        Self {
            bundle,
            batch_size: None,
            shuffle: false,
            drop_last: false,
            seed: Seed::default(),
        }
    }

    /// Set the number of samples per batch.
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Yield the whole bundle as one batch.
    #[must_use]
    pub fn full_batch(mut self) -> Self {
        self.batch_size = None;
        self
    }

    /// Enable or disable per-epoch shuffling.
    #[must_use]
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Enable or disable dropping the last incomplete batch.
    #[must_use]
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    /// Set the master seed for shuffling.
    #[must_use]
    pub fn seed(mut self, seed: Seed) -> Self {
        self.seed = seed;
        self
    }

    /// Build the loader.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch size is zero.
    pub fn build(self) -> Result<BundleLoader> {
        if self.batch_size == Some(0) {
            return Err(DataError::InvalidBatchSize(
                "Batch size must be greater than 0".to_string(),
            ));
        }
        Ok(BundleLoader {
            bundle: self.bundle,
            batch_size: self.batch_size,
            shuffle: self.shuffle,
            drop_last: self.drop_last,
            seed: self.seed,
        })
    }
}

/// Loaders for the three splits. Dev and test are optional.
pub struct LoaderSet {
    /// Training batches.
    pub train: Box<dyn DataLoader>,
    /// Development batches, used for model selection.
    pub dev: Option<Box<dyn DataLoader>>,
    /// Test batches.
    pub test: Option<Box<dyn DataLoader>>,
}

impl LoaderSet {
    /// Create a set with only a training loader.
    pub fn new(train: impl DataLoader + 'static) -> Self {
        Self {
            train: Box::new(train),
            dev: None,
            test: None,
        }
    }

    /// Add a development loader.
    #[must_use]
    pub fn with_dev(mut self, dev: impl DataLoader + 'static) -> Self {
        self.dev = Some(Box::new(dev));
        self
    }

    /// Add a test loader.
    #[must_use]
    pub fn with_test(mut self, test: impl DataLoader + 'static) -> Self {
        self.test = Some(Box::new(test));
        self
    }

    /// Loaders over the n-step bundles of a dataset.
    ///
    /// Training batches follow `config.batch_size`, `shuffle` and `seed`; dev
    /// and test are never shuffled. Dev or test bundles without windows are
    /// left out.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch size is zero.
    pub fn nstep(dataset: &SequenceDataset, config: &DatasetConfig) -> Result<Self> {
        let loader = |split: Split, shuffle: bool| {
            let mut builder = BundleLoader::builder(dataset.nstep(split).clone())
                .shuffle(shuffle)
                .seed(Seed::new(config.seed));
            if let Some(size) = config.batch_size {
                builder = builder.batch_size(size);
            }
            builder.build()
        };
        let mut set = Self::new(loader(Split::Train, config.shuffle)?);
        for split in [Split::Dev, Split::Test] {
            if dataset.nstep(split).n_samples() == 0 {
                tracing::warn!(%split, dataset = %dataset.name(), "split has no windows, loader omitted");
                continue;
            }
            let l = loader(split, false)?;
            set = match split {
                Split::Dev => set.with_dev(l),
                _ => set.with_test(l),
            };
        }
        Ok(set)
    }

    /// One full-trajectory batch per split from the open-loop bundles.
    ///
    /// # Errors
    ///
    /// Propagates loader construction errors.
    pub fn open_loop(dataset: &SequenceDataset) -> Result<Self> {
        let loader = |split: Split| BundleLoader::builder(dataset.loop_data(split).clone()).build();
        Ok(Self::new(loader(Split::Train)?)
            .with_dev(loader(Split::Dev)?)
            .with_test(loader(Split::Test)?))
    }

    /// Loader for a split, if present.
    #[must_use]
    pub fn get(&self, split: Split) -> Option<&dyn DataLoader> {
        match split {
            Split::Train => Some(self.train.as_ref()),
            Split::Dev => self.dev.as_deref(),
            Split::Test => self.test.as_deref(),
        }
    }
}

impl std::fmt::Debug for LoaderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let describe = |l: Option<&dyn DataLoader>| l.map(|l| (l.name().to_string(), l.n_batches()));
        f.debug_struct("LoaderSet")
            .field("train", &describe(Some(self.train.as_ref())))
            .field("dev", &describe(self.dev.as_deref()))
            .field("test", &describe(self.test.as_deref()))
            .finish()
    }
}
