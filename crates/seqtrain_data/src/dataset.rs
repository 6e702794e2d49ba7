//! Sequence dataset construction.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use ndarray::{concatenate, s, Array, Array2, Array3, ArrayView, Axis, Dimension};
use serde::{Deserialize, Serialize};
use seqtrain_core::Split;

use crate::batching::{future_view, past_view, unwindow, window};
use crate::bundle::{BundleForm, BundleName, DatasetBundle, SignalKey};
use crate::error::{DataError, Result};
use crate::io::{SignalSource, Signals};
use crate::normalize::{fit_normalize, NormalizationStore};
use crate::splits::{split_windows, SplitBundles};

/// Signal used as the length reference when present.
pub const PRIMARY_SIGNAL: &str = "Y";

/// Serializable dataset settings.
///
/// # Example
///
/// ```rust
/// use seqtrain_data::DatasetConfig;
///
/// let config: DatasetConfig = serde_json::from_str(r#"{"horizon": 8}"#).unwrap();
/// assert_eq!(config.horizon, 8);
/// assert!(config.normalize.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Window length.
    pub horizon: usize,
    /// Keep only the first `nsim` rows of source signals.
    pub nsim: Option<usize>,
    /// Signals to normalize. `None` normalizes all of them.
    pub normalize: Option<Vec<String>>,
    /// Windows per n-step batch. `None` uses one batch per split.
    pub batch_size: Option<usize>,
    /// Shuffle training windows each epoch.
    pub shuffle: bool,
    /// Seed for shuffling.
    pub seed: u64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            horizon: 32,
            nsim: None,
            normalize: None,
            batch_size: None,
            shuffle: false,
            seed: 0,
        }
    }
}

impl DatasetConfig {
    /// Read a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// A normalized, windowed and split sequence dataset.
///
/// Holds six bundles: `nstep_{train,dev,test}` with horizon-major windows
/// and `loop_{train,dev,test}` with the same windows flattened back into one
/// trajectory per split. Every bundle carries the same key set: a past
/// (`p`) and future (`f`) view of each signal.
///
/// # Example
///
/// ```rust
/// use ndarray::Array2;
/// use seqtrain_core::Split;
/// use seqtrain_data::{SequenceDataset, SignalKey};
///
/// let y = Array2::from_shape_fn((20, 1), |(t, _)| t as f32);
/// let ds = SequenceDataset::builder()
///     .horizon(4)
///     .sequence("Y", y)
///     .build()
///     .unwrap();
///
/// assert_eq!(ds.nstep(Split::Train).n_samples(), 1);
/// assert_eq!(ds.nstep(Split::Test).n_samples(), 2);
/// assert_eq!(ds.loop_data(Split::Test).get(&SignalKey::past("Y")).unwrap().dim(), (8, 1, 1));
/// ```
#[derive(Debug, Clone)]
pub struct SequenceDataset {
    name: String,
    horizon: usize,
    primary: String,
    signals: Signals,
    store: NormalizationStore,
    nstep: SplitBundles,
    open_loop: SplitBundles,
}

impl SequenceDataset {
    /// Start building a dataset.
    #[must_use]
    pub fn builder() -> SequenceDatasetBuilder {
        SequenceDatasetBuilder::new()
    }

    /// Name of the source, or `"sequences"` when built from raw arrays only.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Window length.
    #[must_use]
    pub const fn horizon(&self) -> usize {
        self.horizon
    }

    /// Signal whose length every other signal must match.
    #[must_use]
    pub fn primary_key(&self) -> &str {
        &self.primary
    }

    /// Full-length signals after normalization.
    #[must_use]
    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    /// Normalization bounds of every normalized signal.
    #[must_use]
    pub fn store(&self) -> &NormalizationStore {
        &self.store
    }

    /// Feature count of every signal and of its `p`/`f` views.
    #[must_use]
    pub fn dims(&self) -> BTreeMap<String, usize> {
        let mut dims = BTreeMap::new();
        for (name, signal) in &self.signals {
            let n = signal.ncols();
            dims.insert(name.clone(), n);
            dims.insert(SignalKey::past(name.as_str()).to_string(), n);
            dims.insert(SignalKey::future(name.as_str()).to_string(), n);
        }
        dims
    }

    /// Bundle by name.
    #[must_use]
    pub fn bundle(&self, name: BundleName) -> &DatasetBundle {
        match name.form {
            BundleForm::NStep => self.nstep.get(name.split),
            BundleForm::Loop => self.open_loop.get(name.split),
        }
    }

    /// Windowed bundle of a split.
    #[must_use]
    pub fn nstep(&self, split: Split) -> &DatasetBundle {
        self.nstep.get(split)
    }

    /// Open-loop bundle of a split.
    #[must_use]
    pub fn loop_data(&self, split: Split) -> &DatasetBundle {
        self.open_loop.get(split)
    }

    /// All six bundles, n-step first, each in train/dev/test order.
    pub fn bundles(&self) -> impl Iterator<Item = &DatasetBundle> {
        Split::ALL
            .into_iter()
            .map(|s| self.nstep.get(s))
            .chain(Split::ALL.into_iter().map(|s| self.open_loop.get(s)))
    }

    /// Map an array of signal `key` back to its original scale.
    ///
    /// `key` is a signal name (`Y`) or view key (`Yf`). Signals that were not
    /// normalized are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::MissingKey`] for an unknown signal and a shape
    /// error if the last axis does not match its feature count.
    pub fn denormalize<D: Dimension>(
        &self,
        key: &str,
        x: ArrayView<'_, f32, D>,
    ) -> Result<Array<f32, D>> {
        let name = self.resolve(key)?;
        if self.store.get(name).is_some() {
            self.store.denormalize(name, x)
        } else {
            Ok(x.to_owned())
        }
    }

    /// Train, dev and test loop data of one key joined into a single trajectory.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::MissingKey`] if the key is not in the dataset.
    pub fn open_loop_trajectory(&self, key: &SignalKey) -> Result<Array3<f32>> {
        let parts = Split::ALL
            .into_iter()
            .map(|s| self.open_loop.get(s).get(key).map(|t| t.view()))
            .collect::<Result<Vec<_>>>()?;
        concatenate(Axis(0), &parts).map_err(|e| DataError::InvalidShape(e.to_string()))
    }

    fn resolve<'a>(&self, key: &'a str) -> Result<&'a str> {
        if self.signals.contains_key(key) {
            return Ok(key);
        }
        match key.parse::<SignalKey>() {
            Ok(parsed) if self.signals.contains_key(parsed.name()) => {
                Ok(&key[..parsed.name().len()])
            }
            _ => Err(DataError::MissingKey(key.to_string())),
        }
    }
}

/// Builder for [`SequenceDataset`].
pub struct SequenceDatasetBuilder {
    horizon: usize,
    source: Option<Box<dyn SignalSource>>,
    sequences: Signals,
    nsim: Option<usize>,
    normalize: Option<BTreeSet<String>>,
}

impl Default for SequenceDatasetBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceDatasetBuilder {
    /// Create a builder with the default horizon.
    #[must_use]
    pub fn new() -> Self {
        Self {
            horizon: DatasetConfig::default().horizon,
            source: None,
            sequences: Signals::new(),
            nsim: None,
            normalize: None,
        }
    }

    /// Apply horizon, `nsim` and normalization settings from a config.
    #[must_use]
    pub fn config(mut self, config: &DatasetConfig) -> Self {
        self.horizon = config.horizon;
        self.nsim = config.nsim;
        self.normalize = config
            .normalize
            .as_ref()
            .map(|keys| keys.iter().cloned().collect());
        self
    }

    /// Set the window length.
    #[must_use]
    pub fn horizon(mut self, horizon: usize) -> Self {
        self.horizon = horizon;
        self
    }

    /// Load signals from a named system.
    #[must_use]
    pub fn source(mut self, source: impl SignalSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Add a raw `(time, features)` sequence. Replaces a source signal of the same key.
    #[must_use]
    pub fn sequence(mut self, key: impl Into<String>, sequence: Array2<f32>) -> Self {
        self.sequences.insert(key.into(), sequence);
        self
    }

    /// Keep only the first `nsim` rows of source signals.
    #[must_use]
    pub fn nsim(mut self, nsim: usize) -> Self {
        self.nsim = Some(nsim);
        self
    }

    /// Normalize only these signals. By default every signal is normalized.
    #[must_use]
    pub fn normalize<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.normalize = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Load, validate, normalize, window and split.
    ///
    /// # Errors
    ///
    /// - [`DataError::Configuration`] when neither a source nor a sequence was given.
    /// - [`DataError::InvalidHorizon`] for a zero horizon.
    /// - [`DataError::LengthMismatch`] when a signal's length differs from the primary's.
    /// - [`DataError::InsufficientLength`] when the views are too short for one window.
    /// - [`DataError::MissingKey`] when a signal selected for normalization does not exist.
    pub fn build(self) -> Result<SequenceDataset> {
        if self.source.is_none() && self.sequences.is_empty() {
            return Err(DataError::Configuration(
                "no data: supply a named system with `.source(...)` or raw arrays with `.sequence(...)`"
                    .to_string(),
            ));
        }
        let horizon = self.horizon;
        if horizon == 0 {
            return Err(DataError::InvalidHorizon(horizon));
        }

        let (name, mut raw) = match &self.source {
            Some(source) => {
                let mut signals = source.load()?;
                if let Some(nsim) = self.nsim {
                    for signal in signals.values_mut() {
                        let rows = nsim.min(signal.nrows());
                        *signal = signal.slice(s![..rows, ..]).to_owned();
                    }
                }
                (source.name().to_string(), signals)
            }
            None => ("sequences".to_string(), Signals::new()),
        };
        for (key, sequence) in self.sequences {
            if raw.insert(key.clone(), sequence).is_some() {
                tracing::debug!(%key, "supplied sequence replaces source signal");
            }
        }

        let primary = primary_key(&raw)?;
        let len = raw[&primary].nrows();
        for (key, signal) in &raw {
            if signal.nrows() != len {
                return Err(DataError::LengthMismatch {
                    key: key.clone(),
                    primary,
                    expected: len,
                    got: signal.nrows(),
                });
            }
        }
        let usable = len.saturating_sub(horizon);
        if usable < horizon {
            return Err(DataError::InsufficientLength {
                key: primary,
                len: usable,
                horizon,
            });
        }

        if let Some(keys) = &self.normalize {
            if let Some(missing) = keys.iter().find(|k| !raw.contains_key(*k)) {
                return Err(DataError::MissingKey(missing.clone()));
            }
        }

        let mut store = NormalizationStore::new();
        let mut signals = Signals::new();
        for (key, signal) in raw {
            let selected = self.normalize.as_ref().map_or(true, |keys| keys.contains(&key));
            let signal = if selected {
                let (normalized, stats) = fit_normalize(signal.view(), None, None)?;
                store.insert(key.clone(), stats);
                normalized
            } else {
                signal
            };
            signals.insert(key, signal);
        }

        let mut windows = BTreeMap::new();
        for (key, signal) in &signals {
            let past = window(past_view(signal.view(), horizon)?, horizon)?;
            let future = window(future_view(signal.view(), horizon)?, horizon)?;
            windows.insert(SignalKey::past(key.as_str()), past);
            windows.insert(SignalKey::future(key.as_str()), future);
        }
        let nstep = split_windows(&windows)?;
        let open_loop = flatten_splits(&nstep)?;

        tracing::debug!(
            dataset = %name,
            horizon,
            len,
            primary = %primary,
            keys = ?signals.keys().collect::<Vec<_>>(),
            normalized = store.len(),
            "built sequence dataset"
        );

        Ok(SequenceDataset {
            name,
            horizon,
            primary,
            signals,
            store,
            nstep,
            open_loop,
        })
    }
}

fn primary_key(signals: &Signals) -> Result<String> {
    if signals.contains_key(PRIMARY_SIGNAL) {
        return Ok(PRIMARY_SIGNAL.to_string());
    }
    signals
        .keys()
        .next()
        .cloned()
        .ok_or_else(|| DataError::Configuration("source produced no signals".to_string()))
}

fn flatten_splits(nstep: &SplitBundles) -> Result<SplitBundles> {
    let flatten = |split: Split| -> Result<DatasetBundle> {
        let tensors = nstep
            .get(split)
            .iter()
            .map(|(k, t)| (k.clone(), unwindow(t.view())))
            .collect();
        DatasetBundle::new(BundleName::open_loop(split), tensors)
    };
    Ok(SplitBundles {
        train: flatten(Split::Train)?,
        dev: flatten(Split::Dev)?,
        test: flatten(Split::Test)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::NpzSource;
    use ndarray::{array, Array2};

    fn ramp(len: usize, features: usize) -> Array2<f32> {
        Array2::from_shape_fn((len, features), |(t, j)| (t + j * 100) as f32)
    }

    #[test]
    fn test_requires_a_data_entry_point() {
        let err = SequenceDataset::builder().build().unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, DataError::Configuration(_)));
        assert!(msg.contains(".source(") && msg.contains(".sequence("));
    }

    #[test]
    fn test_length_mismatch_fails_before_windowing() {
        let err = SequenceDataset::builder()
            .horizon(4)
            .sequence("Y", ramp(20, 1))
            .sequence("U", ramp(19, 2))
            .build()
            .unwrap_err();
        match err {
            DataError::LengthMismatch { key, primary, expected, got } => {
                assert_eq!(key, "U");
                assert_eq!(primary, "Y");
                assert_eq!((expected, got), (20, 19));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_zero_horizon_and_short_signal() {
        let zero = SequenceDataset::builder().horizon(0).sequence("Y", ramp(20, 1)).build();
        assert!(matches!(zero, Err(DataError::InvalidHorizon(0))));

        let short = SequenceDataset::builder().horizon(4).sequence("Y", ramp(7, 1)).build();
        assert!(matches!(short, Err(DataError::InsufficientLength { len: 3, .. })));
    }

    #[test]
    fn test_twenty_rows_horizon_four() {
        let ds = SequenceDataset::builder()
            .horizon(4)
            .sequence("Y", ramp(20, 1))
            .sequence("U", ramp(20, 2))
            .build()
            .unwrap();

        assert_eq!(ds.primary_key(), "Y");
        assert_eq!(ds.nstep(Split::Train).n_samples(), 1);
        assert_eq!(ds.nstep(Split::Dev).n_samples(), 1);
        assert_eq!(ds.nstep(Split::Test).n_samples(), 2);
        for bundle in ds.bundles() {
            assert_eq!(bundle.len(), 4);
        }

        let yp = ds.nstep(Split::Test).get(&SignalKey::past("Y")).unwrap();
        let yf = ds.nstep(Split::Test).get(&SignalKey::future("Y")).unwrap();
        assert_eq!(yp.dim(), (4, 2, 1));
        // Future windows sit exactly one horizon after past windows.
        let step = 1.0 / 19.0;
        for w in 0..2 {
            for t in 0..4 {
                assert!((yf[[t, w, 0]] - yp[[t, w, 0]] - 4.0 * step).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_loop_bundles_reassemble_splits() {
        let ds = SequenceDataset::builder()
            .horizon(3)
            .sequence("Y", ramp(22, 1))
            .normalize(Vec::<String>::new())
            .build()
            .unwrap();

        // Views have 19 rows: 6 windows, 1 leftover row dropped.
        let key = SignalKey::past("Y");
        assert_eq!(ds.loop_data(Split::Train).get(&key).unwrap().dim(), (6, 1, 1));
        assert_eq!(ds.loop_data(Split::Test).get(&key).unwrap().dim(), (6, 1, 1));

        let trajectory = ds.open_loop_trajectory(&key).unwrap();
        assert_eq!(trajectory.dim(), (18, 1, 1));
        for t in 0..18 {
            assert_eq!(trajectory[[t, 0, 0]], t as f32);
        }
    }

    #[test]
    fn test_selective_normalization_and_denormalize() {
        let ds = SequenceDataset::builder()
            .horizon(2)
            .sequence("Y", array![[2.0f32], [4.0], [6.0], [8.0], [10.0], [12.0]])
            .sequence("U", array![[5.0f32], [5.0], [5.0], [5.0], [5.0], [5.0]])
            .normalize(["Y"])
            .build()
            .unwrap();

        assert_eq!(ds.store().len(), 1);
        assert_eq!(ds.signals()["Y"][[5, 0]], 1.0);
        assert_eq!(ds.signals()["U"][[0, 0]], 5.0);

        let yf = ds.nstep(Split::Test).get(&SignalKey::future("Y")).unwrap();
        let restored = ds.denormalize("Yf", yf.view()).unwrap();
        assert!((restored[[0, 0, 0]] - 6.0).abs() < 1e-5);

        let u = ds.denormalize("U", ds.signals()["U"].view()).unwrap();
        assert_eq!(u, ds.signals()["U"]);
        assert!(ds.denormalize("X", u.view()).is_err());
    }

    #[test]
    fn test_unknown_normalize_key() {
        let err = SequenceDataset::builder()
            .horizon(2)
            .sequence("Y", ramp(8, 1))
            .normalize(["D"])
            .build()
            .unwrap_err();
        assert!(matches!(err, DataError::MissingKey(k) if k == "D"));
    }

    #[test]
    fn test_dims_include_views() {
        let ds = SequenceDataset::builder()
            .horizon(2)
            .sequence("Y", ramp(8, 3))
            .build()
            .unwrap();
        let dims = ds.dims();
        assert_eq!(dims["Y"], 3);
        assert_eq!(dims["Yp"], 3);
        assert_eq!(dims["Yf"], 3);
    }

    #[test]
    fn test_npz_source_with_nsim() {
        use ndarray_npy::NpzWriter;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plant.npz");
        {
            let mut npz = NpzWriter::new(std::fs::File::create(&path).unwrap());
            npz.add_array("y", &ramp(30, 1)).unwrap();
            npz.add_array("u", &ramp(30, 2)).unwrap();
            npz.finish().unwrap();
        }

        let ds = SequenceDataset::builder()
            .horizon(2)
            .source(NpzSource::new(&path))
            .nsim(12)
            .build()
            .unwrap();

        assert_eq!(ds.name(), "plant");
        assert_eq!(ds.signals()["Y"].nrows(), 12);
        assert_eq!(ds.signals()["U"].ncols(), 2);
        // 10 rows per view, 5 windows: 1 / 1 / 3.
        assert_eq!(ds.nstep(Split::Test).n_samples(), 3);
    }

    #[test]
    fn test_first_key_is_primary_without_y() {
        let ds = SequenceDataset::builder()
            .horizon(2)
            .sequence("X", ramp(8, 1))
            .sequence("A", ramp(8, 1))
            .build()
            .unwrap();
        assert_eq!(ds.primary_key(), "A");
    }

    #[test]
    fn test_config_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, r#"{"horizon": 5, "normalize": ["Y"], "shuffle": true}"#).unwrap();

        let config = DatasetConfig::from_json_file(&path).unwrap();
        assert_eq!(config.horizon, 5);
        assert!(config.shuffle);
        assert_eq!(config.nsim, None);

        let ds = SequenceDataset::builder()
            .config(&config)
            .sequence("Y", ramp(20, 1))
            .build()
            .unwrap();
        assert_eq!(ds.horizon(), 5);
    }
}
