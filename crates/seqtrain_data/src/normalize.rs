//! Min-max normalization of 2-D `(time, features)` signals.
//!
//! Every feature is rescaled with `(x - min) / (max - min)` using bounds taken
//! over the time axis. Non-finite results are replaced by `0`. For a feature
//! whose `max == min` this collapses the whole column to `0`, and
//! [`denormalize`] maps that back to `min`: the round trip is lossy there and
//! exact everywhere else.

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::{Array, Array1, Array2, ArrayView, ArrayView1, ArrayView2, Axis, Dimension};
use serde::{Deserialize, Serialize};

use crate::error::{DataError, Result};

/// Per-feature bounds of one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxStats {
    /// Per-feature minimum.
    pub min: Array1<f32>,
    /// Per-feature maximum.
    pub max: Array1<f32>,
}

impl MinMaxStats {
    /// Create bounds from explicit vectors.
    ///
    /// # Errors
    ///
    /// Returns an error if the vectors differ in length or `max < min` for
    /// any feature.
    pub fn new(min: Array1<f32>, max: Array1<f32>) -> Result<Self> {
        if min.len() != max.len() {
            return Err(DataError::InvalidBounds(format!(
                "min has {} features but max has {}",
                min.len(),
                max.len()
            )));
        }
        if let Some(i) = min.iter().zip(max.iter()).position(|(lo, hi)| hi < lo) {
            return Err(DataError::InvalidBounds(format!(
                "feature {i}: max {} is below min {}",
                max[i], min[i]
            )));
        }
        Ok(Self { min, max })
    }

    /// Compute bounds over the time axis of a `(time, features)` signal.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal has no rows.
    pub fn fit(signal: ArrayView2<'_, f32>) -> Result<Self> {
        if signal.nrows() == 0 {
            return Err(DataError::InvalidShape(
                "cannot compute normalization bounds of an empty signal".to_string(),
            ));
        }
        let min = signal.fold_axis(Axis(0), f32::INFINITY, |&acc, &x| acc.min(x));
        let max = signal.fold_axis(Axis(0), f32::NEG_INFINITY, |&acc, &x| acc.max(x));
        Ok(Self { min, max })
    }

    /// Number of features covered.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.min.len()
    }

    /// Whether a feature has `max == min`, the case where the round trip is lossy.
    #[must_use]
    pub fn is_degenerate(&self, feature: usize) -> bool {
        self.max[feature] == self.min[feature]
    }
}

/// Normalize a signal, fitting any bound that is not supplied.
///
/// Returns the normalized signal together with the bounds that were used.
///
/// # Errors
///
/// Returns an error if the signal is empty, a supplied bound has the wrong
/// number of features, or the resulting bounds have `max < min`.
pub fn fit_normalize(
    signal: ArrayView2<'_, f32>,
    min: Option<ArrayView1<'_, f32>>,
    max: Option<ArrayView1<'_, f32>>,
) -> Result<(Array2<f32>, MinMaxStats)> {
    let stats = match (min, max) {
        (Some(lo), Some(hi)) => MinMaxStats::new(lo.to_owned(), hi.to_owned())?,
        (lo, hi) => {
            let fitted = MinMaxStats::fit(signal)?;
            MinMaxStats::new(
                lo.map_or(fitted.min, |v| v.to_owned()),
                hi.map_or(fitted.max, |v| v.to_owned()),
            )?
        }
    };
    let normalized = normalize(signal, &stats)?;
    Ok((normalized, stats))
}

/// Apply `(x - min) / (max - min)` along the last axis of `x`.
///
/// # Errors
///
/// Returns an error if the last axis does not match the number of features.
pub fn normalize<D: Dimension>(
    x: ArrayView<'_, f32, D>,
    stats: &MinMaxStats,
) -> Result<Array<f32, D>> {
    map_features(x, stats, |v, lo, hi| (v - lo) / (hi - lo))
}

/// Apply `x * (max - min) + min` along the last axis of `x`.
///
/// Works on 2-D signals as well as windowed `(horizon, windows, features)`
/// and open-loop `(time, 1, features)` tensors.
///
/// # Errors
///
/// Returns an error if the last axis does not match the number of features.
pub fn denormalize<D: Dimension>(
    x: ArrayView<'_, f32, D>,
    stats: &MinMaxStats,
) -> Result<Array<f32, D>> {
    map_features(x, stats, |v, lo, hi| v * (hi - lo) + lo)
}

fn map_features<D, F>(x: ArrayView<'_, f32, D>, stats: &MinMaxStats, f: F) -> Result<Array<f32, D>>
where
    D: Dimension,
    F: Fn(f32, f32, f32) -> f32,
{
    let ndim = x.ndim();
    if ndim == 0 || x.shape()[ndim - 1] != stats.n_features() {
        return Err(DataError::InvalidShape(format!(
            "expected last axis of {} features, got shape {:?}",
            stats.n_features(),
            x.shape()
        )));
    }

    let mut out = x.to_owned();
    for mut lane in out.lanes_mut(Axis(ndim - 1)) {
        for ((v, &lo), &hi) in lane.iter_mut().zip(stats.min.iter()).zip(stats.max.iter()) {
            let y = f(*v, lo, hi);
            *v = if y.is_finite() { y } else { 0.0 };
        }
    }
    Ok(out)
}

/// Frozen normalization bounds for every signal of a dataset, keyed by signal name.
///
/// Serializable so inference code can reuse the exact bounds seen at training time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStore {
    stats: BTreeMap<String, MinMaxStats>,
}

impl NormalizationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record bounds for a signal.
    pub fn insert(&mut self, key: impl Into<String>, stats: MinMaxStats) {
        self.stats.insert(key.into(), stats);
    }

    /// Bounds recorded for a signal, if it was normalized.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&MinMaxStats> {
        self.stats.get(key)
    }

    /// Signal names with recorded bounds.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.stats.keys().map(String::as_str)
    }

    /// Number of signals with recorded bounds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stats.len()
    }

    /// Whether no bounds are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Normalize an array with the bounds of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::MissingKey`] if no bounds exist for `key`.
    pub fn normalize<D: Dimension>(
        &self,
        key: &str,
        x: ArrayView<'_, f32, D>,
    ) -> Result<Array<f32, D>> {
        normalize(x, self.require(key)?)
    }

    /// Denormalize an array with the bounds of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::MissingKey`] if no bounds exist for `key`.
    pub fn denormalize<D: Dimension>(
        &self,
        key: &str,
        x: ArrayView<'_, f32, D>,
    ) -> Result<Array<f32, D>> {
        denormalize(x, self.require(key)?)
    }

    /// Write the store as pretty JSON.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Read a store previously written by [`save_json`](Self::save_json).
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    fn require(&self, key: &str) -> Result<&MinMaxStats> {
        self.stats
            .get(key)
            .ok_or_else(|| DataError::MissingKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};

    #[test]
    fn test_fit_normalize_range() {
        let x = array![[1.0f32, -2.0], [3.0, 0.0], [5.0, 2.0]];
        let (norm, stats) = fit_normalize(x.view(), None, None).unwrap();

        assert_eq!(stats.min, array![1.0, -2.0]);
        assert_eq!(stats.max, array![5.0, 2.0]);
        assert_eq!(norm, array![[0.0, 0.0], [0.5, 0.5], [1.0, 1.0]]);
    }

    #[test]
    fn test_round_trip_non_degenerate() {
        let x = array![[0.3f32, 10.0], [-1.7, 12.5], [2.2, 11.0], [0.0, 19.0]];
        let (norm, stats) = fit_normalize(x.view(), None, None).unwrap();
        let back = denormalize(norm.view(), &stats).unwrap();

        for (a, b) in x.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-5, "{a} vs {b}");
        }
    }

    #[test]
    fn test_degenerate_feature_collapses_to_min() {
        let x = array![[4.0f32, 1.0], [4.0, 2.0], [4.0, 3.0]];
        let (norm, stats) = fit_normalize(x.view(), None, None).unwrap();

        assert!(stats.is_degenerate(0));
        assert!(!stats.is_degenerate(1));
        assert!(norm.column(0).iter().all(|&v| v == 0.0));

        let back = denormalize(norm.view(), &stats).unwrap();
        assert!(back.column(0).iter().all(|&v| v == 4.0));
    }

    #[test]
    fn test_degenerate_supplied_bounds_lose_value() {
        // Constant 7 normalized against a degenerate bound of 2 becomes 0,
        // which denormalizes to 2 rather than 7.
        let x = array![[7.0f32], [7.0]];
        let lo = array![2.0f32];
        let hi = array![2.0f32];
        let (norm, stats) = fit_normalize(x.view(), Some(lo.view()), Some(hi.view())).unwrap();

        assert!(norm.iter().all(|&v| v == 0.0));
        let back = denormalize(norm.view(), &stats).unwrap();
        assert!(back.iter().all(|&v| v == 2.0));
    }

    #[test]
    fn test_partial_bounds_are_fitted() {
        let x = array![[1.0f32], [3.0]];
        let lo = array![0.0f32];
        let (norm, stats) = fit_normalize(x.view(), Some(lo.view()), None).unwrap();

        assert_eq!(stats.min, array![0.0]);
        assert_eq!(stats.max, array![3.0]);
        assert!((norm[[0, 0]] - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let x = array![[1.0f32]];
        let lo = array![2.0f32];
        let hi = array![1.0f32];
        assert!(matches!(
            fit_normalize(x.view(), Some(lo.view()), Some(hi.view())),
            Err(DataError::InvalidBounds(_))
        ));
    }

    #[test]
    fn test_empty_signal_rejected() {
        let x = Array2::<f32>::zeros((0, 3));
        assert!(fit_normalize(x.view(), None, None).is_err());
    }

    #[test]
    fn test_denormalize_windowed_tensor() {
        let stats = MinMaxStats::new(array![10.0, 0.0], array![20.0, 1.0]).unwrap();
        let x = Array3::<f32>::from_elem((4, 3, 2), 0.5);
        let back = denormalize(x.view(), &stats).unwrap();

        assert_eq!(back.dim(), (4, 3, 2));
        assert!(back.index_axis(Axis(2), 0).iter().all(|&v| v == 15.0));
        assert!(back.index_axis(Axis(2), 1).iter().all(|&v| v == 0.5));
    }

    #[test]
    fn test_feature_mismatch_rejected() {
        let stats = MinMaxStats::new(array![0.0], array![1.0]).unwrap();
        let x = Array2::<f32>::zeros((3, 2));
        assert!(denormalize(x.view(), &stats).is_err());
    }

    #[test]
    fn test_store_json_round_trip() {
        let mut store = NormalizationStore::new();
        store.insert("Y", MinMaxStats::new(array![0.0, 1.0], array![2.0, 1.0]).unwrap());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("norms.json");
        store.save_json(&path).unwrap();
        let loaded = NormalizationStore::load_json(&path).unwrap();

        assert_eq!(store, loaded);
        assert!(loaded.denormalize("U", Array2::<f32>::zeros((1, 2)).view()).is_err());
    }
}
