//! Typed keys and named tensor bundles.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ndarray::{Array3, Axis};
use serde::{Deserialize, Serialize};
use seqtrain_core::Split;

use crate::error::{DataError, Result};

/// Which time-shifted view of a signal a tensor holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum View {
    /// The signal without its final `horizon` rows.
    Past,
    /// The signal without its first `horizon` rows.
    Future,
}

impl View {
    /// Single-letter suffix appended to the signal name.
    #[must_use]
    pub const fn suffix(&self) -> char {
        match self {
            View::Past => 'p',
            View::Future => 'f',
        }
    }
}

/// Key of one tensor in a bundle: a signal name plus its view.
///
/// Displays and parses as `"{name}p"` / `"{name}f"`, e.g. `Yp` or `Uf`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SignalKey {
    name: String,
    view: View,
}

impl SignalKey {
    /// Create a key.
    pub fn new(name: impl Into<String>, view: View) -> Self {
        Self {
            name: name.into(),
            view,
        }
    }

    /// Past view of a signal.
    pub fn past(name: impl Into<String>) -> Self {
        Self::new(name, View::Past)
    }

    /// Future view of a signal.
    pub fn future(name: impl Into<String>) -> Self {
        Self::new(name, View::Future)
    }

    /// Signal name without the view suffix.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// View of the signal.
    #[must_use]
    pub const fn view(&self) -> View {
        self.view
    }

    /// The same signal with the other view.
    #[must_use]
    pub fn counterpart(&self) -> Self {
        let view = match self.view {
            View::Past => View::Future,
            View::Future => View::Past,
        };
        Self::new(self.name.clone(), view)
    }
}

impl fmt::Display for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.view.suffix())
    }
}

impl FromStr for SignalKey {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self> {
        let view = match s.chars().last() {
            Some('p') => View::Past,
            Some('f') => View::Future,
            _ => return Err(DataError::MissingKey(s.to_string())),
        };
        let name = &s[..s.len() - 1];
        if name.is_empty() {
            return Err(DataError::MissingKey(s.to_string()));
        }
        Ok(Self::new(name, view))
    }
}

/// Layout of the tensors in a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleForm {
    /// Horizon-major windows, `(horizon, n_windows, features)`.
    NStep,
    /// One contiguous trajectory, `(time, 1, features)`.
    Loop,
}

/// Name of a bundle: its form and the split it covers.
///
/// Displays as `nstep_train`, `loop_dev`, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BundleName {
    /// Tensor layout.
    pub form: BundleForm,
    /// Split covered.
    pub split: Split,
}

impl BundleName {
    /// Windowed bundle for a split.
    #[must_use]
    pub const fn nstep(split: Split) -> Self {
        Self {
            form: BundleForm::NStep,
            split,
        }
    }

    /// Open-loop bundle for a split.
    #[must_use]
    pub const fn open_loop(split: Split) -> Self {
        Self {
            form: BundleForm::Loop,
            split,
        }
    }
}

impl fmt::Display for BundleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let form = match self.form {
            BundleForm::NStep => "nstep",
            BundleForm::Loop => "loop",
        };
        write!(f, "{form}_{}", self.split)
    }
}

/// A named mapping from [`SignalKey`] to 3-D tensor.
///
/// All tensors in one bundle share the same length on axis 1 (windows for
/// n-step bundles, `1` for loop bundles).
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetBundle {
    name: BundleName,
    tensors: BTreeMap<SignalKey, Array3<f32>>,
}

impl DatasetBundle {
    /// Create a bundle, checking that every tensor has the same sample count.
    ///
    /// # Errors
    ///
    /// Returns an error if the tensors disagree on axis 1.
    pub fn new(name: BundleName, tensors: BTreeMap<SignalKey, Array3<f32>>) -> Result<Self> {
        let mut samples = tensors.iter().map(|(k, t)| (k, t.len_of(Axis(1))));
        if let Some((first_key, n)) = samples.next() {
            if let Some((key, m)) = samples.find(|(_, m)| *m != n) {
                return Err(DataError::InvalidShape(format!(
                    "bundle {name}: '{key}' has {m} samples but '{first_key}' has {n}"
                )));
            }
        }
        Ok(Self { name, tensors })
    }

    /// Bundle name.
    #[must_use]
    pub const fn name(&self) -> BundleName {
        self.name
    }

    /// Tensor for a key.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::MissingKey`] if the bundle lacks the key.
    pub fn get(&self, key: &SignalKey) -> Result<&Array3<f32>> {
        self.tensors
            .get(key)
            .ok_or_else(|| DataError::MissingKey(format!("{key} in {}", self.name)))
    }

    /// Iterate over keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &SignalKey> {
        self.tensors.keys()
    }

    /// Iterate over `(key, tensor)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&SignalKey, &Array3<f32>)> {
        self.tensors.iter()
    }

    /// Number of tensors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Whether the bundle holds no tensors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Number of samples on axis 1 (windows, or 1 for loop bundles).
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.tensors
            .values()
            .next()
            .map_or(0, |t| t.len_of(Axis(1)))
    }

    /// Number of rows on axis 0 (horizon, or trajectory length for loop bundles).
    #[must_use]
    pub fn n_steps(&self) -> usize {
        self.tensors
            .values()
            .next()
            .map_or(0, |t| t.len_of(Axis(0)))
    }

    /// Sub-bundle with the given samples along axis 1, in the given order.
    pub(crate) fn select_samples(&self, indices: &[usize]) -> Self {
        let tensors = self
            .tensors
            .iter()
            .map(|(k, t)| (k.clone(), t.select(Axis(1), indices)))
            .collect();
        Self {
            name: self.name,
            tensors,
        }
    }

    pub(crate) fn into_tensors(self) -> BTreeMap<SignalKey, Array3<f32>> {
        self.tensors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_key_display_and_parse() {
        let key = SignalKey::past("Y");
        assert_eq!(key.to_string(), "Yp");
        assert_eq!("Yp".parse::<SignalKey>().unwrap(), key);
        assert_eq!("Uf".parse::<SignalKey>().unwrap(), SignalKey::future("U"));
        assert_eq!(key.counterpart(), SignalKey::future("Y"));
        assert!("Y".parse::<SignalKey>().is_err());
        assert!("p".parse::<SignalKey>().is_err());
    }

    #[test]
    fn test_bundle_names() {
        assert_eq!(BundleName::nstep(Split::Train).to_string(), "nstep_train");
        assert_eq!(BundleName::open_loop(Split::Dev).to_string(), "loop_dev");
        assert_eq!(BundleName::open_loop(Split::Test).to_string(), "loop_test");
    }

    #[test]
    fn test_bundle_rejects_ragged_samples() {
        let mut tensors = BTreeMap::new();
        tensors.insert(SignalKey::past("Y"), Array3::<f32>::zeros((4, 3, 1)));
        tensors.insert(SignalKey::future("Y"), Array3::<f32>::zeros((4, 2, 1)));
        assert!(DatasetBundle::new(BundleName::nstep(Split::Train), tensors).is_err());
    }

    #[test]
    fn test_bundle_select_samples() {
        let mut tensors = BTreeMap::new();
        let t = Array3::from_shape_fn((2, 3, 1), |(_, w, _)| w as f32);
        tensors.insert(SignalKey::past("Y"), t);
        let bundle = DatasetBundle::new(BundleName::nstep(Split::Train), tensors).unwrap();

        let sub = bundle.select_samples(&[2, 0]);
        let yp = sub.get(&SignalKey::past("Y")).unwrap();
        assert_eq!(sub.n_samples(), 2);
        assert_eq!(yp[[0, 0, 0]], 2.0);
        assert_eq!(yp[[1, 1, 0]], 0.0);
        assert!(sub.get(&SignalKey::future("Y")).is_err());
    }
}
