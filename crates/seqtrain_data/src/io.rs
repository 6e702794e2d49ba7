//! Signal sources backed by NumPy files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayD, Axis, Ix2};

use crate::error::{DataError, Result};

/// Named raw signals, each `(time, features)`.
pub type Signals = BTreeMap<String, Array2<f32>>;

/// Archive member names and the signal keys they load into.
///
/// `y` holds measured outputs, `u` control inputs and `d` disturbances.
pub const NPZ_SIGNALS: [(&str, &str); 3] = [("y", "Y"), ("u", "U"), ("d", "D")];

/// A named system whose raw signals can be loaded.
pub trait SignalSource {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    /// Load every available signal.
    fn load(&self) -> Result<Signals>;
}

/// Loads `Y`/`U`/`D` signals from a `.npz` archive with members `y`, `u`, `d`.
///
/// Missing members are skipped, but at least one must be present.
#[derive(Debug, Clone)]
pub struct NpzSource {
    path: PathBuf,
    name: String,
}

impl NpzSource {
    /// Create a source for an archive.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .map_or_else(|| path.display().to_string(), |s| s.to_string_lossy().into_owned());
        Self { path, name }
    }

    /// Path of the archive.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SignalSource for NpzSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> Result<Signals> {
        let file = std::fs::File::open(&self.path)?;
        let mut npz = ndarray_npy::NpzReader::new(file)
            .map_err(|e| DataError::FormatError(format!("Failed to read npz file: {e}")))?;
        let members = npz
            .names()
            .map_err(|e| DataError::FormatError(format!("Failed to list npz members: {e}")))?;

        let mut signals = Signals::new();
        for (member, key) in NPZ_SIGNALS {
            let Some(entry) = members
                .iter()
                .find(|m| m.as_str() == member || m.strip_suffix(".npy") == Some(member))
            else {
                continue;
            };
            let array = read_npz_member(&mut npz, entry)?;
            signals.insert(key.to_string(), to_signal(array, entry)?);
        }

        if signals.is_empty() {
            return Err(DataError::FormatError(format!(
                "{} contains none of the members y, u, d",
                self.path.display()
            )));
        }
        tracing::debug!(source = %self.name, keys = ?signals.keys().collect::<Vec<_>>(), "loaded npz");
        Ok(signals)
    }
}

/// Loads a single `.npy` array as one named signal.
#[derive(Debug, Clone)]
pub struct NpySource {
    path: PathBuf,
    key: String,
}

impl NpySource {
    /// Create a source that loads `path` into signal `key`.
    pub fn new(path: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
        }
    }
}

impl SignalSource for NpySource {
    fn name(&self) -> &str {
        &self.key
    }

    fn load(&self) -> Result<Signals> {
        let array = read_npy(&self.path)?;
        let mut signals = Signals::new();
        signals.insert(self.key.clone(), array);
        Ok(signals)
    }
}

/// Read a 1-D or 2-D `.npy` file of `f32` or `f64` as a `(time, features)` signal.
pub fn read_npy<P: AsRef<Path>>(path: P) -> Result<Array2<f32>> {
    use ndarray_npy::ReadNpyExt;

    let path = path.as_ref();
    let reader = std::io::BufReader::new(std::fs::File::open(path)?);
    let array = match ArrayD::<f32>::read_npy(reader) {
        Ok(arr) => arr,
        Err(e) => {
            let reader = std::io::BufReader::new(std::fs::File::open(path)?);
            ArrayD::<f64>::read_npy(reader)
                .map_err(|_| DataError::FormatError(format!("Failed to read npy file: {e}")))?
                .mapv(|x| x as f32)
        }
    };
    to_signal(array, &path.display().to_string())
}

fn read_npz_member(
    npz: &mut ndarray_npy::NpzReader<std::fs::File>,
    name: &str,
) -> Result<ArrayD<f32>> {
    match npz.by_name::<ndarray::OwnedRepr<f32>, ndarray::IxDyn>(name) {
        Ok(arr) => Ok(arr),
        Err(e) => npz
            .by_name::<ndarray::OwnedRepr<f64>, ndarray::IxDyn>(name)
            .map(|arr| arr.mapv(|x| x as f32))
            .map_err(|_| DataError::FormatError(format!("Failed to read '{name}' from npz: {e}"))),
    }
}

fn to_signal(array: ArrayD<f32>, what: &str) -> Result<Array2<f32>> {
    let array = match array.ndim() {
        1 => array.insert_axis(Axis(1)),
        2 => array,
        n => {
            return Err(DataError::InvalidShape(format!(
                "{what}: expected a 1-D or 2-D array, got {n} dimensions"
            )))
        }
    };
    array
        .into_dimensionality::<Ix2>()
        .map_err(|e| DataError::InvalidShape(format!("{what}: {e}")))
}
