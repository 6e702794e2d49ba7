//! Fixed-horizon windowing of `(time, features)` sequences.
//!
//! A sequence of `T` rows is cut into `T / horizon` contiguous,
//! non-overlapping windows. The trailing `T % horizon` rows are dropped, never
//! padded. Windows are stored horizon-major: `(horizon, n_windows, features)`.

use ndarray::{s, Array3, ArrayView2, ArrayView3};

use crate::error::{DataError, Result};

/// How a sequence of a given length is cut by a horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlan {
    /// Window length.
    pub horizon: usize,
    /// Number of complete windows.
    pub n_windows: usize,
    /// Trailing rows that do not fill a window and are dropped.
    pub leftover: usize,
}

impl WindowPlan {
    /// Plan the windowing of `len` rows.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::InvalidHorizon`] for a zero horizon.
    pub fn new(len: usize, horizon: usize) -> Result<Self> {
        if horizon == 0 {
            return Err(DataError::InvalidHorizon(horizon));
        }
        Ok(Self {
            horizon,
            n_windows: len / horizon,
            leftover: len % horizon,
        })
    }

    /// Rows that end up inside some window.
    #[must_use]
    pub const fn covered_len(&self) -> usize {
        self.n_windows * self.horizon
    }
}

/// Cut a sequence into horizon-major windows.
///
/// Row `t` of window `w` is row `w * horizon + t` of the input.
///
/// # Errors
///
/// Returns [`DataError::InvalidHorizon`] for a zero horizon.
///
/// # Example
///
/// ```rust
/// use ndarray::Array2;
/// use seqtrain_data::window;
///
/// let seq = Array2::<f32>::zeros((10, 3));
/// let windows = window(seq.view(), 4).unwrap();
/// assert_eq!(windows.dim(), (4, 2, 3));
/// ```
pub fn window(sequence: ArrayView2<'_, f32>, horizon: usize) -> Result<Array3<f32>> {
    let plan = WindowPlan::new(sequence.nrows(), horizon)?;
    let n_features = sequence.ncols();
    Ok(Array3::from_shape_fn(
        (horizon, plan.n_windows, n_features),
        |(t, w, j)| sequence[[w * horizon + t, j]],
    ))
}

/// Reassemble horizon-major windows into one `(n_windows * horizon, 1, features)` trajectory.
///
/// `unwindow(window(x, h))` equals `x` without its trailing `len % h` rows;
/// the dropped rows cannot be recovered.
#[must_use]
pub fn unwindow(windows: ArrayView3<'_, f32>) -> Array3<f32> {
    let (horizon, n_windows, n_features) = windows.dim();
    Array3::from_shape_fn((horizon * n_windows, 1, n_features), |(t, _, j)| {
        windows[[t % horizon, t / horizon, j]]
    })
}

/// The sequence without its final `horizon` rows.
///
/// # Errors
///
/// Returns an error if the sequence is shorter than the horizon.
pub fn past_view(sequence: ArrayView2<'_, f32>, horizon: usize) -> Result<ArrayView2<'_, f32>> {
    let len = shifted_len(sequence.nrows(), horizon)?;
    Ok(sequence.slice_move(s![..len, ..]))
}

/// The sequence without its first `horizon` rows.
///
/// # Errors
///
/// Returns an error if the sequence is shorter than the horizon.
pub fn future_view(sequence: ArrayView2<'_, f32>, horizon: usize) -> Result<ArrayView2<'_, f32>> {
    shifted_len(sequence.nrows(), horizon)?;
    Ok(sequence.slice_move(s![horizon.., ..]))
}

fn shifted_len(len: usize, horizon: usize) -> Result<usize> {
    if horizon == 0 {
        return Err(DataError::InvalidHorizon(horizon));
    }
    len.checked_sub(horizon).ok_or_else(|| {
        DataError::InvalidShape(format!(
            "sequence of {len} rows cannot be shifted by horizon {horizon}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn ramp(len: usize, features: usize) -> Array2<f32> {
        Array2::from_shape_fn((len, features), |(t, j)| (t * 10 + j) as f32)
    }

    #[test]
    fn test_window_drops_leftover() {
        let seq = ramp(11, 2);
        let windows = window(seq.view(), 3).unwrap();

        assert_eq!(windows.dim(), (3, 3, 2));
        // Window 2, step 1 is row 7.
        assert_eq!(windows[[1, 2, 0]], 70.0);
        assert_eq!(windows[[1, 2, 1]], 71.0);
        // Rows 9 and 10 appear nowhere.
        assert!(windows.iter().all(|&v| v < 90.0));
    }

    #[test]
    fn test_window_plan() {
        let plan = WindowPlan::new(20, 6).unwrap();
        assert_eq!(plan.n_windows, 3);
        assert_eq!(plan.leftover, 2);
        assert_eq!(plan.covered_len(), 18);
        assert!(WindowPlan::new(20, 0).is_err());
    }

    #[test]
    fn test_unwindow_restores_chronology() {
        let seq = ramp(14, 3);
        let windows = window(seq.view(), 4).unwrap();
        let flat = unwindow(windows.view());

        assert_eq!(flat.dim(), (12, 1, 3));
        for t in 0..12 {
            for j in 0..3 {
                assert_eq!(flat[[t, 0, j]], seq[[t, j]]);
            }
        }
    }

    #[test]
    fn test_short_sequence_yields_no_windows() {
        let seq = ramp(3, 1);
        let windows = window(seq.view(), 5).unwrap();
        assert_eq!(windows.dim(), (5, 0, 1));
        assert_eq!(unwindow(windows.view()).dim(), (0, 1, 1));
    }

    #[test]
    fn test_past_future_shift() {
        let seq = ramp(20, 1);
        let h = 4;
        let past = window(past_view(seq.view(), h).unwrap(), h).unwrap();
        let future = window(future_view(seq.view(), h).unwrap(), h).unwrap();

        assert_eq!(past.dim(), (4, 4, 1));
        assert_eq!(future.dim(), (4, 4, 1));
        for w in 0..4 {
            for t in 0..h {
                assert_eq!(future[[t, w, 0]] - past[[t, w, 0]], (h * 10) as f32);
            }
        }
    }

    #[test]
    fn test_shift_longer_than_sequence() {
        let seq = ramp(3, 1);
        assert!(past_view(seq.view(), 4).is_err());
        assert!(future_view(seq.view(), 4).is_err());
    }
}
