//! The capabilities the training loop needs from a model.

use std::collections::BTreeMap;
use std::fmt;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use seqtrain_data::Batch;

use crate::error::{Result, TrainError};
use crate::snapshot::ModelSnapshot;

/// Train or evaluation behaviour of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Optimization mode.
    Train,
    /// Evaluation mode.
    Eval,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Train => write!(f, "train"),
            Mode::Eval => write!(f, "eval"),
        }
    }
}

/// A named learnable array with its accumulated gradient.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Unique name, used as the snapshot key.
    pub name: String,
    /// Current value.
    pub value: ArrayD<f32>,
    /// Gradient from the last backward pass, if any.
    pub grad: Option<ArrayD<f32>>,
}

impl Parameter {
    /// Create a parameter without a gradient.
    pub fn new(name: impl Into<String>, value: ArrayD<f32>) -> Self {
        Self {
            name: name.into(),
            value,
            grad: None,
        }
    }

    /// Drop the accumulated gradient.
    pub fn zero_grad(&mut self) {
        self.grad = None;
    }

    /// Add `grad` to the accumulated gradient.
    ///
    /// # Errors
    ///
    /// Returns an error if the gradient shape differs from the value shape.
    pub fn accumulate_grad(&mut self, grad: ArrayD<f32>) -> Result<()> {
        if grad.shape() != self.value.shape() {
            return Err(TrainError::BackwardError(format!(
                "gradient for '{}' has shape {:?}, expected {:?}",
                self.name,
                grad.shape(),
                self.value.shape()
            )));
        }
        match &mut self.grad {
            Some(acc) => *acc += &grad,
            None => self.grad = Some(grad),
        }
        Ok(())
    }

    /// Number of scalar entries.
    #[must_use]
    pub fn numel(&self) -> usize {
        self.value.len()
    }
}

/// One entry of a forward-pass output.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputValue {
    /// A loss or metric.
    Scalar(f32),
    /// Any array the model wants to expose, e.g. predictions.
    Tensor(ArrayD<f32>),
}

impl OutputValue {
    /// The value if it is a scalar.
    #[must_use]
    pub fn as_scalar(&self) -> Option<f32> {
        match self {
            OutputValue::Scalar(v) => Some(*v),
            OutputValue::Tensor(_) => None,
        }
    }
}

/// Named losses, metrics and tensors produced by a forward pass.
///
/// Lookups of metrics used by the training loop fail instead of defaulting,
/// so a misnamed metric stops training before it corrupts model selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Output {
    values: BTreeMap<String, OutputValue>,
}

impl Output {
    /// Create an empty output.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry.
    pub fn insert(&mut self, key: impl Into<String>, value: OutputValue) {
        self.values.insert(key.into(), value);
    }

    /// Add or replace a scalar.
    pub fn insert_scalar(&mut self, key: impl Into<String>, value: f32) {
        self.insert(key, OutputValue::Scalar(value));
    }

    /// Add or replace a tensor.
    pub fn insert_tensor(&mut self, key: impl Into<String>, value: ArrayD<f32>) {
        self.insert(key, OutputValue::Tensor(value));
    }

    /// Entry under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&OutputValue> {
        self.values.get(key)
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Scalar under `key`.
    ///
    /// # Errors
    ///
    /// - [`TrainError::MissingMetric`] if the key is absent.
    /// - [`TrainError::NonScalarMetric`] if it holds a tensor.
    pub fn scalar(&self, key: &str) -> Result<f32> {
        match self.values.get(key) {
            Some(OutputValue::Scalar(v)) => Ok(*v),
            Some(OutputValue::Tensor(_)) => Err(TrainError::NonScalarMetric(key.to_string())),
            None => Err(TrainError::MissingMetric {
                key: key.to_string(),
                available: self.values.keys().cloned().collect(),
            }),
        }
    }

    /// All scalar entries.
    #[must_use]
    pub fn scalars(&self) -> BTreeMap<String, f32> {
        self.values
            .iter()
            .filter_map(|(k, v)| v.as_scalar().map(|s| (k.clone(), s)))
            .collect()
    }

    /// Copy every entry of `other` into `self`, replacing duplicates.
    pub fn merge(&mut self, other: Output) {
        self.values.extend(other.values);
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Iterate over `(key, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OutputValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the output is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A model the training loop can optimize.
///
/// There is no automatic differentiation here: `backward` computes the
/// gradients of one scalar entry of the last `forward` output and stores
/// them in the parameters.
pub trait Trainable {
    /// Compute losses and metrics for one batch.
    fn forward(&mut self, batch: &Batch) -> Result<Output>;

    /// Accumulate gradients of `output[loss_key]` into the parameters.
    fn backward(&mut self, output: &Output, loss_key: &str) -> Result<()>;

    /// Learnable parameters.
    fn parameters(&self) -> &[Parameter];

    /// Learnable parameters, mutably, for the optimizer and gradient clipping.
    fn parameters_mut(&mut self) -> &mut [Parameter];

    /// Switch between train and eval behaviour.
    fn set_mode(&mut self, mode: Mode);

    /// Enable or disable gradient tracking.
    fn set_grad_enabled(&mut self, _enabled: bool) {}

    /// Whether gradients must stay enabled during evaluation.
    fn grad_inference(&self) -> bool {
        false
    }

    /// Copy of the learnable state.
    fn capture_state(&self) -> ModelSnapshot {
        ModelSnapshot::from_parameters(self.parameters())
    }

    /// Load a state captured by [`capture_state`](Trainable::capture_state).
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::Snapshot`] if an entry is missing or has the wrong shape.
    fn restore_state(&mut self, snapshot: &ModelSnapshot) -> Result<()> {
        for param in self.parameters_mut() {
            let value = snapshot.get(&param.name).ok_or_else(|| {
                TrainError::Snapshot(format!("no entry for parameter '{}'", param.name))
            })?;
            if value.shape() != param.value.shape() {
                return Err(TrainError::Snapshot(format!(
                    "'{}' has shape {:?} in snapshot but {:?} in model",
                    param.name,
                    value.shape(),
                    param.value.shape()
                )));
            }
            param.value.assign(value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn test_scalar_lookup_fails_fast() {
        let mut output = Output::new();
        output.insert_scalar("train_loss", 0.25);
        output.insert_tensor("Yf_pred", arr1(&[1.0f32]).into_dyn());

        assert_eq!(output.scalar("train_loss").unwrap(), 0.25);
        match output.scalar("dev_loss") {
            Err(TrainError::MissingMetric { key, available }) => {
                assert_eq!(key, "dev_loss");
                assert_eq!(available, vec!["Yf_pred", "train_loss"]);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            output.scalar("Yf_pred"),
            Err(TrainError::NonScalarMetric(_))
        ));
        assert_eq!(output.scalars().len(), 1);
    }

    #[test]
    fn test_merge_replaces_duplicates() {
        let mut a = Output::new();
        a.insert_scalar("x", 1.0);
        a.insert_scalar("y", 2.0);
        let mut b = Output::new();
        b.insert_scalar("y", 3.0);

        a.merge(b);
        assert_eq!(a.scalar("y").unwrap(), 3.0);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_accumulate_grad() {
        let mut p = Parameter::new("w", arr2(&[[0.0f32, 0.0]]).into_dyn());
        p.accumulate_grad(arr2(&[[1.0f32, 2.0]]).into_dyn()).unwrap();
        p.accumulate_grad(arr2(&[[1.0f32, 2.0]]).into_dyn()).unwrap();
        assert_eq!(p.grad.as_ref().unwrap()[[0, 1]], 4.0);
        assert!(p.accumulate_grad(arr1(&[1.0f32]).into_dyn()).is_err());

        p.zero_grad();
        assert!(p.grad.is_none());
    }
}
