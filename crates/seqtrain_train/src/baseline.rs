//! A linear one-step predictor with analytic gradients.

use std::collections::BTreeMap;

use ndarray::{Array2, Axis, Ix1, Ix2};
use rand::Rng;
use seqtrain_core::{Seed, Split};
use seqtrain_data::{Batch, SequenceDataset, SignalKey, View};

use crate::error::{Result, TrainError};
use crate::trainable::{Mode, Output, Parameter, Trainable};

/// Values from the last train-mode forward pass needed by `backward`.
#[derive(Debug, Clone)]
struct Cache {
    loss_key: String,
    inputs: Vec<Array2<f32>>,
    grad: Array2<f32>,
}

/// Predicts a future signal from past signals with one affine map per step.
///
/// Every time step of every window is treated independently:
/// `pred = sum_k x_k · W_k + b`, where `x_k` runs over the input keys. The
/// loss is the mean squared error against the target and is reported as
/// `{split}_loss`; the prediction is reported as `{target}_pred`.
///
/// # Example
///
/// ```rust
/// use ndarray::Array2;
/// use seqtrain_core::Seed;
/// use seqtrain_data::SequenceDataset;
/// use seqtrain_train::{LinearPredictor, Trainable};
///
/// let ds = SequenceDataset::builder()
///     .horizon(2)
///     .sequence("Y", Array2::from_shape_fn((20, 2), |(t, j)| (t + j) as f32))
///     .sequence("U", Array2::zeros((20, 1)))
///     .build()
///     .unwrap();
/// let model = LinearPredictor::for_dataset(&ds, Seed::new(0)).unwrap();
/// let names: Vec<_> = model.parameters().iter().map(|p| p.name.as_str()).collect();
/// assert_eq!(names, ["weight.Up", "weight.Yp", "bias"]);
/// ```
#[derive(Debug, Clone)]
pub struct LinearPredictor {
    inputs: Vec<SignalKey>,
    target: SignalKey,
    params: Vec<Parameter>,
    mode: Mode,
    cache: Option<Cache>,
}

impl LinearPredictor {
    /// Create a predictor with uniformly initialized weights and zero bias.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::Configuration`] if there are no inputs or a key
    /// is missing from `dims`.
    pub fn new(
        dims: &BTreeMap<String, usize>,
        inputs: Vec<SignalKey>,
        target: SignalKey,
        seed: Seed,
    ) -> Result<Self> {
        if inputs.is_empty() {
            return Err(TrainError::Configuration(
                "linear predictor needs at least one input".to_string(),
            ));
        }
        let dim = |key: &SignalKey| {
            dims.get(&key.to_string()).copied().ok_or_else(|| {
                TrainError::Configuration(format!("no feature count for signal {key}"))
            })
        };
        let n_out = dim(&target)?;

        let mut rng = seed.to_rng();
        let mut params = Vec::with_capacity(inputs.len() + 1);
        for key in &inputs {
            let n_in = dim(key)?;
            let bound = 1.0 / (n_in as f32).sqrt();
            let weight = Array2::from_shape_fn((n_in, n_out), |_| rng.gen_range(-bound..bound));
            params.push(Parameter::new(format!("weight.{key}"), weight.into_dyn()));
        }
        params.push(Parameter::new("bias", ndarray::Array1::<f32>::zeros(n_out).into_dyn()));

        Ok(Self {
            inputs,
            target,
            params,
            mode: Mode::Train,
            cache: None,
        })
    }

    /// Predict the future view of the primary signal from every past view.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn for_dataset(dataset: &SequenceDataset, seed: Seed) -> Result<Self> {
        let inputs: Vec<SignalKey> = dataset
            .nstep(Split::Train)
            .keys()
            .filter(|k| k.view() == View::Past)
            .cloned()
            .collect();
        let target = SignalKey::future(dataset.primary_key());
        Self::new(&dataset.dims(), inputs, target, seed)
    }

    /// Input keys, in parameter order.
    pub fn inputs(&self) -> &[SignalKey] {
        &self.inputs
    }

    /// Predicted key.
    pub fn target(&self) -> &SignalKey {
        &self.target
    }
}

fn shape_error(e: ndarray::ShapeError) -> TrainError {
    TrainError::ForwardError(e.to_string())
}

impl Trainable for LinearPredictor {
    fn forward(&mut self, batch: &Batch) -> Result<Output> {
        let target = batch.get(&self.target)?;
        let (steps, windows, n_out) = target.dim();
        let rows = steps * windows;

        let mut pred = Array2::<f32>::zeros((rows, n_out));
        let mut flat_inputs = Vec::with_capacity(self.inputs.len());
        for (key, weight) in self.inputs.iter().zip(&self.params) {
            let x = batch.get(key)?;
            let x = x.to_shape((rows, x.dim().2)).map_err(shape_error)?.to_owned();
            let w = weight.value.view().into_dimensionality::<Ix2>().map_err(shape_error)?;
            pred += &x.dot(&w);
            flat_inputs.push(x);
        }
        let bias = self.params[self.inputs.len()]
            .value
            .view()
            .into_dimensionality::<Ix1>()
            .map_err(shape_error)?;
        pred += &bias;

        let y = target.to_shape((rows, n_out)).map_err(shape_error)?;
        let diff = &pred - &y;
        let loss = diff.mapv(|d| d * d).mean().unwrap_or(0.0);
        let loss_key = format!("{}_loss", batch.split());

        if self.mode == Mode::Train {
            let scale = 2.0 / diff.len().max(1) as f32;
            self.cache = Some(Cache {
                loss_key: loss_key.clone(),
                inputs: flat_inputs,
                grad: diff * scale,
            });
        }

        let mut output = Output::new();
        output.insert_scalar(loss_key, loss);
        output.insert_tensor(
            format!("{}_pred", self.target),
            pred.into_shape_with_order((steps, windows, n_out))
                .map_err(shape_error)?
                .into_dyn(),
        );
        Ok(output)
    }

    fn backward(&mut self, _output: &Output, loss_key: &str) -> Result<()> {
        let cache = self.cache.take().ok_or_else(|| {
            TrainError::BackwardError("no train-mode forward pass to differentiate".to_string())
        })?;
        if cache.loss_key != loss_key {
            return Err(TrainError::BackwardError(format!(
                "last forward produced '{}', cannot differentiate '{loss_key}'",
                cache.loss_key
            )));
        }
        let n_inputs = self.inputs.len();
        for (x, param) in cache.inputs.iter().zip(&mut self.params[..n_inputs]) {
            param.accumulate_grad(x.t().dot(&cache.grad).into_dyn())?;
        }
        self.params[n_inputs].accumulate_grad(cache.grad.sum_axis(Axis(0)).into_dyn())
    }

    fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut [Parameter] {
        &mut self.params
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        if mode == Mode::Eval {
            self.cache = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use seqtrain_data::BundleName;

    fn batch(split: Split) -> Batch {
        let xp = Array3::from_shape_fn((2, 3, 2), |(t, w, j)| (t + 2 * w + j) as f32 * 0.1);
        let yf = Array3::from_shape_fn((2, 3, 1), |(t, w, _)| (t * w) as f32 * 0.2 - 0.3);
        let tensors = BTreeMap::from([(SignalKey::past("Y"), xp), (SignalKey::future("Y"), yf)]);
        Batch::new(BundleName::nstep(split), 0, 0, tensors)
    }

    fn model() -> LinearPredictor {
        let dims = BTreeMap::from([("Yp".to_string(), 2), ("Yf".to_string(), 1)]);
        LinearPredictor::new(&dims, vec![SignalKey::past("Y")], SignalKey::future("Y"), Seed::new(3))
            .unwrap()
    }

    fn loss(model: &mut LinearPredictor) -> f32 {
        model.forward(&batch(Split::Train)).unwrap().scalar("train_loss").unwrap()
    }

    #[test]
    fn test_output_keys_follow_split() {
        let mut m = model();
        m.set_mode(Mode::Eval);
        let output = m.forward(&batch(Split::Dev)).unwrap();
        assert!(output.contains("dev_loss"));
        match output.get("Yf_pred") {
            Some(crate::trainable::OutputValue::Tensor(t)) => assert_eq!(t.shape(), &[2, 3, 1]),
            other => panic!("unexpected {other:?}"),
        }
        // Eval mode keeps nothing to differentiate.
        assert!(m.backward(&output, "dev_loss").is_err());
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let mut m = model();
        let output = m.forward(&batch(Split::Train)).unwrap();
        m.backward(&output, "train_loss").unwrap();
        let analytic_w = m.params[0].grad.as_ref().unwrap()[[1, 0]];
        let analytic_b = m.params[1].grad.as_ref().unwrap()[[0]];

        let eps = 1e-2;
        let numeric = |m: &mut LinearPredictor, idx: usize, at: &[usize]| {
            let mut plus = m.clone();
            plus.params[idx].value[at] += eps;
            let mut minus = m.clone();
            minus.params[idx].value[at] -= eps;
            (loss(&mut plus) - loss(&mut minus)) / (2.0 * eps)
        };
        let numeric_w = numeric(&mut m, 0, &[1, 0]);
        let numeric_b = numeric(&mut m, 1, &[0]);

        assert!((analytic_w - numeric_w).abs() < 1e-3, "{analytic_w} vs {numeric_w}");
        assert!((analytic_b - numeric_b).abs() < 1e-3, "{analytic_b} vs {numeric_b}");
    }

    #[test]
    fn test_backward_checks_loss_key() {
        let mut m = model();
        let output = m.forward(&batch(Split::Train)).unwrap();
        assert!(matches!(
            m.backward(&output, "dev_loss"),
            Err(TrainError::BackwardError(_))
        ));
    }

    #[test]
    fn test_missing_dims_rejected() {
        let dims = BTreeMap::from([("Yf".to_string(), 1)]);
        let result =
            LinearPredictor::new(&dims, vec![SignalKey::past("U")], SignalKey::future("Y"), Seed::new(0));
        assert!(matches!(result, Err(TrainError::Configuration(_))));
    }
}
