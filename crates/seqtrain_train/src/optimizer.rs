//! Optimizer capability and a plain gradient-descent implementation.

use std::collections::HashMap;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};
use crate::trainable::Parameter;

/// Updates parameters from their gradients.
///
/// The optimizer does not own the parameters; the trainer lends them for
/// every call, so the model stays the single owner of its state.
pub trait Optimizer {
    /// Clear accumulated gradients.
    fn zero_grad(&mut self, params: &mut [Parameter]) {
        for p in params {
            p.zero_grad();
        }
    }

    /// Apply one update.
    fn step(&mut self, params: &mut [Parameter]) -> Result<()>;

    /// Current learning rate.
    fn learning_rate(&self) -> f64;

    /// Change the learning rate, e.g. from a scheduler.
    fn set_learning_rate(&mut self, lr: f64);
}

/// SGD configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SgdConfig {
    /// Learning rate.
    pub lr: f64,
    /// Momentum factor (0 disables momentum).
    pub momentum: f64,
    /// L2 penalty added to the gradient.
    pub weight_decay: f64,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self {
            lr: 1e-2,
            momentum: 0.0,
            weight_decay: 0.0,
        }
    }
}

impl SgdConfig {
    /// Create a configuration with the given learning rate.
    pub fn new(lr: f64) -> Self {
        Self {
            lr,
            ..Default::default()
        }
    }

    /// Set momentum.
    #[must_use]
    pub fn with_momentum(mut self, momentum: f64) -> Self {
        self.momentum = momentum;
        self
    }

    /// Set weight decay.
    #[must_use]
    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }
}

/// Stochastic gradient descent with optional momentum.
#[derive(Debug, Clone)]
pub struct Sgd {
    config: SgdConfig,
    velocity: HashMap<String, ArrayD<f32>>,
}

impl Sgd {
    /// Create an optimizer from a configuration.
    pub fn new(config: SgdConfig) -> Self {
        Self {
            config,
            velocity: HashMap::new(),
        }
    }

    /// Create an optimizer with only a learning rate.
    pub fn with_lr(lr: f64) -> Self {
        Self::new(SgdConfig::new(lr))
    }

    /// The configuration, reflecting any learning-rate change.
    pub fn config(&self) -> &SgdConfig {
        &self.config
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut [Parameter]) -> Result<()> {
        if !self.config.lr.is_finite() || self.config.lr < 0.0 {
            return Err(TrainError::OptimizerError(format!(
                "invalid learning rate {}",
                self.config.lr
            )));
        }
        let lr = self.config.lr as f32;
        let momentum = self.config.momentum as f32;
        let weight_decay = self.config.weight_decay as f32;

        for p in params.iter_mut() {
            let Some(grad) = p.grad.as_ref() else {
                continue;
            };
            let mut update = grad.clone();
            if weight_decay != 0.0 {
                update.scaled_add(weight_decay, &p.value);
            }
            if momentum != 0.0 {
                let v = self
                    .velocity
                    .entry(p.name.clone())
                    .or_insert_with(|| ArrayD::zeros(update.raw_dim()));
                *v *= momentum;
                *v += &update;
                update.assign(v);
            }
            p.value.scaled_add(-lr, &update);
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.config.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.config.lr = lr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn param(value: f32, grad: f32) -> Parameter {
        let mut p = Parameter::new("w", arr1(&[value]).into_dyn());
        p.grad = Some(arr1(&[grad]).into_dyn());
        p
    }

    #[test]
    fn test_sgd_step() {
        let mut params = vec![param(1.0, 0.5)];
        let mut opt = Sgd::with_lr(0.1);
        opt.step(&mut params).unwrap();
        assert!((params[0].value[[0]] - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_sgd_momentum_accumulates() {
        let mut params = vec![param(0.0, 1.0)];
        let mut opt = Sgd::new(SgdConfig::new(1.0).with_momentum(0.5));
        opt.step(&mut params).unwrap();
        opt.step(&mut params).unwrap();
        // Updates of 1.0 then 1.5.
        assert!((params[0].value[[0]] + 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_weight_decay_shrinks_weights() {
        let mut params = vec![param(2.0, 0.0)];
        let mut opt = Sgd::new(SgdConfig::new(0.1).with_weight_decay(0.5));
        opt.step(&mut params).unwrap();
        // 2.0 - 0.1 * (0.0 + 0.5 * 2.0)
        assert!((params[0].value[[0]] - 1.9).abs() < 1e-6);
    }

    #[test]
    fn test_zero_grad_and_skip() {
        let mut params = vec![param(1.0, 1.0)];
        let mut opt = Sgd::with_lr(0.1);
        opt.zero_grad(&mut params);
        opt.step(&mut params).unwrap();
        assert_eq!(params[0].value[[0]], 1.0);
    }

    #[test]
    fn test_set_learning_rate() {
        let mut opt = Sgd::with_lr(0.1);
        opt.set_learning_rate(0.05);
        assert_eq!(opt.learning_rate(), 0.05);

        opt.set_learning_rate(f64::NAN);
        assert!(opt.step(&mut []).is_err());
    }
}
