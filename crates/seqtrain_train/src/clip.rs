//! Gradient norm clipping.

use crate::trainable::Parameter;

/// Rescale all gradients so their global L2 norm does not exceed `max_norm`.
///
/// Gradients are multiplied by `max_norm / (norm + 1e-6)` when that factor
/// is below one. Parameters without a gradient are ignored. Returns the norm
/// measured before clipping.
pub fn clip_grad_norm(params: &mut [Parameter], max_norm: f32) -> f32 {
    let total = params
        .iter()
        .filter_map(|p| p.grad.as_ref())
        .flat_map(|g| g.iter())
        .map(|&g| g * g)
        .sum::<f32>()
        .sqrt();

    let coef = max_norm / (total + 1e-6);
    if coef < 1.0 {
        for grad in params.iter_mut().filter_map(|p| p.grad.as_mut()) {
            grad.mapv_inplace(|g| g * coef);
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn with_grad(name: &str, grad: &[f32]) -> Parameter {
        let mut p = Parameter::new(name, arr1(grad).into_dyn());
        p.grad = Some(arr1(grad).into_dyn());
        p
    }

    #[test]
    fn test_clip_scales_to_ceiling() {
        let mut params = vec![with_grad("a", &[3.0]), with_grad("b", &[4.0])];
        let norm = clip_grad_norm(&mut params, 1.0);
        assert!((norm - 5.0).abs() < 1e-6);

        let clipped: f32 = params
            .iter()
            .map(|p| p.grad.as_ref().unwrap()[[0]].powi(2))
            .sum::<f32>()
            .sqrt();
        assert!((clipped - 1.0).abs() < 1e-4);
        assert!((params[0].grad.as_ref().unwrap()[[0]] - 0.6).abs() < 1e-4);
    }

    #[test]
    fn test_small_gradients_untouched() {
        let mut params = vec![with_grad("a", &[0.1, 0.2])];
        clip_grad_norm(&mut params, 100.0);
        assert_eq!(params[0].grad.as_ref().unwrap()[[1]], 0.2);
    }

    #[test]
    fn test_missing_gradients_ignored() {
        let mut params = vec![Parameter::new("a", arr1(&[1.0f32]).into_dyn())];
        assert_eq!(clip_grad_norm(&mut params, 1.0), 0.0);
        assert!(params[0].grad.is_none());
    }
}
