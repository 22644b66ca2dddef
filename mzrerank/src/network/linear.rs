//! Fully connected layer with storage that can be shared between networks

use std::{cell::RefCell, rc::Rc};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// The parameters and accumulated gradients of a single fully connected layer. Weights are stored
/// row major, `num_features` weights per neuron.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerParameters {
    num_neurons: usize,
    num_features: usize,
    has_bias: bool,
    weights: Vec<f64>,
    bias: Vec<f64>,
    weight_gradients: Vec<f64>,
    bias_gradients: Vec<f64>,
}

impl LayerParameters {
    fn new(num_neurons: usize, num_features: usize, has_bias: bool) -> Self {
        Self {
            num_neurons,
            num_features,
            has_bias,
            weights: vec![0.0; num_neurons * num_features],
            bias: vec![0.0; num_neurons],
            weight_gradients: vec![0.0; num_neurons * num_features],
            bias_gradients: vec![0.0; num_neurons],
        }
    }

    /// The number of outputs of this layer
    pub const fn num_neurons(&self) -> usize {
        self.num_neurons
    }

    /// The number of inputs of this layer
    pub const fn num_features(&self) -> usize {
        self.num_features
    }

    /// If this layer uses a bias term
    pub const fn has_bias(&self) -> bool {
        self.has_bias
    }

    /// The weights, `num_features` consecutive weights per neuron
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Mutable access to the weights
    pub fn weights_mut(&mut self) -> &mut [f64] {
        &mut self.weights
    }

    /// The weight of a single connection
    pub fn weight(&self, neuron: usize, feature: usize) -> Option<f64> {
        (neuron < self.num_neurons && feature < self.num_features)
            .then(|| self.weights[neuron * self.num_features + feature])
    }

    /// The bias per neuron, all zero when the layer has no bias
    pub fn bias(&self) -> &[f64] {
        &self.bias
    }

    /// Mutable access to the bias
    pub fn bias_mut(&mut self) -> &mut [f64] {
        &mut self.bias
    }

    /// The accumulated gradients for the weights
    pub fn weight_gradients(&self) -> &[f64] {
        &self.weight_gradients
    }

    /// The accumulated gradients for the bias
    pub fn bias_gradients(&self) -> &[f64] {
        &self.bias_gradients
    }

    fn same_shape(&self, other: &Self) -> bool {
        self.num_neurons == other.num_neurons
            && self.num_features == other.num_features
            && self.has_bias == other.has_bias
    }
}

/// A handle to a set of (possibly shared) layer parameters
#[derive(Debug)]
pub(super) struct Linear {
    parameters: Rc<RefCell<LayerParameters>>,
}

impl Linear {
    pub(super) fn new(
        num_neurons: usize,
        num_features: usize,
        has_bias: bool,
        rng: &mut impl Rng,
    ) -> Self {
        let layer = Self {
            parameters: Rc::new(RefCell::new(LayerParameters::new(
                num_neurons,
                num_features,
                has_bias,
            ))),
        };
        layer.randomise(rng);
        layer
    }

    /// Redraw all weights (and biases if used) uniformly from `(u - 0.5) / (features * neurons)`
    pub(super) fn randomise(&self, rng: &mut impl Rng) {
        let mut parameters = self.parameters.borrow_mut();
        let scale = (parameters.num_features * parameters.num_neurons).max(1) as f64;
        for weight in &mut parameters.weights {
            *weight = (rng.random::<f64>() - 0.5) / scale;
        }
        if parameters.has_bias {
            for bias in &mut parameters.bias {
                *bias = (rng.random::<f64>() - 0.5) / scale;
            }
        }
    }

    /// Another handle to the same storage
    pub(super) fn share(&self) -> Self {
        Self {
            parameters: Rc::clone(&self.parameters),
        }
    }

    /// A handle to a fresh deep copy of the storage
    pub(super) fn deep_copy(&self) -> Self {
        Self {
            parameters: Rc::new(RefCell::new(self.parameters.borrow().clone())),
        }
    }

    pub(super) fn shares_storage_with(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.parameters, &other.parameters)
    }

    pub(super) fn handles(&self) -> usize {
        Rc::strong_count(&self.parameters)
    }

    pub(super) fn parameters(&self) -> &RefCell<LayerParameters> {
        &self.parameters
    }

    pub(super) fn num_neurons(&self) -> usize {
        self.parameters.borrow().num_neurons
    }

    pub(super) fn num_features(&self) -> usize {
        self.parameters.borrow().num_features
    }

    /// Copy the weights and biases of a layer with the same shape into this storage
    pub(super) fn copy_values_from(&self, other: &Self) {
        if self.shares_storage_with(other) {
            return;
        }
        let source = other.parameters.borrow();
        let mut target = self.parameters.borrow_mut();
        debug_assert!(target.same_shape(&source));
        target.weights.copy_from_slice(&source.weights);
        target.bias.copy_from_slice(&source.bias);
    }

    /// `output = W * input + b`
    pub(super) fn forward(&self, input: &[f64], output: &mut [f64]) {
        let parameters = self.parameters.borrow();
        debug_assert_eq!(input.len(), parameters.num_features);
        debug_assert_eq!(output.len(), parameters.num_neurons);
        for (neuron, (out, row)) in output
            .iter_mut()
            .zip(parameters.weights.chunks_exact(parameters.num_features.max(1)))
            .enumerate()
        {
            *out = parameters.bias[neuron] + row.iter().zip(input).map(|(w, x)| w * x).sum::<f64>();
        }
    }

    /// Accumulate the gradients for the given output gradient, and if asked write the gradient
    /// with respect to the input.
    pub(super) fn backward(
        &self,
        input: &[f64],
        output_gradient: &[f64],
        input_gradient: Option<&mut [f64]>,
    ) {
        let mut guard = self.parameters.borrow_mut();
        let parameters = &mut *guard;
        let features = parameters.num_features;
        if let Some(input_gradient) = input_gradient {
            input_gradient.fill(0.0);
            for (row, gradient) in parameters
                .weights
                .chunks_exact(features.max(1))
                .zip(output_gradient)
            {
                for (dx, w) in input_gradient.iter_mut().zip(row) {
                    *dx += w * gradient;
                }
            }
        }
        for (neuron, gradient) in output_gradient.iter().enumerate() {
            for (dw, x) in parameters.weight_gradients[neuron * features..(neuron + 1) * features]
                .iter_mut()
                .zip(input)
            {
                *dw += gradient * x;
            }
            if parameters.has_bias {
                parameters.bias_gradients[neuron] += gradient;
            }
        }
    }

    pub(super) fn clear_gradients(&self) {
        let mut parameters = self.parameters.borrow_mut();
        parameters.weight_gradients.fill(0.0);
        parameters.bias_gradients.fill(0.0);
    }

    /// `dw += weight_decay * w` (only if `weight_decay > 0`) followed by `w -= learning_rate * dw`
    pub(super) fn update(&self, learning_rate: f64, weight_decay: f64) {
        let mut guard = self.parameters.borrow_mut();
        let parameters = &mut *guard;
        if weight_decay > 0.0 {
            for (dw, w) in parameters
                .weight_gradients
                .iter_mut()
                .zip(&parameters.weights)
            {
                *dw += weight_decay * w;
            }
            if parameters.has_bias {
                for (db, b) in parameters.bias_gradients.iter_mut().zip(&parameters.bias) {
                    *db += weight_decay * b;
                }
            }
        }
        for (w, dw) in parameters
            .weights
            .iter_mut()
            .zip(&parameters.weight_gradients)
        {
            *w -= learning_rate * dw;
        }
        if parameters.has_bias {
            for (b, db) in parameters.bias.iter_mut().zip(&parameters.bias_gradients) {
                *b -= learning_rate * db;
            }
        }
    }
}

#[cfg(test)]
#[expect(clippy::missing_panics_doc)]
mod tests {
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    use super::*;

    fn layer(has_bias: bool) -> Linear {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        Linear::new(2, 3, has_bias, &mut rng)
    }

    #[test]
    fn initial_range() {
        let layer = layer(true);
        let parameters = layer.parameters().borrow();
        assert!(
            parameters
                .weights()
                .iter()
                .chain(parameters.bias())
                .all(|w| w.abs() <= 0.5 / 6.0)
        );
    }

    #[test]
    fn forward_backward() {
        let layer = layer(true);
        {
            let mut parameters = layer.parameters().borrow_mut();
            parameters
                .weights_mut()
                .copy_from_slice(&[1.0, 0.0, -1.0, 0.5, 0.5, 0.5]);
            parameters.bias_mut().copy_from_slice(&[0.25, -0.25]);
        }
        let mut output = [0.0; 2];
        layer.forward(&[1.0, 2.0, 3.0], &mut output);
        assert_eq!(output, [-1.75, 2.75]);

        let mut input_gradient = [0.0; 3];
        layer.backward(&[1.0, 2.0, 3.0], &[1.0, 2.0], Some(&mut input_gradient));
        assert_eq!(input_gradient, [2.0, 1.0, 0.0]);
        layer.backward(&[1.0, 2.0, 3.0], &[1.0, 2.0], None);
        let parameters = layer.parameters().borrow();
        assert_eq!(
            parameters.weight_gradients(),
            &[2.0, 4.0, 6.0, 4.0, 8.0, 12.0]
        );
        assert_eq!(parameters.bias_gradients(), &[2.0, 4.0]);
    }

    #[test]
    fn update_with_decay() {
        let layer = layer(false);
        {
            let mut parameters = layer.parameters().borrow_mut();
            parameters.weights_mut().fill(1.0);
        }
        layer.backward(&[1.0, 1.0, 1.0], &[1.0, 0.0], None);
        layer.update(0.5, 0.5);
        let parameters = layer.parameters().borrow();
        // dw = 1 + 0.5 * 1 for the first neuron, 0 + 0.5 * 1 for the second
        assert_eq!(parameters.weights(), &[0.25, 0.25, 0.25, 0.75, 0.75, 0.75]);
        assert_eq!(parameters.bias(), &[0.0, 0.0]);
    }

    #[test]
    fn copy_values() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
        let target = Linear::new(3, 4, true, &mut rng);
        let shared = target.share();
        let source = Linear::new(3, 4, true, &mut rng);
        target.copy_values_from(&source);
        assert!(target.shares_storage_with(&shared));
        assert_eq!(shared.handles(), 2);
        assert_eq!(
            shared.parameters().borrow().weights(),
            source.parameters().borrow().weights()
        );
        let deep = source.deep_copy();
        assert!(!deep.shares_storage_with(&source));
        assert_eq!(deep.parameters().borrow().bias(), source.parameters().borrow().bias());
    }
}
