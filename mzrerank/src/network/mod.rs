//! The feed forward scoring network
//!
//! A [`Network`] is either a single linear layer or a linear layer followed by a sigmoid
//! activation and a second linear layer with a single output. The weights live in shared storage,
//! cloning a network gives a new network that scores with the same weights and accumulates into
//! the same gradient buffers while keeping its own activations. This allows scoring many PSMs
//! with separate clones and then back propagating only through the clones that mattered before a
//! single update of the shared weights.

mod linear;
mod sigmoid;

use std::cell::{Ref, RefMut};

use context_error::{BoxedError, Context, CreateError};
use log::warn;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub use linear::LayerParameters;
use linear::Linear;

use crate::error::{RerankError, RerankErrorKind, invalid_input};

/// The shape of a network
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum Topology {
    /// A single linear layer, `num_features → 1`
    Linear,
    /// `num_features → hidden`, sigmoid, `hidden → 1`
    #[default]
    OneHidden,
}

#[derive(Debug)]
enum Layers {
    Linear {
        output: Linear,
    },
    OneHidden {
        hidden: Linear,
        output: Linear,
    },
}

/// A scoring network, see the [module documentation](self) for the sharing semantics.
#[derive(Debug)]
pub struct Network {
    layers: Layers,
    /// The last input
    input: Vec<f64>,
    /// Hidden layer before the activation
    hidden_linear: Vec<f64>,
    /// Hidden layer after the activation
    hidden_activation: Vec<f64>,
    hidden_linear_gradient: Vec<f64>,
    hidden_activation_gradient: Vec<f64>,
    output: f64,
}

impl Network {
    /// Create a new randomly initialised network. For [`Topology::Linear`] the number of hidden
    /// units is ignored. When `has_bias` is false all biases stay zero forever.
    pub fn new(
        num_features: usize,
        num_hidden: usize,
        topology: Topology,
        has_bias: bool,
        rng: &mut impl Rng,
    ) -> Self {
        let layers = match topology {
            Topology::Linear => Layers::Linear {
                output: Linear::new(1, num_features, has_bias, rng),
            },
            Topology::OneHidden => Layers::OneHidden {
                hidden: Linear::new(num_hidden, num_features, has_bias, rng),
                output: Linear::new(1, num_hidden, has_bias, rng),
            },
        };
        Self::with_layers(layers)
    }

    fn with_layers(layers: Layers) -> Self {
        let (features, hidden) = match &layers {
            Layers::Linear { output } => (output.num_features(), 0),
            Layers::OneHidden { hidden, .. } => (hidden.num_features(), hidden.num_neurons()),
        };
        Self {
            layers,
            input: vec![0.0; features],
            hidden_linear: vec![0.0; hidden],
            hidden_activation: vec![0.0; hidden],
            hidden_linear_gradient: vec![0.0; hidden],
            hidden_activation_gradient: vec![0.0; hidden],
            output: 0.0,
        }
    }

    /// The topology of this network
    pub const fn topology(&self) -> Topology {
        match self.layers {
            Layers::Linear { .. } => Topology::Linear,
            Layers::OneHidden { .. } => Topology::OneHidden,
        }
    }

    /// The number of inputs
    pub fn num_features(&self) -> usize {
        self.input.len()
    }

    /// The number of hidden units, zero for a linear network
    pub fn num_hidden(&self) -> usize {
        self.hidden_linear.len()
    }

    /// If the layers use a bias term
    pub fn has_bias(&self) -> bool {
        self.first_layer().parameters().borrow().has_bias()
    }

    /// The number of layers that can be inspected with [`Self::layer`]
    pub const fn num_layers(&self) -> usize {
        match self.layers {
            Layers::Linear { .. } => 1,
            Layers::OneHidden { .. } => 2,
        }
    }

    /// The output of the last call to [`Self::forward`]
    pub const fn output(&self) -> f64 {
        self.output
    }

    /// Score a feature vector. The input and all intermediate values are stored in this instance
    /// for a later call to [`Self::backward`]. The input has to have [`Self::num_features`]
    /// values, use [`Self::try_forward`] for input that is not known to fit.
    pub fn forward(&mut self, input: &[f64]) -> f64 {
        debug_assert_eq!(input.len(), self.input.len());
        self.input.copy_from_slice(input);
        let mut output = [0.0];
        match &self.layers {
            Layers::Linear { output: layer } => layer.forward(&self.input, &mut output),
            Layers::OneHidden {
                hidden,
                output: layer,
            } => {
                hidden.forward(&self.input, &mut self.hidden_linear);
                sigmoid::forward(&self.hidden_linear, &mut self.hidden_activation);
                layer.forward(&self.hidden_activation, &mut output);
            }
        }
        self.output = output[0];
        self.output
    }

    /// Score a feature vector like [`Self::forward`], but check its length first.
    /// # Errors
    /// If the input does not have exactly [`Self::num_features`] values.
    pub fn try_forward(&mut self, input: &[f64]) -> Result<f64, RerankError> {
        if input.len() != self.input.len() {
            return Err(invalid_input(
                "Invalid feature vector",
                format!(
                    "A feature vector of length {} was given to a network with {} inputs",
                    input.len(),
                    self.input.len()
                ),
            ));
        }
        Ok(self.forward(input))
    }

    /// Back propagate the gradient of the loss with respect to the output of the last
    /// [`Self::forward`] call. The gradients are added to the shared gradient buffers, so multiple
    /// calls (on this network or any of its clones) accumulate.
    pub fn backward(&mut self, output_gradient: f64) {
        match &self.layers {
            Layers::Linear { output } => output.backward(&self.input, &[output_gradient], None),
            Layers::OneHidden { hidden, output } => {
                output.backward(
                    &self.hidden_activation,
                    &[output_gradient],
                    Some(&mut self.hidden_activation_gradient),
                );
                sigmoid::backward(
                    &self.hidden_activation,
                    &self.hidden_activation_gradient,
                    &mut self.hidden_linear_gradient,
                );
                hidden.backward(&self.input, &self.hidden_linear_gradient, None);
            }
        }
    }

    /// Zero the shared gradient buffers
    pub fn clear_gradients(&self) {
        for layer in self.linear_layers() {
            layer.clear_gradients();
        }
    }

    /// Apply the accumulated gradients to the shared weights. If the weight decay is positive
    /// `weight_decay * w` is added to the gradient first. The gradients are not cleared.
    pub fn update(&self, learning_rate: f64, weight_decay: f64) {
        for layer in self.linear_layers() {
            layer.update(learning_rate, weight_decay);
        }
    }

    /// Redraw all weights in place, all clones see the new weights.
    pub fn make_random(&self, rng: &mut impl Rng) {
        for layer in self.linear_layers() {
            layer.randomise(rng);
        }
    }

    /// Copy the weights of the other network into this network. When both have the same shape
    /// the values are copied into the current storage (so every clone of this network sees them).
    /// Otherwise this network gets new storage with the shape of the other network and no longer
    /// shares with its former clones.
    pub fn snapshot_copy(&mut self, other: &Self) {
        if !self.same_shape(other) {
            *self = other.deep_copy();
            return;
        }
        match (&mut self.layers, &other.layers) {
            (Layers::Linear { output }, Layers::Linear { output: source }) => {
                output.copy_values_from(source);
            }
            (
                Layers::OneHidden { hidden, output },
                Layers::OneHidden {
                    hidden: source_hidden,
                    output: source_output,
                },
            ) => {
                hidden.copy_values_from(source_hidden);
                output.copy_values_from(source_output);
            }
            _ => *self = other.deep_copy(),
        }
    }

    fn same_shape(&self, other: &Self) -> bool {
        self.topology() == other.topology()
            && self.num_features() == other.num_features()
            && self.num_hidden() == other.num_hidden()
            && self.has_bias() == other.has_bias()
    }

    /// A new network with its own storage holding a copy of the current weights
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        Self::with_layers(match &self.layers {
            Layers::Linear { output } => Layers::Linear {
                output: output.deep_copy(),
            },
            Layers::OneHidden { hidden, output } => Layers::OneHidden {
                hidden: hidden.deep_copy(),
                output: output.deep_copy(),
            },
        })
    }

    /// The number of networks (including this one) that hold the weight storage
    pub fn shared_handles(&self) -> usize {
        self.first_layer().handles()
    }

    /// Check if this network and the other use the same weight storage
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        self.first_layer().shares_storage_with(other.first_layer())
    }

    /// Inspect the parameters of a layer, the first layer has index 1.
    /// # Errors
    /// When the layer does not exist for this topology.
    /// # Panics
    /// If the parameters are currently mutably borrowed through [`Self::layer_mut`] on this network or any of its clones.
    pub fn layer(&self, index: usize) -> Result<Ref<'_, LayerParameters>, RerankError> {
        Ok(self.get_layer(index)?.parameters().borrow())
    }

    /// Change the parameters of a layer, the first layer has index 1. The change is visible to all clones.
    /// # Errors
    /// When the layer does not exist for this topology.
    /// # Panics
    /// If the parameters are currently borrowed through [`Self::layer`] on this network or any of its clones.
    pub fn layer_mut(&self, index: usize) -> Result<RefMut<'_, LayerParameters>, RerankError> {
        Ok(self.get_layer(index)?.parameters().borrow_mut())
    }

    fn get_layer(&self, index: usize) -> Result<&Linear, RerankError> {
        match (&self.layers, index) {
            (Layers::Linear { output }, 1) | (Layers::OneHidden { output, .. }, 2) => Ok(output),
            (Layers::OneHidden { hidden, .. }, 1) => Ok(hidden),
            _ => {
                warn!(
                    "Requested layer {index} of a network with {} layer(s)",
                    self.num_layers()
                );
                Err(BoxedError::new(
                    RerankErrorKind::InvalidLayer,
                    "Invalid layer",
                    format!(
                        "Layer {index} does not exist, this network has layers 1 to {}",
                        self.num_layers()
                    ),
                    Context::none(),
                ))
            }
        }
    }

    const fn first_layer(&self) -> &Linear {
        match &self.layers {
            Layers::Linear { output } => output,
            Layers::OneHidden { hidden, .. } => hidden,
        }
    }

    fn linear_layers(&self) -> impl Iterator<Item = &Linear> {
        let (first, second) = match &self.layers {
            Layers::Linear { output } => (output, None),
            Layers::OneHidden { hidden, output } => (hidden, Some(output)),
        };
        std::iter::once(first).chain(second)
    }
}

impl Clone for Network {
    /// A network that shares the weight and gradient storage with this network, but has its
    /// own activation buffers. Use [`Network::deep_copy`] for an independent copy.
    fn clone(&self) -> Self {
        Self::with_layers(match &self.layers {
            Layers::Linear { output } => Layers::Linear {
                output: output.share(),
            },
            Layers::OneHidden { hidden, output } => Layers::OneHidden {
                hidden: hidden.share(),
                output: output.share(),
            },
        })
    }
}

#[cfg(test)]
#[expect(clippy::missing_panics_doc)]
mod tests {
    use context_error::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    use super::*;

    fn network(topology: Topology) -> Network {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
        Network::new(3, 4, topology, true, &mut rng)
    }

    #[test]
    fn clone_shares_storage() {
        for topology in [Topology::Linear, Topology::OneHidden] {
            let canonical = network(topology);
            let reference = canonical.deep_copy();
            let mut clone = canonical.clone();
            assert_eq!(canonical.shared_handles(), 2);
            assert!(clone.shares_storage_with(&canonical));
            assert!(!reference.shares_storage_with(&canonical));

            let x = [0.3, -1.2, 0.7];
            clone.forward(&x);
            clone.backward(0.5);
            canonical.update(0.1, 0.0);

            let mut reference = reference;
            reference.forward(&x);
            reference.backward(0.5);
            reference.update(0.1, 0.0);

            for layer in 1..=canonical.num_layers() {
                assert_eq!(
                    canonical.layer(layer).unwrap().weights(),
                    reference.layer(layer).unwrap().weights()
                );
                assert_eq!(
                    canonical.layer(layer).unwrap().bias(),
                    reference.layer(layer).unwrap().bias()
                );
            }
            drop(clone);
            assert_eq!(canonical.shared_handles(), 1);
        }
    }

    #[test]
    fn clones_keep_own_activations() {
        let canonical = network(Topology::OneHidden);
        let mut a = canonical.clone();
        let mut b = canonical.clone();
        let score_a = a.forward(&[1.0, 0.0, 0.0]);
        let score_b = b.forward(&[0.0, 0.0, 1.0]);
        assert_eq!(a.output(), score_a);
        assert_eq!(b.output(), score_b);
        assert_ne!(score_a, score_b);
    }

    #[test]
    fn backward_accumulates() {
        let mut once = network(Topology::OneHidden);
        let mut twice = once.deep_copy();
        once.forward(&[1.0, 2.0, 3.0]);
        once.backward(2.0);
        twice.forward(&[1.0, 2.0, 3.0]);
        twice.backward(1.0);
        twice.backward(1.0);
        for layer in 1..=2 {
            let a = once.layer(layer).unwrap();
            let b = twice.layer(layer).unwrap();
            for (a, b) in a.weight_gradients().iter().zip(b.weight_gradients()) {
                assert!((a - b).abs() < 1e-12);
            }
        }
        twice.clear_gradients();
        assert!(twice.layer(1).unwrap().weight_gradients().iter().all(|g| *g == 0.0));
    }

    #[test]
    fn snapshot_copy_into_sharing_group() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        let mut canonical = network(Topology::OneHidden);
        let clone = canonical.clone();
        let other = Network::new(3, 4, Topology::OneHidden, true, &mut rng);
        canonical.snapshot_copy(&other);
        assert!(clone.shares_storage_with(&canonical));
        assert!(!other.shares_storage_with(&canonical));
        assert_eq!(
            clone.layer(1).unwrap().weights(),
            other.layer(1).unwrap().weights()
        );
    }

    #[test]
    fn snapshot_copy_reshapes() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        let mut canonical = network(Topology::Linear);
        let clone = canonical.clone();
        let other = Network::new(5, 2, Topology::OneHidden, false, &mut rng);
        canonical.snapshot_copy(&other);
        assert_eq!(canonical.topology(), Topology::OneHidden);
        assert_eq!(canonical.num_features(), 5);
        assert_eq!(canonical.num_hidden(), 2);
        assert!(!clone.shares_storage_with(&canonical));
        assert!(!other.shares_storage_with(&canonical));

        let mut wider = Network::new(2, 3, Topology::OneHidden, true, &mut rng);
        wider.snapshot_copy(&other);
        assert_eq!(wider.num_features(), 5);
        assert_eq!(wider.num_hidden(), 2);
        assert!(!other.shares_storage_with(&wider));
        assert_eq!(wider.forward(&[1.0; 5]), canonical.forward(&[1.0; 5]));
    }

    #[test]
    fn no_bias_stays_zero() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let mut network = Network::new(3, 2, Topology::OneHidden, false, &mut rng);
        network.forward(&[1.0, 1.0, 1.0]);
        network.backward(1.0);
        network.update(0.1, 0.01);
        assert!(network.layer(1).unwrap().bias().iter().all(|b| *b == 0.0));
        assert!(network.layer(2).unwrap().bias().iter().all(|b| *b == 0.0));
    }

    #[test]
    fn invalid_layer() {
        let linear = network(Topology::Linear);
        assert!(linear.layer(1).is_ok());
        for index in [0, 2, 3] {
            assert!(matches!(
                linear.layer(index).unwrap_err().get_kind(),
                RerankErrorKind::InvalidLayer
            ));
        }
        let hidden = network(Topology::OneHidden);
        assert!(hidden.layer_mut(2).is_ok());
        assert!(hidden.layer(3).is_err());
    }

    #[test]
    fn try_forward_checks_length() {
        let mut network = network(Topology::Linear);
        assert!(network.try_forward(&[0.1, 0.2, 0.3]).is_ok());
        for input in [&[0.1, 0.2][..], &[0.1, 0.2, 0.3, 0.4]] {
            assert!(matches!(
                network.try_forward(input).unwrap_err().get_kind(),
                RerankErrorKind::InvalidInput
            ));
        }
    }
}
