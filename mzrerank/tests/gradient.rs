#![allow(clippy::missing_panics_doc)]
//! Finite difference checks of the analytic gradients of both network topologies
use mzrerank::{Network, Topology};
use proptest::prelude::*;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

const EPSILON: f64 = 1e-6;

/// Overwrite a single weight or bias, returns the old value
fn set_parameter(network: &Network, layer: usize, bias: bool, index: usize, value: f64) -> f64 {
    let mut parameters = network.layer_mut(layer).unwrap();
    let slot = if bias {
        &mut parameters.bias_mut()[index]
    } else {
        &mut parameters.weights_mut()[index]
    };
    std::mem::replace(slot, value)
}

fn numeric_derivative(
    network: &mut Network,
    input: &[f64],
    layer: usize,
    bias: bool,
    index: usize,
) -> f64 {
    let original = set_parameter(network, layer, bias, index, 0.0);
    set_parameter(network, layer, bias, index, original + EPSILON);
    let up = network.forward(input);
    set_parameter(network, layer, bias, index, original - EPSILON);
    let down = network.forward(input);
    set_parameter(network, layer, bias, index, original);
    (up - down) / (2.0 * EPSILON)
}

fn check(topology: Topology, seed: u64, input: &[f64]) -> Result<(), TestCaseError> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut network = Network::new(input.len(), 3, topology, true, &mut rng);
    // The initial weights are tiny, which would leave the sigmoid in its linear range
    for layer in 1..=network.num_layers() {
        let mut parameters = network.layer_mut(layer).unwrap();
        parameters.weights_mut().iter_mut().for_each(|w| *w *= 50.0);
        parameters.bias_mut().iter_mut().for_each(|b| *b *= 50.0);
    }
    network.clear_gradients();
    network.forward(input);
    network.backward(1.0);

    for layer in 1..=network.num_layers() {
        let (weights, biases) = {
            let parameters = network.layer(layer).unwrap();
            (
                parameters.weight_gradients().to_vec(),
                parameters.bias_gradients().to_vec(),
            )
        };
        for (bias, analytic) in [(false, weights), (true, biases)] {
            for (index, expected) in analytic.into_iter().enumerate() {
                let numeric = numeric_derivative(&mut network, input, layer, bias, index);
                prop_assert!(
                    (numeric - expected).abs() <= 1e-5 * (1.0 + expected.abs()),
                    "layer {layer} {} {index}: analytic {expected} numeric {numeric}",
                    if bias { "bias" } else { "weight" }
                );
            }
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]

    #[test]
    fn linear_gradients(seed in any::<u64>(), input in prop::collection::vec(-2.0..2.0_f64, 1..6)) {
        check(Topology::Linear, seed, &input)?;
    }

    #[test]
    fn hidden_gradients(seed in any::<u64>(), input in prop::collection::vec(-2.0..2.0_f64, 1..6)) {
        check(Topology::OneHidden, seed, &input)?;
    }
}
