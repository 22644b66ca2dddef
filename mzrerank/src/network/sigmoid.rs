/// The logistic activation `1 / (1 + e^-x)`, applied element wise
pub(super) fn forward(input: &[f64], output: &mut [f64]) {
    for (y, x) in output.iter_mut().zip(input) {
        *y = 1.0 / (1.0 + (-x).exp());
    }
}

/// The gradient through the activation given its output `y`: `dx = dy * y * (1 - y)`
pub(super) fn backward(output: &[f64], output_gradient: &[f64], input_gradient: &mut [f64]) {
    for ((dx, dy), y) in input_gradient.iter_mut().zip(output_gradient).zip(output) {
        *dx = dy * y * (1.0 - y);
    }
}

#[cfg(test)]
#[expect(clippy::missing_panics_doc)]
mod tests {
    #[test]
    fn values() {
        let mut output = [0.0; 3];
        super::forward(&[0.0, 100.0, -100.0], &mut output);
        assert_eq!(output[0], 0.5);
        assert!((output[1] - 1.0).abs() < 1e-12);
        assert!(output[2].abs() < 1e-12);

        let mut gradient = [0.0; 3];
        super::backward(&output, &[2.0, 1.0, 1.0], &mut gradient);
        assert_eq!(gradient[0], 0.5);
        assert!(gradient[1].abs() < 1e-12);
    }
}
