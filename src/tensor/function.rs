//! Elementwise functions with their derivatives

use serde::{Deserialize, Serialize};

/// Unary function definition: a value rule paired with its derivative rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum UnaryFunction {
    Sqrt,
    Exp,
    Log,
    Abs,
    Square,
    Reciprocal,
    Negate,
    Sigmoid,
    Tanh,
    Relu,
    LeakyRelu { alpha: f64 },
    Softplus,
}

impl UnaryFunction {
    pub fn value(&self, x: f64) -> f64 {
        match *self {
            UnaryFunction::Sqrt => x.sqrt(),
            UnaryFunction::Exp => x.exp(),
            UnaryFunction::Log => x.ln(),
            UnaryFunction::Abs => x.abs(),
            UnaryFunction::Square => x * x,
            UnaryFunction::Reciprocal => 1.0 / x,
            UnaryFunction::Negate => -x,
            UnaryFunction::Sigmoid => sigmoid(x),
            UnaryFunction::Tanh => x.tanh(),
            UnaryFunction::Relu => x.max(0.0),
            UnaryFunction::LeakyRelu { alpha } => {
                if x > 0.0 {
                    x
                } else {
                    alpha * x
                }
            }
            // log(1 + e^x) without overflow for large x
            UnaryFunction::Softplus => x.max(0.0) + (-x.abs()).exp().ln_1p(),
        }
    }

    pub fn derivative(&self, x: f64) -> f64 {
        match *self {
            UnaryFunction::Sqrt => 0.5 / x.sqrt(),
            UnaryFunction::Exp => x.exp(),
            UnaryFunction::Log => 1.0 / x,
            UnaryFunction::Abs => {
                if x == 0.0 {
                    0.0
                } else {
                    x.signum()
                }
            }
            UnaryFunction::Square => 2.0 * x,
            UnaryFunction::Reciprocal => -1.0 / (x * x),
            UnaryFunction::Negate => -1.0,
            UnaryFunction::Sigmoid => {
                let s = sigmoid(x);
                s * (1.0 - s)
            }
            UnaryFunction::Tanh => 1.0 - x.tanh().powi(2),
            UnaryFunction::Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            UnaryFunction::LeakyRelu { alpha } => {
                if x > 0.0 {
                    1.0
                } else {
                    alpha
                }
            }
            UnaryFunction::Softplus => sigmoid(x),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            UnaryFunction::Sqrt => "SQRT",
            UnaryFunction::Exp => "EXP",
            UnaryFunction::Log => "LOG",
            UnaryFunction::Abs => "ABS",
            UnaryFunction::Square => "SQUARE",
            UnaryFunction::Reciprocal => "RECIPROCAL",
            UnaryFunction::Negate => "NEGATE",
            UnaryFunction::Sigmoid => "SIGMOID",
            UnaryFunction::Tanh => "TANH",
            UnaryFunction::Relu => "RELU",
            UnaryFunction::LeakyRelu { .. } => "LEAKY_RELU",
            UnaryFunction::Softplus => "SOFTPLUS",
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verification::numerical_derivative;

    const ALL: [UnaryFunction; 12] = [
        UnaryFunction::Sqrt,
        UnaryFunction::Exp,
        UnaryFunction::Log,
        UnaryFunction::Abs,
        UnaryFunction::Square,
        UnaryFunction::Reciprocal,
        UnaryFunction::Negate,
        UnaryFunction::Sigmoid,
        UnaryFunction::Tanh,
        UnaryFunction::Relu,
        UnaryFunction::LeakyRelu { alpha: 0.1 },
        UnaryFunction::Softplus,
    ];

    #[test]
    fn test_derivatives_match_finite_differences() {
        // Points chosen away from the kinks of abs/relu and inside every domain.
        for function in ALL.iter() {
            for &x in &[0.3, 0.9, 1.7, 2.5] {
                let numerical = numerical_derivative(|v| function.value(v), x, 1e-6);
                let analytical = function.derivative(x);
                assert!(
                    (numerical - analytical).abs() < 1e-5,
                    "{} at {}: analytical {} numerical {}",
                    function.name(),
                    x,
                    analytical,
                    numerical
                );
            }
        }
    }

    #[test]
    fn test_negative_branch_of_piecewise_functions() {
        assert_eq!(UnaryFunction::Relu.value(-2.0), 0.0);
        assert_eq!(UnaryFunction::Relu.derivative(-2.0), 0.0);
        assert_eq!(UnaryFunction::LeakyRelu { alpha: 0.1 }.value(-2.0), -0.2);
        assert_eq!(UnaryFunction::LeakyRelu { alpha: 0.1 }.derivative(-2.0), 0.1);
        assert_eq!(UnaryFunction::Abs.derivative(-3.0), -1.0);
        assert_eq!(UnaryFunction::Abs.derivative(0.0), 0.0);
        assert_eq!(UnaryFunction::Abs.derivative(-0.0), 0.0);
    }

    #[test]
    fn test_softplus_is_stable() {
        assert!((UnaryFunction::Softplus.value(800.0) - 800.0).abs() < 1e-9);
        assert!(UnaryFunction::Softplus.value(-800.0) >= 0.0);
    }
}
