//! Gradient verification by central finite differences

use tracing::{debug, warn};

use crate::{
    autograd::Procedure,
    config::GradientCheckConfig,
    error::{AutotraceError, AutotraceResult},
    tensor::{Sequence, Tensor},
};

/// Central difference `(f(x + ε) − f(x − ε)) / 2ε`
pub fn numerical_derivative<F>(f: F, x: f64, epsilon: f64) -> f64
where
    F: Fn(f64) -> f64,
{
    (f(x + epsilon) - f(x - epsilon)) / (2.0 * epsilon)
}

/// One input cell whose analytical and numerical gradients disagree
#[derive(Debug, Clone, PartialEq)]
pub struct GradientMismatch {
    pub input: usize,
    pub index: usize,
    pub cell: (usize, usize, usize),
    pub analytical: f64,
    pub numerical: f64,
}

impl GradientMismatch {
    pub fn error(&self) -> f64 {
        (self.analytical - self.numerical).abs()
    }
}

/// Gradient check result
#[derive(Debug, Clone)]
pub struct GradientReport {
    pub passed: bool,
    pub max_error: f64,
    pub checked: usize,
    pub mismatches: Vec<GradientMismatch>,
}

/// Compares a procedure's backward pass with finite differences of its forward pass.
///
/// The checked scalar is the sum of every output cell, so the analytical side
/// is the backward pass seeded with ones. Procedures that draw random masks
/// (dropout) are not deterministic between forward calls and cannot be checked.
pub struct GradientChecker {
    epsilon: f64,
    tolerance: f64,
}

impl GradientChecker {
    pub fn new(config: &GradientCheckConfig) -> Self {
        Self {
            epsilon: config.epsilon,
            tolerance: config.tolerance,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    fn output_sum(procedure: &mut Procedure, inputs: &[Sequence]) -> AutotraceResult<f64> {
        let output = procedure.forward(inputs)?;
        Ok(output.iter().map(|(_, tensor)| tensor.data().iter().sum::<f64>()).sum())
    }

    pub fn check(&self, procedure: &mut Procedure, inputs: &[Sequence]) -> AutotraceResult<GradientReport> {
        let output = procedure.forward(inputs)?;
        let seed: Sequence = output
            .iter()
            .map(|(index, tensor)| (index, Tensor::ones(tensor.shape())))
            .collect();
        let analytical = procedure.backward(&seed)?;

        let mut report = GradientReport {
            passed: true,
            max_error: 0.0,
            checked: 0,
            mismatches: Vec::new(),
        };

        for (input, sequence) in inputs.iter().enumerate() {
            let gradients = analytical
                .get(input)
                .ok_or_else(|| AutotraceError::undefined_reference("Input gradient", input))?;
            for (index, tensor) in sequence.iter() {
                let gradient = gradients
                    .get(index)
                    .ok_or_else(|| AutotraceError::undefined_reference("Input gradient", index))?;
                let shape = tensor.shape();
                for depth in 0..shape.depth {
                    for row in 0..shape.rows {
                        for column in 0..shape.columns {
                            let numerical = self.probe(procedure, inputs, input, index, (row, column, depth))?;
                            let mismatch = GradientMismatch {
                                input,
                                index,
                                cell: (row, column, depth),
                                analytical: gradient.value(row, column, depth),
                                numerical,
                            };
                            report.checked += 1;
                            report.max_error = report.max_error.max(mismatch.error());
                            if mismatch.error() > self.tolerance {
                                warn!(
                                    "Gradient mismatch at input {} index {} cell {:?}: analytical {} numerical {}",
                                    input, index, mismatch.cell, mismatch.analytical, mismatch.numerical
                                );
                                report.mismatches.push(mismatch);
                            }
                        }
                    }
                }
            }
        }

        report.passed = report.mismatches.is_empty();
        debug!(
            "Gradient check over {} cells: max error {:e}",
            report.checked, report.max_error
        );
        Ok(report)
    }

    fn probe(
        &self,
        procedure: &mut Procedure,
        inputs: &[Sequence],
        input: usize,
        index: usize,
        (row, column, depth): (usize, usize, usize),
    ) -> AutotraceResult<f64> {
        let original = inputs[input]
            .get(index)
            .ok_or_else(|| AutotraceError::undefined_reference("Input value", index))?;
        let mut perturbed = inputs.to_vec();

        let mut shifted = original.clone();
        let x = original.value(row, column, depth);
        shifted.set_value(row, column, depth, x + self.epsilon);
        perturbed[input].insert(index, shifted.clone());
        let plus = Self::output_sum(procedure, &perturbed)?;

        shifted.set_value(row, column, depth, x - self.epsilon);
        perturbed[input].insert(index, shifted);
        let minus = Self::output_sum(procedure, &perturbed)?;

        Ok((plus - minus) / (2.0 * self.epsilon))
    }
}

impl Default for GradientChecker {
    fn default() -> Self {
        Self::new(&GradientCheckConfig::default())
    }
}
