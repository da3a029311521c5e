//! Reductions and statistics
//!
//! Sum, mean and standard deviation reduce each tensor to a 1×1×1 result in
//! [`Scope::PerIndex`], or reduce elementwise across every sequence position
//! into a single tensor in [`Scope::Sequence`].

use std::collections::BTreeMap;

use super::{
    argument, backward_each, deposit, forward_each, result_gradient, EvaluationContext, Expression, Operands, Scope,
};
use crate::autograd::node::NodeArena;
use crate::error::{AutotraceError, AutotraceResult};
use crate::tensor::Tensor;

#[derive(Debug, Clone)]
pub struct SumExpression {
    operands: Operands,
    scope: Scope,
}

impl SumExpression {
    pub fn new(operands: Operands, scope: Scope) -> Self {
        Self { operands, scope }
    }
}

impl Expression for SumExpression {
    fn operands(&self) -> &Operands {
        &self.operands
    }

    fn name(&self) -> &'static str {
        match self.scope {
            Scope::PerIndex => "SUM",
            Scope::Sequence => "SEQUENCE_SUM",
        }
    }

    fn scope(&self) -> Scope {
        self.scope
    }

    fn calculate_expression(&mut self, nodes: &mut NodeArena, context: &mut EvaluationContext) -> AutotraceResult<()> {
        match self.scope {
            Scope::PerIndex => forward_each(self, nodes, context),
            Scope::Sequence => {
                let value = nodes[self.operands.first].values().sum()?;
                nodes[self.operands.result].set_value(value);
                Ok(())
            }
        }
    }

    fn calculate_expression_at(
        &mut self,
        nodes: &mut NodeArena,
        index: usize,
        _context: &mut EvaluationContext,
    ) -> AutotraceResult<()> {
        let value = nodes[self.operands.first].matrix(index)?.sum_as_matrix();
        nodes[self.operands.result].set_matrix(index, value);
        Ok(())
    }

    fn calculate_gradient(&mut self, nodes: &mut NodeArena) -> AutotraceResult<()> {
        match self.scope {
            Scope::PerIndex => backward_each(self, nodes),
            Scope::Sequence => {
                let gradient = result_gradient(nodes, self.operands.result, 0)?;
                for index in nodes[self.operands.first].key_set() {
                    deposit(nodes, self.operands.first, index, &gradient)?;
                }
                Ok(())
            }
        }
    }

    fn calculate_gradient_at(&mut self, nodes: &mut NodeArena, index: usize) -> AutotraceResult<()> {
        let gradient = result_gradient(nodes, self.operands.result, index)?.scalar_value();
        let input_gradient = nodes[self.operands.first].matrix(index)?.map(|_| gradient);
        deposit(nodes, self.operands.first, index, &input_gradient)
    }
}

#[derive(Debug, Clone)]
pub struct MeanExpression {
    operands: Operands,
    scope: Scope,
}

impl MeanExpression {
    pub fn new(operands: Operands, scope: Scope) -> Self {
        Self { operands, scope }
    }
}

impl Expression for MeanExpression {
    fn operands(&self) -> &Operands {
        &self.operands
    }

    fn name(&self) -> &'static str {
        match self.scope {
            Scope::PerIndex => "MEAN",
            Scope::Sequence => "SEQUENCE_MEAN",
        }
    }

    fn scope(&self) -> Scope {
        self.scope
    }

    fn calculate_expression(&mut self, nodes: &mut NodeArena, context: &mut EvaluationContext) -> AutotraceResult<()> {
        match self.scope {
            Scope::PerIndex => forward_each(self, nodes, context),
            Scope::Sequence => {
                let value = nodes[self.operands.first].values().mean()?;
                nodes[self.operands.result].set_value(value);
                Ok(())
            }
        }
    }

    fn calculate_expression_at(
        &mut self,
        nodes: &mut NodeArena,
        index: usize,
        _context: &mut EvaluationContext,
    ) -> AutotraceResult<()> {
        let value = nodes[self.operands.first].matrix(index)?.mean_as_matrix();
        nodes[self.operands.result].set_matrix(index, value);
        Ok(())
    }

    fn calculate_gradient(&mut self, nodes: &mut NodeArena) -> AutotraceResult<()> {
        match self.scope {
            Scope::PerIndex => backward_each(self, nodes),
            Scope::Sequence => {
                let keys = nodes[self.operands.first].key_set();
                let gradient = result_gradient(nodes, self.operands.result, 0)?.multiply_scalar(1.0 / keys.len() as f64);
                for index in keys {
                    deposit(nodes, self.operands.first, index, &gradient)?;
                }
                Ok(())
            }
        }
    }

    fn calculate_gradient_at(&mut self, nodes: &mut NodeArena, index: usize) -> AutotraceResult<()> {
        let gradient = result_gradient(nodes, self.operands.result, index)?.scalar_value();
        let input = nodes[self.operands.first].matrix(index)?;
        let share = gradient / input.size() as f64;
        let input_gradient = input.map(|_| share);
        deposit(nodes, self.operands.first, index, &input_gradient)
    }
}

/// Sample standard deviation (n − 1 denominator).
///
/// The mean computed by each forward pass is cached for the matching
/// backward pass, which applies `(x − mean) · 2/(n − 1)` through the
/// derivative of the square root at the variance.
#[derive(Debug, Clone)]
pub struct StandardDeviationExpression {
    operands: Operands,
    scope: Scope,
    means: BTreeMap<usize, f64>,
    sequence_mean: Option<Tensor>,
}

impl StandardDeviationExpression {
    pub fn new(operands: Operands, scope: Scope) -> Self {
        Self {
            operands,
            scope,
            means: BTreeMap::new(),
            sequence_mean: None,
        }
    }
}

/// `1 / (2·sqrt(variance))` written in terms of the deviation; zero where the deviation vanishes.
fn sqrt_derivative(deviation: f64) -> f64 {
    if deviation > 0.0 {
        0.5 / deviation
    } else {
        0.0
    }
}

impl Expression for StandardDeviationExpression {
    fn operands(&self) -> &Operands {
        &self.operands
    }

    fn name(&self) -> &'static str {
        match self.scope {
            Scope::PerIndex => "STANDARD_DEVIATION",
            Scope::Sequence => "SEQUENCE_STANDARD_DEVIATION",
        }
    }

    fn scope(&self) -> Scope {
        self.scope
    }

    fn calculate_expression(&mut self, nodes: &mut NodeArena, context: &mut EvaluationContext) -> AutotraceResult<()> {
        match self.scope {
            Scope::PerIndex => forward_each(self, nodes, context),
            Scope::Sequence => {
                let values = nodes[self.operands.first].values();
                let mean = values.mean()?;
                let value = values.standard_deviation(&mean)?;
                self.sequence_mean = Some(mean);
                nodes[self.operands.result].set_value(value);
                Ok(())
            }
        }
    }

    fn calculate_expression_at(
        &mut self,
        nodes: &mut NodeArena,
        index: usize,
        _context: &mut EvaluationContext,
    ) -> AutotraceResult<()> {
        let input = nodes[self.operands.first].matrix(index)?;
        let mean = input.mean();
        let value = input.standard_deviation_as_matrix(mean);
        self.means.insert(index, mean);
        nodes[self.operands.result].set_matrix(index, value);
        Ok(())
    }

    fn calculate_gradient(&mut self, nodes: &mut NodeArena) -> AutotraceResult<()> {
        match self.scope {
            Scope::PerIndex => backward_each(self, nodes),
            Scope::Sequence => {
                let mean = self
                    .sequence_mean
                    .as_ref()
                    .ok_or_else(|| AutotraceError::undefined_reference("Sequence mean", 0))?;
                let gradient = result_gradient(nodes, self.operands.result, 0)?;
                let deviation = argument(nodes, self.operands.result, 0)?;
                let keys = nodes[self.operands.first].key_set();
                let n = keys.len();
                let factor = if n < 2 { 0.0 } else { 2.0 / (n - 1) as f64 };
                let scale = gradient
                    .multiply(&deviation.map(sqrt_derivative))?
                    .multiply_scalar(factor);
                for index in keys {
                    let centered = nodes[self.operands.first].matrix(index)?.subtract(mean)?;
                    deposit(nodes, self.operands.first, index, &centered.multiply(&scale)?)?;
                }
                Ok(())
            }
        }
    }

    fn calculate_gradient_at(&mut self, nodes: &mut NodeArena, index: usize) -> AutotraceResult<()> {
        let mean = *self
            .means
            .get(&index)
            .ok_or_else(|| AutotraceError::undefined_reference("Standard deviation mean", index))?;
        let gradient = result_gradient(nodes, self.operands.result, index)?.scalar_value();
        let deviation = nodes[self.operands.result].matrix(index)?.scalar_value();
        let input = nodes[self.operands.first].matrix(index)?;
        let n = input.size();
        let factor = if n < 2 { 0.0 } else { 2.0 / (n - 1) as f64 };
        let scale = gradient * factor * sqrt_derivative(deviation);
        let input_gradient = input.map(|x| (x - mean) * scale);
        deposit(nodes, self.operands.first, index, &input_gradient)
    }

    fn reset(&mut self) {
        self.means.clear();
        self.sequence_mean = None;
    }
}

/// p-norm of every element, reduced to 1×1×1
#[derive(Debug, Clone)]
pub struct NormExpression {
    operands: Operands,
    p: f64,
}

impl NormExpression {
    pub fn new(operands: Operands, p: f64) -> Self {
        Self { operands, p }
    }
}

impl Expression for NormExpression {
    fn operands(&self) -> &Operands {
        &self.operands
    }

    fn name(&self) -> &'static str {
        "NORM"
    }

    fn calculate_expression_at(
        &mut self,
        nodes: &mut NodeArena,
        index: usize,
        _context: &mut EvaluationContext,
    ) -> AutotraceResult<()> {
        let value = nodes[self.operands.first].matrix(index)?.norm_as_matrix(self.p);
        nodes[self.operands.result].set_matrix(index, value);
        Ok(())
    }

    fn calculate_gradient_at(&mut self, nodes: &mut NodeArena, index: usize) -> AutotraceResult<()> {
        let gradient = result_gradient(nodes, self.operands.result, index)?.scalar_value();
        let norm = nodes[self.operands.result].matrix(index)?.scalar_value();
        // ∂‖x‖p/∂x = sign(x)·|x|^(p−1) / ‖x‖p^(p−1), zero for zero cells and a zero norm
        let p = self.p;
        let scale = if norm == 0.0 { 0.0 } else { gradient / norm.powf(p - 1.0) };
        let input_gradient = nodes[self.operands.first].matrix(index)?.map(|x| {
            if x == 0.0 {
                0.0
            } else {
                x.signum() * x.abs().powf(p - 1.0) * scale
            }
        });
        deposit(nodes, self.operands.first, index, &input_gradient)
    }
}

/// Standardization `(x − mean) / sqrt(variance + ε)` with the population variance
#[derive(Debug, Clone)]
pub struct NormalizeExpression {
    operands: Operands,
    epsilon: f64,
    statistics: BTreeMap<usize, (f64, f64)>,
}

impl NormalizeExpression {
    pub fn new(operands: Operands, epsilon: f64) -> Self {
        Self {
            operands,
            epsilon,
            statistics: BTreeMap::new(),
        }
    }
}

impl Expression for NormalizeExpression {
    fn operands(&self) -> &Operands {
        &self.operands
    }

    fn name(&self) -> &'static str {
        "NORMALIZE"
    }

    fn calculate_expression_at(
        &mut self,
        nodes: &mut NodeArena,
        index: usize,
        _context: &mut EvaluationContext,
    ) -> AutotraceResult<()> {
        let input = nodes[self.operands.first].matrix(index)?;
        let mean = input.mean();
        let variance = input.map(|x| (x - mean).powi(2)).sum() / input.size() as f64;
        let deviation = (variance + self.epsilon).sqrt();
        let value = input.map(|x| (x - mean) / deviation);
        self.statistics.insert(index, (mean, deviation));
        nodes[self.operands.result].set_matrix(index, value);
        Ok(())
    }

    fn calculate_gradient_at(&mut self, nodes: &mut NodeArena, index: usize) -> AutotraceResult<()> {
        let (mean, deviation) = *self
            .statistics
            .get(&index)
            .ok_or_else(|| AutotraceError::undefined_reference("Normalization statistics", index))?;
        let gradient = result_gradient(nodes, self.operands.result, index)?;
        let normalized = nodes[self.operands.first]
            .matrix(index)?
            .map(|x| (x - mean) / deviation);

        // (g − mean(g) − x̂·mean(g·x̂)) / σ
        let gradient_mean = gradient.mean();
        let projection = gradient.multiply(&normalized)?.mean();
        let input_gradient = gradient
            .subtract_scalar(gradient_mean)
            .subtract(&normalized.multiply_scalar(projection))?
            .divide_scalar(deviation);
        deposit(nodes, self.operands.first, index, &input_gradient)
    }

    fn reset(&mut self) {
        self.statistics.clear();
    }
}
