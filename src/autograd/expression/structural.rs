//! Pooling and dropout expressions

use std::collections::BTreeMap;

use super::{argument, deposit, result_gradient, EvaluationContext, Expression, Operands};
use crate::autograd::node::NodeArena;
use crate::config::WindowConfig;
use crate::error::{AutotraceError, AutotraceResult};
use crate::ops::dropout::{apply_mask, draw_mask};
use crate::ops::PoolIndices;
use crate::tensor::Mask;

/// Max pooling; the winning coordinates of each forward pass feed the matching backward pass.
#[derive(Debug, Clone)]
pub struct MaxPoolExpression {
    operands: Operands,
    config: WindowConfig,
    indices: BTreeMap<usize, PoolIndices>,
}

impl MaxPoolExpression {
    pub fn new(operands: Operands, config: WindowConfig) -> Self {
        Self {
            operands,
            config,
            indices: BTreeMap::new(),
        }
    }
}

impl Expression for MaxPoolExpression {
    fn operands(&self) -> &Operands {
        &self.operands
    }

    fn name(&self) -> &'static str {
        "MAX_POOL"
    }

    fn calculate_expression_at(
        &mut self,
        nodes: &mut NodeArena,
        index: usize,
        _context: &mut EvaluationContext,
    ) -> AutotraceResult<()> {
        let (value, indices) = nodes[self.operands.first].matrix(index)?.max_pool(&self.config)?;
        self.indices.insert(index, indices);
        nodes[self.operands.result].set_matrix(index, value);
        Ok(())
    }

    fn calculate_gradient_at(&mut self, nodes: &mut NodeArena, index: usize) -> AutotraceResult<()> {
        let gradient = result_gradient(nodes, self.operands.result, index)?;
        let indices = self
            .indices
            .get(&index)
            .ok_or_else(|| AutotraceError::undefined_reference("Max pool winners", index))?;
        let input_gradient = nodes[self.operands.first]
            .matrix(index)?
            .max_pool_gradient(&gradient, indices)?;
        deposit(nodes, self.operands.first, index, &input_gradient)
    }

    fn reset(&mut self) {
        self.indices.clear();
    }
}

#[derive(Debug, Clone)]
pub struct AveragePoolExpression {
    operands: Operands,
    config: WindowConfig,
}

impl AveragePoolExpression {
    pub fn new(operands: Operands, config: WindowConfig) -> Self {
        Self { operands, config }
    }
}

impl Expression for AveragePoolExpression {
    fn operands(&self) -> &Operands {
        &self.operands
    }

    fn name(&self) -> &'static str {
        "AVERAGE_POOL"
    }

    fn calculate_expression_at(
        &mut self,
        nodes: &mut NodeArena,
        index: usize,
        _context: &mut EvaluationContext,
    ) -> AutotraceResult<()> {
        let value = nodes[self.operands.first].matrix(index)?.average_pool(&self.config)?;
        nodes[self.operands.result].set_matrix(index, value);
        Ok(())
    }

    fn calculate_gradient_at(&mut self, nodes: &mut NodeArena, index: usize) -> AutotraceResult<()> {
        let gradient = result_gradient(nodes, self.operands.result, index)?;
        let input = argument(nodes, self.operands.first, index)?;
        deposit(
            nodes,
            self.operands.first,
            index,
            &input.average_pool_gradient(&gradient, &self.config)?,
        )
    }
}

/// Inverted dropout. A fresh mask is drawn per position on every forward pass.
#[derive(Debug, Clone)]
pub struct DropoutExpression {
    operands: Operands,
    probability: f64,
    masks: BTreeMap<usize, Mask>,
}

impl DropoutExpression {
    pub fn new(operands: Operands, probability: f64) -> Self {
        Self {
            operands,
            probability,
            masks: BTreeMap::new(),
        }
    }

    /// Mask drawn for `index` by the last forward pass
    pub fn mask(&self, index: usize) -> Option<&Mask> {
        self.masks.get(&index)
    }
}

impl Expression for DropoutExpression {
    fn operands(&self) -> &Operands {
        &self.operands
    }

    fn name(&self) -> &'static str {
        "DROPOUT"
    }

    fn calculate_expression_at(
        &mut self,
        nodes: &mut NodeArena,
        index: usize,
        context: &mut EvaluationContext,
    ) -> AutotraceResult<()> {
        let input = nodes[self.operands.first].matrix(index)?;
        let mask = draw_mask(input, self.probability, context.rng())?;
        let value = apply_mask(input, &mask)?;
        self.masks.insert(index, mask);
        nodes[self.operands.result].set_matrix(index, value);
        Ok(())
    }

    fn calculate_gradient_at(&mut self, nodes: &mut NodeArena, index: usize) -> AutotraceResult<()> {
        let gradient = result_gradient(nodes, self.operands.result, index)?;
        let mask = self
            .masks
            .get(&index)
            .ok_or_else(|| AutotraceError::undefined_reference("Dropout mask", index))?;
        deposit(nodes, self.operands.first, index, &apply_mask(&gradient, mask)?)
    }

    fn reset(&mut self) {
        self.masks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::node::{NodeId, NodeKind};
    use crate::tensor::{Shape, Tensor};

    fn single(input: Tensor) -> (NodeArena, NodeId, NodeId) {
        let mut nodes = NodeArena::new();
        let x = nodes.add("X", NodeKind::Input, false);
        let y = nodes.add("Y", NodeKind::Intermediate, false);
        nodes[x].set_value(input);
        (nodes, x, y)
    }

    #[test]
    fn test_max_pool_backward_uses_recorded_winner() {
        let mut input = Tensor::zeros(Shape::new(4, 4, 1));
        input.set_value(1, 2, 0, 5.0);
        let (mut nodes, x, y) = single(input);
        let mut expression = MaxPoolExpression::new(Operands::new(0, x, y), WindowConfig::new(2, 2, 2, 1).unwrap());
        expression
            .calculate_expression(&mut nodes, &mut EvaluationContext::new(0))
            .unwrap();
        nodes[y]
            .update_gradient(0, &Tensor::ones(Shape::new(2, 2, 1)), false)
            .unwrap();
        expression.calculate_gradient(&mut nodes).unwrap();

        let gradient = nodes[x].gradient(0).unwrap();
        assert_eq!(gradient.value(1, 2, 0), 1.0);
        assert_eq!(gradient.value(0, 2, 0), 0.0);
        assert_eq!(gradient.value(1, 3, 0), 0.0);
    }

    #[test]
    fn test_backward_without_forward_fails() {
        let (mut nodes, x, y) = single(Tensor::ones(Shape::new(2, 2, 1)));
        nodes[y].set_value(Tensor::scalar(1.0));
        nodes[y].update_gradient(0, &Tensor::scalar(1.0), false).unwrap();
        let mut expression = MaxPoolExpression::new(Operands::new(0, x, y), WindowConfig::new(2, 2, 1, 1).unwrap());
        assert!(expression.calculate_gradient(&mut nodes).is_err());
    }

    #[test]
    fn test_dropout_gradient_follows_forward_mask() {
        let (mut nodes, x, y) = single(Tensor::filled(Shape::new(4, 4, 1), 3.0));
        let mut expression = DropoutExpression::new(Operands::new(0, x, y), 0.5);
        expression
            .calculate_expression(&mut nodes, &mut EvaluationContext::new(17))
            .unwrap();
        nodes[y]
            .update_gradient(0, &Tensor::ones(Shape::new(4, 4, 1)), false)
            .unwrap();
        expression.calculate_gradient(&mut nodes).unwrap();

        let mask = expression.mask(0).unwrap();
        let output = nodes[y].value().unwrap();
        let gradient = nodes[x].gradient(0).unwrap();
        for row in 0..4 {
            for column in 0..4 {
                if mask.is_masked(row, column, 0) {
                    assert_eq!(output.value(row, column, 0), 0.0);
                    assert_eq!(gradient.value(row, column, 0), 0.0);
                } else {
                    assert_eq!(output.value(row, column, 0), 6.0);
                    assert_eq!(gradient.value(row, column, 0), 2.0);
                }
            }
        }
    }
}
