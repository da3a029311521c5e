//! Two-argument expressions

use super::{argument, deposit, result_gradient, EvaluationContext, Expression, Operands};
use crate::autograd::node::{NodeArena, NodeId};
use crate::error::AutotraceResult;
use crate::tensor::{Tensor, UnaryFunction};

/// Elementwise arithmetic between two tensors, either of which may be a broadcast scalar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
}

impl ArithmeticOperator {
    pub fn name(&self) -> &'static str {
        match self {
            ArithmeticOperator::Add => "ADD",
            ArithmeticOperator::Subtract => "SUBTRACT",
            ArithmeticOperator::Multiply => "MULTIPLY",
            ArithmeticOperator::Divide => "DIVIDE",
            ArithmeticOperator::Power => "POWER",
        }
    }

    pub fn apply(&self, first: &Tensor, second: &Tensor) -> AutotraceResult<Tensor> {
        match self {
            ArithmeticOperator::Add => first.add(second),
            ArithmeticOperator::Subtract => first.subtract(second),
            ArithmeticOperator::Multiply => first.multiply(second),
            ArithmeticOperator::Divide => first.divide(second),
            ArithmeticOperator::Power => first.power(second),
        }
    }

    /// Partials of the result with respect to the first and second argument, scaled by `gradient`.
    fn gradients(&self, first: &Tensor, second: &Tensor, gradient: &Tensor) -> AutotraceResult<(Tensor, Tensor)> {
        match self {
            ArithmeticOperator::Add => Ok((gradient.clone(), gradient.clone())),
            ArithmeticOperator::Subtract => Ok((gradient.clone(), gradient.apply(UnaryFunction::Negate))),
            ArithmeticOperator::Multiply => Ok((gradient.multiply(second)?, gradient.multiply(first)?)),
            ArithmeticOperator::Divide => {
                let first_gradient = gradient.divide(second)?;
                // -g·a / b²
                let second_gradient = first_gradient
                    .multiply(first)?
                    .divide(second)?
                    .apply(UnaryFunction::Negate);
                Ok((first_gradient, second_gradient))
            }
            ArithmeticOperator::Power => {
                // g·b·a^(b − 1) and g·a^b·ln(a)
                let first_gradient = gradient
                    .multiply(second)?
                    .multiply(&first.power(&second.subtract_scalar(1.0))?)?;
                let second_gradient = gradient
                    .multiply(&first.power(second)?)?
                    .multiply(&first.apply(UnaryFunction::Log))?;
                Ok((first_gradient, second_gradient))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArithmeticExpression {
    operands: Operands,
    second: NodeId,
    operator: ArithmeticOperator,
}

impl ArithmeticExpression {
    pub fn new(operands: Operands, second: NodeId, operator: ArithmeticOperator) -> Self {
        Self {
            operands,
            second,
            operator,
        }
    }

    pub fn operator(&self) -> ArithmeticOperator {
        self.operator
    }
}

impl Expression for ArithmeticExpression {
    fn operands(&self) -> &Operands {
        &self.operands
    }

    fn name(&self) -> &'static str {
        self.operator.name()
    }

    fn arguments(&self) -> Vec<NodeId> {
        vec![self.operands.first, self.second]
    }

    fn calculate_expression_at(
        &mut self,
        nodes: &mut NodeArena,
        index: usize,
        _context: &mut EvaluationContext,
    ) -> AutotraceResult<()> {
        let value = self.operator.apply(
            nodes[self.operands.first].matrix(index)?,
            nodes[self.second].matrix(index)?,
        )?;
        nodes[self.operands.result].set_matrix(index, value);
        Ok(())
    }

    fn calculate_gradient_at(&mut self, nodes: &mut NodeArena, index: usize) -> AutotraceResult<()> {
        let gradient = result_gradient(nodes, self.operands.result, index)?;
        let (first_gradient, second_gradient) = self.operator.gradients(
            nodes[self.operands.first].matrix(index)?,
            nodes[self.second].matrix(index)?,
            &gradient,
        )?;
        deposit(nodes, self.operands.first, index, &first_gradient)?;
        deposit(nodes, self.second, index, &second_gradient)
    }
}

/// Matrix product per depth slice
#[derive(Debug, Clone)]
pub struct DotExpression {
    operands: Operands,
    second: NodeId,
}

impl DotExpression {
    pub fn new(operands: Operands, second: NodeId) -> Self {
        Self { operands, second }
    }
}

impl Expression for DotExpression {
    fn operands(&self) -> &Operands {
        &self.operands
    }

    fn name(&self) -> &'static str {
        "DOT"
    }

    fn arguments(&self) -> Vec<NodeId> {
        vec![self.operands.first, self.second]
    }

    fn calculate_expression_at(
        &mut self,
        nodes: &mut NodeArena,
        index: usize,
        _context: &mut EvaluationContext,
    ) -> AutotraceResult<()> {
        let value = nodes[self.operands.first]
            .matrix(index)?
            .dot(nodes[self.second].matrix(index)?)?;
        nodes[self.operands.result].set_matrix(index, value);
        Ok(())
    }

    fn calculate_gradient_at(&mut self, nodes: &mut NodeArena, index: usize) -> AutotraceResult<()> {
        let gradient = result_gradient(nodes, self.operands.result, index)?;
        let first = argument(nodes, self.operands.first, index)?;
        let second = argument(nodes, self.second, index)?;
        deposit(nodes, self.operands.first, index, &gradient.dot(&second.transpose())?)?;
        deposit(nodes, self.second, index, &first.transpose().dot(&gradient)?)
    }
}

/// Convolution of the first argument with the filter held by the second
#[derive(Debug, Clone)]
pub struct ConvolveExpression {
    operands: Operands,
    filter: NodeId,
    stride: usize,
    dilation: usize,
}

impl ConvolveExpression {
    pub fn new(operands: Operands, filter: NodeId, stride: usize, dilation: usize) -> Self {
        Self {
            operands,
            filter,
            stride,
            dilation,
        }
    }
}

impl Expression for ConvolveExpression {
    fn operands(&self) -> &Operands {
        &self.operands
    }

    fn name(&self) -> &'static str {
        "CONVOLVE"
    }

    fn arguments(&self) -> Vec<NodeId> {
        vec![self.operands.first, self.filter]
    }

    fn calculate_expression_at(
        &mut self,
        nodes: &mut NodeArena,
        index: usize,
        _context: &mut EvaluationContext,
    ) -> AutotraceResult<()> {
        let value = nodes[self.operands.first].matrix(index)?.convolve(
            nodes[self.filter].matrix(index)?,
            self.stride,
            self.dilation,
        )?;
        nodes[self.operands.result].set_matrix(index, value);
        Ok(())
    }

    fn calculate_gradient_at(&mut self, nodes: &mut NodeArena, index: usize) -> AutotraceResult<()> {
        let gradient = result_gradient(nodes, self.operands.result, index)?;
        let input = argument(nodes, self.operands.first, index)?;
        let filter = argument(nodes, self.filter, index)?;
        let input_gradient = input.convolve_input_gradient(&filter, &gradient, self.stride, self.dilation)?;
        let filter_gradient = input.convolve_filter_gradient(&filter, &gradient, self.stride, self.dilation)?;
        deposit(nodes, self.operands.first, index, &input_gradient)?;
        deposit(nodes, self.filter, index, &filter_gradient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::node::NodeKind;
    use crate::tensor::Shape;

    fn arena(first: Tensor, second: Tensor) -> (NodeArena, NodeId, NodeId, NodeId) {
        let mut nodes = NodeArena::new();
        let a = nodes.add("A", NodeKind::Input, false);
        let b = nodes.add("B", NodeKind::Input, false);
        let out = nodes.add("Out", NodeKind::Intermediate, false);
        nodes[a].set_value(first);
        nodes[b].set_value(second);
        (nodes, a, b, out)
    }

    fn run(expression: &mut dyn Expression, nodes: &mut NodeArena, seed: Tensor) {
        let mut context = EvaluationContext::new(0);
        expression.calculate_expression(nodes, &mut context).unwrap();
        nodes[expression.result()].update_gradient(0, &seed, false).unwrap();
        expression.calculate_gradient(nodes).unwrap();
    }

    #[test]
    fn test_divide_gradients() {
        let (mut nodes, a, b, out) = arena(Tensor::scalar(3.0), Tensor::scalar(2.0));
        let mut expression = ArithmeticExpression::new(Operands::new(0, a, out), b, ArithmeticOperator::Divide);
        run(&mut expression, &mut nodes, Tensor::scalar(1.0));
        assert_eq!(nodes[out].value().unwrap().scalar_value(), 1.5);
        assert_eq!(nodes[a].gradient(0).unwrap().scalar_value(), 0.5);
        assert_eq!(nodes[b].gradient(0).unwrap().scalar_value(), -0.75);
    }

    #[test]
    fn test_power_gradients() {
        let (mut nodes, a, b, out) = arena(Tensor::scalar(2.0), Tensor::scalar(3.0));
        let mut expression = ArithmeticExpression::new(Operands::new(0, a, out), b, ArithmeticOperator::Power);
        run(&mut expression, &mut nodes, Tensor::scalar(1.0));
        assert_eq!(nodes[out].value().unwrap().scalar_value(), 8.0);
        assert!((nodes[a].gradient(0).unwrap().scalar_value() - 12.0).abs() < 1e-12);
        assert!((nodes[b].gradient(0).unwrap().scalar_value() - 8.0 * 2.0f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_broadcast_scalar_gradient_is_summed() {
        let (mut nodes, a, b, out) = arena(Tensor::from_rows(&[vec![1.0, 2.0, 3.0]]).unwrap(), Tensor::scalar(2.0));
        let mut expression = ArithmeticExpression::new(Operands::new(0, a, out), b, ArithmeticOperator::Multiply);
        run(&mut expression, &mut nodes, Tensor::ones(Shape::new(1, 3, 1)));
        assert_eq!(nodes[a].gradient(0).unwrap().data(), &[2.0, 2.0, 2.0]);
        assert_eq!(nodes[b].gradient(0).unwrap().scalar_value(), 6.0);
    }

    #[test]
    fn test_dot_gradients() {
        let first = Tensor::from_rows(&[vec![1.0, 2.0]]).unwrap();
        let second = Tensor::from_rows(&[vec![3.0], vec![4.0]]).unwrap();
        let (mut nodes, a, b, out) = arena(first, second);
        let mut expression = DotExpression::new(Operands::new(0, a, out), b);
        run(&mut expression, &mut nodes, Tensor::scalar(1.0));
        assert_eq!(nodes[out].value().unwrap().scalar_value(), 11.0);
        assert_eq!(nodes[a].gradient(0).unwrap().data(), &[3.0, 4.0]);
        assert_eq!(nodes[b].gradient(0).unwrap().data(), &[1.0, 2.0]);
    }

    #[test]
    fn test_dimension_mismatch_surfaces() {
        let (mut nodes, a, b, out) = arena(Tensor::ones(Shape::new(2, 2, 1)), Tensor::ones(Shape::new(3, 3, 1)));
        let mut expression = ArithmeticExpression::new(Operands::new(0, a, out), b, ArithmeticOperator::Add);
        let error = expression
            .calculate_expression(&mut nodes, &mut EvaluationContext::new(0))
            .unwrap_err();
        assert!(matches!(error, crate::error::AutotraceError::DimensionMismatch(_)));
    }

    #[test]
    fn test_describe() {
        let (nodes, a, b, out) = arena(Tensor::scalar(1.0), Tensor::scalar(1.0));
        let expression = ArithmeticExpression::new(Operands::new(4, a, out), b, ArithmeticOperator::Subtract);
        assert_eq!(expression.describe(&nodes), "#4: SUBTRACT(A, B) = Out");
        assert_eq!(expression.describe_gradient(&nodes), "#4: dA, dB += dSUBTRACT(dOut)");
    }
}
