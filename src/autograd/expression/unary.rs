use super::{argument, deposit, result_gradient, EvaluationContext, Expression, Operands};
use crate::autograd::node::NodeArena;
use crate::error::AutotraceResult;
use crate::tensor::UnaryFunction;

/// Elementwise application of a unary function; backward multiplies by its derivative.
#[derive(Debug, Clone)]
pub struct FunctionExpression {
    operands: Operands,
    function: UnaryFunction,
}

impl FunctionExpression {
    pub fn new(operands: Operands, function: UnaryFunction) -> Self {
        Self { operands, function }
    }

    pub fn function(&self) -> UnaryFunction {
        self.function
    }
}

impl Expression for FunctionExpression {
    fn operands(&self) -> &Operands {
        &self.operands
    }

    fn name(&self) -> &'static str {
        self.function.name()
    }

    fn calculate_expression_at(
        &mut self,
        nodes: &mut NodeArena,
        index: usize,
        _context: &mut EvaluationContext,
    ) -> AutotraceResult<()> {
        let value = nodes[self.operands.first].matrix(index)?.apply(self.function);
        nodes[self.operands.result].set_matrix(index, value);
        Ok(())
    }

    fn calculate_gradient_at(&mut self, nodes: &mut NodeArena, index: usize) -> AutotraceResult<()> {
        let gradient = result_gradient(nodes, self.operands.result, index)?;
        let input = argument(nodes, self.operands.first, index)?;
        let input_gradient = gradient.multiply(&input.apply_derivative(self.function))?;
        deposit(nodes, self.operands.first, index, &input_gradient)
    }
}
