//! Explicit tracing context and the procedure factory
//!
//! A forward definition is executed once against a [`Tracer`]. Every
//! operation it performs through the tracer is evaluated eagerly on the
//! placeholder inputs and recorded as an expression; the factory then keeps
//! the expressions the output depends on and hands them to a [`Procedure`].

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use super::expression::{
    ArithmeticExpression, ArithmeticOperator, AveragePoolExpression, ConvolveExpression, DotExpression,
    DropoutExpression, EvaluationContext, Expression, FunctionExpression, MaxPoolExpression, MeanExpression,
    NormExpression, NormalizeExpression, Operands, Scope, StandardDeviationExpression, SumExpression,
};
use super::node::{NodeArena, NodeId, NodeKind};
use super::procedure::Procedure;
use crate::config::{EngineConfig, WindowConfig};
use crate::error::{AutotraceError, AutotraceResult};
use crate::tensor::{Sequence, Shape, Tensor, TensorId, UnaryFunction};

/// Named input declared by a forward definition
#[derive(Debug, Clone)]
pub struct Input {
    name: String,
    value: Sequence,
    multi_index: bool,
}

impl Input {
    /// Input holding one tensor per forward call
    pub fn single(name: &str, placeholder: Tensor) -> Self {
        Self {
            name: name.to_string(),
            value: Sequence::single(placeholder),
            multi_index: false,
        }
    }

    /// Input holding a time-indexed sequence per forward call
    pub fn sequence(name: &str, placeholder: Sequence) -> Self {
        Self {
            name: name.to_string(),
            value: placeholder,
            multi_index: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Handle to a node produced while tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Traced(NodeId);

impl Traced {
    pub fn node(&self) -> NodeId {
        self.0
    }
}

/// Computation traced into a [`Procedure`] by [`ProcedureFactory::build`].
pub trait ForwardDefinition {
    /// Placeholder inputs, in the order the procedure will receive them.
    fn inputs(&mut self, reset_previous: bool) -> AutotraceResult<Vec<Input>>;

    /// Computes the output from the traced inputs using only tracer operations.
    fn forward(&mut self, tracer: &mut Tracer, inputs: &[Traced]) -> AutotraceResult<Traced>;
}

/// Graph builder handed to a forward definition during tracing
#[derive(Debug)]
pub struct Tracer {
    nodes: NodeArena,
    expressions: Vec<Box<dyn Expression>>,
    parameters: HashMap<TensorId, NodeId>,
    context: EvaluationContext,
}

impl Tracer {
    pub fn new(seed: u64) -> Self {
        Self {
            nodes: NodeArena::new(),
            expressions: Vec::new(),
            parameters: HashMap::new(),
            context: EvaluationContext::new(seed),
        }
    }

    fn input(&mut self, input: Input) -> Traced {
        let id = self.nodes.add(&input.name, NodeKind::Input, input.multi_index);
        for (index, tensor) in input.value.iter() {
            self.nodes[id].set_matrix(index, tensor.clone());
        }
        Traced(id)
    }

    /// Placeholder value of a traced node at its first position
    pub fn value(&self, traced: Traced) -> AutotraceResult<&Tensor> {
        let node = &self.nodes[traced.0];
        let index = node.key_set().first().copied().unwrap_or(0);
        node.matrix(index)
    }

    pub fn shape(&self, traced: Traced) -> AutotraceResult<Shape> {
        self.value(traced).map(Tensor::shape)
    }

    pub fn is_multi_index(&self, traced: Traced) -> bool {
        self.nodes[traced.0].is_multi_index()
    }

    /// Fixed tensor that never receives gradients
    pub fn constant(&mut self, value: &Tensor) -> Traced {
        let name = value
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("Constant{}", self.nodes.len()));
        let id = self.nodes.add(&name, NodeKind::Constant, false);
        self.nodes[id].set_value(value.clone());
        Traced(id)
    }

    /// Externally owned tensor whose gradient is collected by the procedure.
    ///
    /// Registering the same tensor twice returns the same node.
    pub fn parameter(&mut self, value: &Tensor) -> Traced {
        if let Some(&id) = self.parameters.get(&value.id()) {
            return Traced(id);
        }
        let name = value
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("Parameter{}", self.nodes.len()));
        let id = self.nodes.add(&name, NodeKind::Parameter(value.id()), false);
        self.nodes[id].set_value(value.clone());
        self.parameters.insert(value.id(), id);
        Traced(id)
    }

    fn result_node(&mut self, arguments: &[Traced], scope: Scope) -> NodeId {
        let multi_index = scope == Scope::PerIndex && arguments.iter().any(|a| self.nodes[a.0].is_multi_index());
        let name = format!("Node{}", self.nodes.len());
        self.nodes.add(&name, NodeKind::Intermediate, multi_index)
    }

    fn operands(&mut self, first: Traced, arguments: &[Traced], scope: Scope) -> Operands {
        let result = self.result_node(arguments, scope);
        Operands::new(self.expressions.len(), first.0, result)
    }

    fn record<E: Expression + 'static>(&mut self, mut expression: E) -> AutotraceResult<Traced> {
        expression.calculate_expression(&mut self.nodes, &mut self.context)?;
        debug!("Traced {}", expression.describe(&self.nodes));
        let result = expression.result();
        self.expressions.push(Box::new(expression));
        Ok(Traced(result))
    }

    fn arithmetic(&mut self, first: Traced, second: Traced, operator: ArithmeticOperator) -> AutotraceResult<Traced> {
        let operands = self.operands(first, &[first, second], Scope::PerIndex);
        self.record(ArithmeticExpression::new(operands, second.0, operator))
    }

    pub fn add(&mut self, first: Traced, second: Traced) -> AutotraceResult<Traced> {
        self.arithmetic(first, second, ArithmeticOperator::Add)
    }

    pub fn subtract(&mut self, first: Traced, second: Traced) -> AutotraceResult<Traced> {
        self.arithmetic(first, second, ArithmeticOperator::Subtract)
    }

    pub fn multiply(&mut self, first: Traced, second: Traced) -> AutotraceResult<Traced> {
        self.arithmetic(first, second, ArithmeticOperator::Multiply)
    }

    pub fn divide(&mut self, first: Traced, second: Traced) -> AutotraceResult<Traced> {
        self.arithmetic(first, second, ArithmeticOperator::Divide)
    }

    pub fn power(&mut self, first: Traced, second: Traced) -> AutotraceResult<Traced> {
        self.arithmetic(first, second, ArithmeticOperator::Power)
    }

    pub fn add_scalar(&mut self, first: Traced, value: f64) -> AutotraceResult<Traced> {
        let constant = self.constant(&Tensor::scalar(value));
        self.add(first, constant)
    }

    pub fn subtract_scalar(&mut self, first: Traced, value: f64) -> AutotraceResult<Traced> {
        let constant = self.constant(&Tensor::scalar(value));
        self.subtract(first, constant)
    }

    pub fn multiply_scalar(&mut self, first: Traced, value: f64) -> AutotraceResult<Traced> {
        let constant = self.constant(&Tensor::scalar(value));
        self.multiply(first, constant)
    }

    pub fn divide_scalar(&mut self, first: Traced, value: f64) -> AutotraceResult<Traced> {
        let constant = self.constant(&Tensor::scalar(value));
        self.divide(first, constant)
    }

    pub fn power_scalar(&mut self, first: Traced, exponent: f64) -> AutotraceResult<Traced> {
        let constant = self.constant(&Tensor::scalar(exponent));
        self.power(first, constant)
    }

    pub fn dot(&mut self, first: Traced, second: Traced) -> AutotraceResult<Traced> {
        let operands = self.operands(first, &[first, second], Scope::PerIndex);
        self.record(DotExpression::new(operands, second.0))
    }

    pub fn convolve(&mut self, input: Traced, filter: Traced, stride: usize, dilation: usize) -> AutotraceResult<Traced> {
        WindowConfig::for_filter(self.shape(filter)?, stride, dilation)?;
        let operands = self.operands(input, &[input, filter], Scope::PerIndex);
        self.record(ConvolveExpression::new(operands, filter.0, stride, dilation))
    }

    pub fn max_pool(&mut self, input: Traced, config: WindowConfig) -> AutotraceResult<Traced> {
        config.validate()?;
        let operands = self.operands(input, &[input], Scope::PerIndex);
        self.record(MaxPoolExpression::new(operands, config))
    }

    pub fn average_pool(&mut self, input: Traced, config: WindowConfig) -> AutotraceResult<Traced> {
        config.validate()?;
        let operands = self.operands(input, &[input], Scope::PerIndex);
        self.record(AveragePoolExpression::new(operands, config))
    }

    pub fn apply(&mut self, input: Traced, function: UnaryFunction) -> AutotraceResult<Traced> {
        let operands = self.operands(input, &[input], Scope::PerIndex);
        self.record(FunctionExpression::new(operands, function))
    }

    pub fn sum(&mut self, input: Traced, scope: Scope) -> AutotraceResult<Traced> {
        let operands = self.operands(input, &[input], scope);
        self.record(SumExpression::new(operands, scope))
    }

    pub fn mean(&mut self, input: Traced, scope: Scope) -> AutotraceResult<Traced> {
        let operands = self.operands(input, &[input], scope);
        self.record(MeanExpression::new(operands, scope))
    }

    pub fn standard_deviation(&mut self, input: Traced, scope: Scope) -> AutotraceResult<Traced> {
        let operands = self.operands(input, &[input], scope);
        self.record(StandardDeviationExpression::new(operands, scope))
    }

    pub fn norm(&mut self, input: Traced, p: f64) -> AutotraceResult<Traced> {
        if p <= 0.0 {
            return Err(AutotraceError::configuration(&format!("Norm order must be positive, got {}", p)));
        }
        let operands = self.operands(input, &[input], Scope::PerIndex);
        self.record(NormExpression::new(operands, p))
    }

    pub fn normalize(&mut self, input: Traced, epsilon: f64) -> AutotraceResult<Traced> {
        let operands = self.operands(input, &[input], Scope::PerIndex);
        self.record(NormalizeExpression::new(operands, epsilon))
    }

    /// Inverted dropout with drop probability `probability`
    pub fn dropout(&mut self, input: Traced, probability: f64) -> AutotraceResult<Traced> {
        if !(0.0..1.0).contains(&probability) {
            return Err(AutotraceError::configuration(&format!(
                "Dropout probability must be in [0, 1), got {}",
                probability
            )));
        }
        let operands = self.operands(input, &[input], Scope::PerIndex);
        self.record(DropoutExpression::new(operands, probability))
    }

    /// Renames a traced node for chain descriptions
    pub fn set_name(&mut self, traced: Traced, name: &str) {
        self.nodes[traced.0].set_name(name);
    }
}

/// Traces forward definitions into procedures
#[derive(Debug, Clone)]
pub struct ProcedureFactory {
    config: EngineConfig,
}

impl Default for ProcedureFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcedureFactory {
    /// Factory using the process-wide configuration
    pub fn new() -> Self {
        Self {
            config: crate::config::get_config(),
        }
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Runs `definition` once against a fresh tracer and returns the resulting procedure.
    ///
    /// Expressions whose results the output does not depend on are dropped;
    /// the remaining ones keep their trace order.
    pub fn build<D: ForwardDefinition + ?Sized>(&self, definition: &mut D) -> AutotraceResult<Procedure> {
        let mut tracer = Tracer::new(self.config.random.seed);
        let inputs: Vec<Traced> = definition
            .inputs(true)?
            .into_iter()
            .map(|input| tracer.input(input))
            .collect();
        let output = definition.forward(&mut tracer, &inputs)?;

        let Tracer {
            nodes,
            expressions,
            parameters,
            ..
        } = tracer;

        let traced_count = expressions.len();
        let expressions = prune(expressions, output.0);
        info!(
            "Built procedure with {} expressions ({} traced) over {} nodes",
            expressions.len(),
            traced_count,
            nodes.len()
        );

        let procedure = Procedure::new(
            nodes,
            expressions,
            inputs.iter().map(Traced::node).collect(),
            output.0,
            parameters,
            EvaluationContext::from_rng(self.config.random.rng()),
        );
        if self.config.procedure.log_expression_chain {
            procedure.log_chains();
        }
        Ok(procedure)
    }
}

/// Keeps the expressions reachable backwards from `output`, in their original order.
fn prune(expressions: Vec<Box<dyn Expression>>, output: NodeId) -> Vec<Box<dyn Expression>> {
    let mut live: HashSet<NodeId> = HashSet::new();
    live.insert(output);
    let mut keep = vec![false; expressions.len()];
    for (position, expression) in expressions.iter().enumerate().rev() {
        if live.contains(&expression.result()) {
            keep[position] = true;
            live.extend(expression.arguments());
        }
    }
    expressions
        .into_iter()
        .zip(keep)
        .filter_map(|(expression, kept)| if kept { Some(expression) } else { None })
        .collect()
}
