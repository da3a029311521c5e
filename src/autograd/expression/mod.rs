//! Traced operations with paired forward and backward rules
//!
//! An expression reads its argument nodes and writes its result node. The
//! per-index methods compute one sequence position from the arguments at that
//! position. The whole-sequence methods default to looping the per-index rule
//! over every position, and statistics that aggregate across positions
//! override them when traced with [`Scope::Sequence`].

use std::collections::BTreeSet;
use std::fmt::Debug;

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::node::{NodeArena, NodeId};
use crate::error::AutotraceResult;
use crate::tensor::Tensor;

pub mod binary;
pub mod statistics;
pub mod structural;
pub mod unary;

pub use binary::{ArithmeticExpression, ArithmeticOperator, ConvolveExpression, DotExpression};
pub use statistics::{
    MeanExpression, NormExpression, NormalizeExpression, StandardDeviationExpression, SumExpression,
};
pub use structural::{AveragePoolExpression, DropoutExpression, MaxPoolExpression};
pub use unary::FunctionExpression;

/// How a statistic treats a multi-index argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Aggregates within each tensor, one result per sequence position
    PerIndex,
    /// Aggregates elementwise across every sequence position into one result
    Sequence,
}

/// Mutable state shared by every expression during a forward pass
#[derive(Debug)]
pub struct EvaluationContext {
    rng: StdRng,
}

impl EvaluationContext {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_rng(rng: StdRng) -> Self {
        Self { rng }
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

/// Expression identifier plus its first argument and result nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operands {
    pub id: usize,
    pub first: NodeId,
    pub result: NodeId,
}

impl Operands {
    pub fn new(id: usize, first: NodeId, result: NodeId) -> Self {
        Self { id, first, result }
    }
}

pub trait Expression: Debug {
    fn operands(&self) -> &Operands;

    /// Upper-case operation name used in chain descriptions
    fn name(&self) -> &'static str;

    fn id(&self) -> usize {
        self.operands().id
    }

    fn result(&self) -> NodeId {
        self.operands().result
    }

    fn arguments(&self) -> Vec<NodeId> {
        vec![self.operands().first]
    }

    fn scope(&self) -> Scope {
        Scope::PerIndex
    }

    /// Forward over the whole sequence
    fn calculate_expression(&mut self, nodes: &mut NodeArena, context: &mut EvaluationContext) -> AutotraceResult<()> {
        forward_each(self, nodes, context)
    }

    /// Forward at one sequence position
    fn calculate_expression_at(
        &mut self,
        nodes: &mut NodeArena,
        index: usize,
        context: &mut EvaluationContext,
    ) -> AutotraceResult<()>;

    /// Backward over the whole sequence
    fn calculate_gradient(&mut self, nodes: &mut NodeArena) -> AutotraceResult<()> {
        backward_each(self, nodes)
    }

    /// Backward at one sequence position
    fn calculate_gradient_at(&mut self, nodes: &mut NodeArena, index: usize) -> AutotraceResult<()>;

    /// Drops intermediates cached by the last forward pass
    fn reset(&mut self) {}

    fn describe(&self, nodes: &NodeArena) -> String {
        let arguments: Vec<&str> = self.arguments().iter().map(|&id| nodes[id].name()).collect();
        format!(
            "#{}: {}({}) = {}",
            self.id(),
            self.name(),
            arguments.join(", "),
            nodes[self.result()].name()
        )
    }

    fn describe_gradient(&self, nodes: &NodeArena) -> String {
        let arguments: Vec<String> = self
            .arguments()
            .iter()
            .filter(|&&id| nodes[id].receives_gradient())
            .map(|&id| format!("d{}", nodes[id].name()))
            .collect();
        format!(
            "#{}: {} += d{}(d{})",
            self.id(),
            arguments.join(", "),
            self.name(),
            nodes[self.result()].name()
        )
    }
}

/// Sequence positions an expression visits.
///
/// A multi-index result visits every position held by its multi-index
/// arguments; a single-index result is computed once at position 0.
pub fn iteration_keys(nodes: &NodeArena, arguments: &[NodeId], result: NodeId) -> Vec<usize> {
    if !nodes[result].is_multi_index() {
        return vec![0];
    }
    let keys: BTreeSet<usize> = arguments
        .iter()
        .filter(|&&id| nodes[id].is_multi_index())
        .flat_map(|&id| nodes[id].key_set())
        .collect();
    keys.into_iter().collect()
}

/// Runs the per-index forward rule at every position from [`iteration_keys`].
pub fn forward_each<E: Expression + ?Sized>(
    expression: &mut E,
    nodes: &mut NodeArena,
    context: &mut EvaluationContext,
) -> AutotraceResult<()> {
    for index in iteration_keys(nodes, &expression.arguments(), expression.result()) {
        expression.calculate_expression_at(nodes, index, context)?;
    }
    Ok(())
}

/// Runs the per-index backward rule at every position holding a result value.
pub fn backward_each<E: Expression + ?Sized>(expression: &mut E, nodes: &mut NodeArena) -> AutotraceResult<()> {
    for index in nodes[expression.result()].key_set() {
        expression.calculate_gradient_at(nodes, index)?;
    }
    Ok(())
}

/// Argument value at `index`, cloned out of the arena
pub(crate) fn argument(nodes: &NodeArena, id: NodeId, index: usize) -> AutotraceResult<Tensor> {
    nodes[id].matrix(index).map(Tensor::clone)
}

/// Accumulated gradient of the result node at `index`
pub(crate) fn result_gradient(nodes: &NodeArena, result: NodeId, index: usize) -> AutotraceResult<Tensor> {
    nodes[result].gradient(index).map(Tensor::clone)
}

/// Adds `gradient` to an argument's gradient at `index`.
///
/// Cells suppressed in the argument receive nothing, a gradient computed
/// against a broadcast scalar argument is summed back to 1×1×1, and constants
/// are skipped.
pub(crate) fn deposit(nodes: &mut NodeArena, argument: NodeId, index: usize, gradient: &Tensor) -> AutotraceResult<()> {
    let node = &nodes[argument];
    if !node.receives_gradient() {
        return Ok(());
    }
    let value = node.matrix(index)?;
    let gradient = gradient.gate_by(value)?.sum_to_shape(value.shape())?;
    nodes[argument].update_gradient(index, &gradient, true)
}
