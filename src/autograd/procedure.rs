//! Replayable chains of traced expressions

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use super::expression::{EvaluationContext, Expression};
use super::node::{Node, NodeArena, NodeId, NodeKind};
use crate::error::{AutotraceError, AutotraceResult, ErrorContext, WithContext};
use crate::tensor::{Sequence, Tensor, TensorId};

/// Fixed graph of expressions between input nodes and one output node.
///
/// Built once by [`super::ProcedureFactory`] and then evaluated any number of
/// times. Only values and gradients change between calls; the expression
/// list never does.
#[derive(Debug)]
pub struct Procedure {
    nodes: NodeArena,
    expressions: Vec<Box<dyn Expression>>,
    inputs: Vec<NodeId>,
    output: NodeId,
    parameters: HashMap<TensorId, NodeId>,
    context: EvaluationContext,
}

impl Procedure {
    pub(crate) fn new(
        nodes: NodeArena,
        expressions: Vec<Box<dyn Expression>>,
        inputs: Vec<NodeId>,
        output: NodeId,
        parameters: HashMap<TensorId, NodeId>,
        context: EvaluationContext,
    ) -> Self {
        Self {
            nodes,
            expressions,
            inputs,
            output,
            parameters,
            context,
        }
    }

    pub fn nodes(&self) -> &NodeArena {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    pub fn output(&self) -> NodeId {
        self.output
    }

    pub fn expression_count(&self) -> usize {
        self.expressions.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Evaluates every expression in ascending order and returns the output sequence.
    ///
    /// `inputs` are matched positionally with the inputs declared by the
    /// forward definition. A single-index input accepts exactly one tensor.
    pub fn forward(&mut self, inputs: &[Sequence]) -> AutotraceResult<Sequence> {
        if inputs.len() != self.inputs.len() {
            return Err(AutotraceError::InvalidInput(format!(
                "Procedure expects {} inputs, got {}",
                self.inputs.len(),
                inputs.len()
            )));
        }

        for node in self.nodes.iter_mut() {
            if matches!(node.kind(), NodeKind::Input | NodeKind::Intermediate) {
                node.reset_values();
            }
            node.reset_gradients();
        }

        for (&id, sequence) in self.inputs.iter().zip(inputs) {
            let node = &mut self.nodes[id];
            if sequence.is_empty() || (!node.is_multi_index() && sequence.len() != 1) {
                return Err(AutotraceError::InvalidInput(format!(
                    "Input '{}' received {} entries",
                    node.name(),
                    sequence.len()
                )));
            }
            for (index, tensor) in sequence.iter() {
                node.set_matrix(index, tensor.clone());
            }
        }

        for expression in self.expressions.iter_mut() {
            trace!("forward {}", expression.describe(&self.nodes));
            expression
                .calculate_expression(&mut self.nodes, &mut self.context)
                .with_context(|| ErrorContext::new("forward").with_expression(&expression.describe(&self.nodes)))?;
        }

        Ok(self.nodes[self.output].values())
    }

    /// Single-input, single-index forward
    pub fn calculate_expression(&mut self, input: &Tensor) -> AutotraceResult<Tensor> {
        let output = self.forward(&[Sequence::single(input.clone())])?;
        output
            .first()
            .cloned()
            .ok_or_else(|| AutotraceError::undefined_reference("Output value", 0))
    }

    /// Propagates `output_gradient` back to every input, in descending expression order.
    ///
    /// Output positions missing from `output_gradient` are seeded with zeros.
    /// Returns one gradient sequence per input. On failure every partially
    /// deposited gradient is cleared before the error is returned.
    pub fn backward(&mut self, output_gradient: &Sequence) -> AutotraceResult<Vec<Sequence>> {
        match self.propagate(output_gradient) {
            Ok(()) => self.input_gradients(),
            Err(error) => {
                self.reset_gradients();
                warn!("Backward pass aborted: {}", error);
                Err(error)
            }
        }
    }

    fn propagate(&mut self, output_gradient: &Sequence) -> AutotraceResult<()> {
        self.reset_gradients();

        let output = &mut self.nodes[self.output];
        for index in output.key_set() {
            let value = output.matrix(index)?;
            let seed = match output_gradient.get(index) {
                Some(seed) if seed.shape() != value.shape() => {
                    return Err(AutotraceError::dimension_mismatch(
                        "backward",
                        &value.shape().to_string(),
                        &seed.shape().to_string(),
                    ));
                }
                Some(seed) => seed.clone(),
                None => value.zeros_like(),
            };
            output.update_gradient(index, &seed, false)?;
        }

        for expression in self.expressions.iter_mut().rev() {
            trace!("backward {}", expression.describe_gradient(&self.nodes));
            expression
                .calculate_gradient(&mut self.nodes)
                .with_context(|| ErrorContext::new("backward").with_expression(&expression.describe(&self.nodes)))?;
        }
        Ok(())
    }

    fn input_gradients(&self) -> AutotraceResult<Vec<Sequence>> {
        self.inputs
            .iter()
            .map(|&id| {
                let node = &self.nodes[id];
                node.key_set()
                    .into_iter()
                    .map(|index| -> AutotraceResult<(usize, Tensor)> {
                        let gradient = if node.has_gradient(index) {
                            node.gradient(index)?.clone()
                        } else {
                            node.matrix(index)?.zeros_like()
                        };
                        Ok((index, gradient))
                    })
                    .collect::<AutotraceResult<Sequence>>()
            })
            .collect()
    }

    /// Single-input, single-index backward
    pub fn calculate_gradient(&mut self, output_gradient: &Tensor) -> AutotraceResult<Tensor> {
        let gradients = self.backward(&Sequence::single(output_gradient.clone()))?;
        gradients
            .first()
            .and_then(Sequence::first)
            .cloned()
            .ok_or_else(|| AutotraceError::undefined_reference("Input gradient", 0))
    }

    fn parameter_node(&self, parameter: &Tensor) -> AutotraceResult<NodeId> {
        self.parameters.get(&parameter.id()).copied().ok_or_else(|| {
            AutotraceError::InvalidInput(format!("Tensor {} is not a parameter of this procedure", parameter.id()))
        })
    }

    /// Copies the current contents of a registered parameter into its node.
    pub fn update_parameter(&mut self, parameter: &Tensor) -> AutotraceResult<()> {
        let id = self.parameter_node(parameter)?;
        let node = &mut self.nodes[id];
        let current = node.value()?;
        if current.shape() != parameter.shape() {
            return Err(AutotraceError::dimension_mismatch(
                "update_parameter",
                &current.shape().to_string(),
                &parameter.shape().to_string(),
            ));
        }
        node.set_value(parameter.clone());
        Ok(())
    }

    /// Gradient accumulated on a registered parameter by the last backward pass
    pub fn parameter_gradient(&self, parameter: &Tensor) -> AutotraceResult<Tensor> {
        let node = &self.nodes[self.parameter_node(parameter)?];
        if node.has_gradient(0) {
            Ok(node.gradient(0)?.clone())
        } else {
            Ok(parameter.zeros_like())
        }
    }

    /// Clears every input and intermediate value, every gradient and every expression cache.
    pub fn reset(&mut self) {
        for node in self.nodes.iter_mut() {
            if matches!(node.kind(), NodeKind::Input | NodeKind::Intermediate) {
                node.reset_values();
            }
            node.reset_gradients();
        }
        for expression in self.expressions.iter_mut() {
            expression.reset();
        }
    }

    pub fn reset_gradients(&mut self) {
        for node in self.nodes.iter_mut() {
            node.reset_gradients();
        }
    }

    /// Forward chain, one expression per line in evaluation order
    pub fn expression_chain(&self) -> String {
        self.expressions
            .iter()
            .map(|expression| expression.describe(&self.nodes))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Backward chain, one expression per line in evaluation order
    pub fn gradient_chain(&self) -> String {
        self.expressions
            .iter()
            .rev()
            .map(|expression| expression.describe_gradient(&self.nodes))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn log_chains(&self) {
        debug!("Expression chain:\n{}", self.expression_chain());
        debug!("Gradient chain:\n{}", self.gradient_chain());
    }
}
