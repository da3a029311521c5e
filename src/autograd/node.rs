//! Graph slots holding tensor values and accumulated gradients

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::ops::{Index, IndexMut};

use crate::error::{AutotraceError, AutotraceResult};
use crate::tensor::{Sequence, Tensor, TensorId};

/// Index of a node inside its procedure's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

/// Role a node plays in its procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Fed by the caller on every forward call
    Input,
    /// Externally owned tensor refreshed through `Procedure::update_parameter`
    Parameter(TensorId),
    /// Fixed value captured at trace time; never receives gradients
    Constant,
    /// Result of an expression
    Intermediate,
}

/// One slot of the computation graph.
///
/// A single-index node keeps everything at index 0 and ignores the index it is
/// addressed with, so a weight read at every time step collects the gradients
/// of every step. A multi-index node keeps one entry per sequence position.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    name: String,
    kind: NodeKind,
    multi_index: bool,
    values: BTreeMap<usize, Tensor>,
    gradients: BTreeMap<usize, Tensor>,
}

impl Node {
    pub fn new(id: NodeId, name: &str, kind: NodeKind, multi_index: bool) -> Self {
        Self {
            id,
            name: name.to_string(),
            kind,
            multi_index,
            values: BTreeMap::new(),
            gradients: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_multi_index(&self) -> bool {
        self.multi_index
    }

    pub fn set_multi_index(&mut self, multi_index: bool) {
        self.multi_index = multi_index;
    }

    /// Whether backward passes deposit gradients here
    pub fn receives_gradient(&self) -> bool {
        self.kind != NodeKind::Constant
    }

    fn slot(&self, index: usize) -> usize {
        if self.multi_index {
            index
        } else {
            0
        }
    }

    /// Writes the value at `index`, extending the sequence if needed.
    pub fn set_matrix(&mut self, index: usize, tensor: Tensor) {
        let slot = self.slot(index);
        self.values.insert(slot, tensor);
    }

    pub fn matrix(&self, index: usize) -> AutotraceResult<&Tensor> {
        self.values
            .get(&self.slot(index))
            .ok_or_else(|| AutotraceError::undefined_reference(&format!("Value of node '{}'", self.name), index))
    }

    pub fn has_matrix(&self, index: usize) -> bool {
        self.values.contains_key(&self.slot(index))
    }

    pub fn set_value(&mut self, tensor: Tensor) {
        self.set_matrix(0, tensor);
    }

    pub fn value(&self) -> AutotraceResult<&Tensor> {
        self.matrix(0)
    }

    /// Indices holding a value, ascending
    pub fn key_set(&self) -> Vec<usize> {
        self.values.keys().copied().collect()
    }

    /// Overwrites or adds to the gradient at `index`.
    pub fn update_gradient(&mut self, index: usize, gradient: &Tensor, accumulate: bool) -> AutotraceResult<()> {
        let slot = self.slot(index);
        if accumulate {
            if let Some(existing) = self.gradients.get_mut(&slot) {
                return existing.add_in_place(gradient);
            }
        }
        let mut copy = gradient.clone();
        copy.remove_mask();
        self.gradients.insert(slot, copy);
        Ok(())
    }

    pub fn gradient(&self, index: usize) -> AutotraceResult<&Tensor> {
        self.gradients
            .get(&self.slot(index))
            .ok_or_else(|| AutotraceError::undefined_reference(&format!("Gradient of node '{}'", self.name), index))
    }

    pub fn has_gradient(&self, index: usize) -> bool {
        self.gradients.contains_key(&self.slot(index))
    }

    pub fn gradient_key_set(&self) -> Vec<usize> {
        self.gradients.keys().copied().collect()
    }

    pub fn values(&self) -> Sequence {
        self.values.iter().map(|(&index, tensor)| (index, tensor.clone())).collect()
    }

    pub fn gradients(&self) -> Sequence {
        self.gradients
            .iter()
            .map(|(&index, tensor)| (index, tensor.clone()))
            .collect()
    }

    pub fn reset_values(&mut self) {
        self.values.clear();
    }

    pub fn reset_gradients(&mut self) {
        self.gradients.clear();
    }
}

/// Flat storage for every node of a procedure, addressed by [`NodeId`].
#[derive(Debug, Clone, Default)]
pub struct NodeArena {
    nodes: Vec<Node>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, kind: NodeKind, multi_index: bool) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(id, name, kind, multi_index));
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.iter_mut()
    }
}

impl Index<NodeId> for NodeArena {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }
}

impl IndexMut<NodeId> for NodeArena {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }
}
