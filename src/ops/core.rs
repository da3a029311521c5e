//! Core operation traits: strided, mask-aware iteration over a tensor's index space

use crate::tensor::{Shape, Tensor};

/// Per-cell callback driven by [`execute`].
pub trait CellOperation {
    /// Called for every visited cell when neither operand carries a mask.
    fn apply(&mut self, row: usize, column: usize, depth: usize, value: f64);

    /// Called for every visited, unsuppressed cell when an operand carries a mask.
    fn apply_masked(&mut self, row: usize, column: usize, depth: usize, value: f64) {
        self.apply(row, column, depth, value);
    }
}

/// Index space visited by a cell operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationExtent {
    pub shape: Shape,
    pub stride: usize,
    /// When false the callback receives 0 instead of the first operand's value.
    pub provide_value: bool,
}

impl OperationExtent {
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            stride: 1,
            provide_value: true,
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride.max(1);
        self
    }

    pub fn without_value(mut self) -> Self {
        self.provide_value = false;
        self
    }
}

/// Drives `operation` over every (depth, row, column) of `extent`.
///
/// Without masks every coordinate is visited. If `first` or `second` carries a
/// mask, coordinates suppressed in either operand are skipped, so whatever the
/// operation writes there keeps its default.
pub fn execute<O: CellOperation + ?Sized>(
    operation: &mut O,
    extent: &OperationExtent,
    first: &Tensor,
    second: Option<&Tensor>,
) {
    let masked = first.has_mask() || second.map_or(false, |s| s.has_mask());
    let shape = extent.shape;
    let stride = extent.stride.max(1);

    for depth in 0..shape.depth {
        for row in (0..shape.rows).step_by(stride) {
            for column in (0..shape.columns).step_by(stride) {
                let value = if extent.provide_value {
                    first.broadcast_value(row, column, depth)
                } else {
                    0.0
                };
                if !masked {
                    operation.apply(row, column, depth, value);
                } else if !has_mask_at(row, column, depth, first, second) {
                    operation.apply_masked(row, column, depth, value);
                }
            }
        }
    }
}

fn has_mask_at(row: usize, column: usize, depth: usize, first: &Tensor, second: Option<&Tensor>) -> bool {
    first.has_mask_at(row, column, depth) || second.map_or(false, |s| s.has_mask_at(row, column, depth))
}

/// Writes `function(first, second)` per cell into a fresh result tensor.
pub struct BinaryCellOperation<'a, F>
where
    F: Fn(f64, f64) -> f64,
{
    other: &'a Tensor,
    function: F,
    result: Tensor,
}

impl<'a, F> BinaryCellOperation<'a, F>
where
    F: Fn(f64, f64) -> f64,
{
    pub fn new(other: &'a Tensor, shape: Shape, function: F) -> Self {
        Self {
            other,
            function,
            result: Tensor::zeros(shape),
        }
    }

    pub fn into_result(self) -> Tensor {
        self.result
    }
}

impl<'a, F> CellOperation for BinaryCellOperation<'a, F>
where
    F: Fn(f64, f64) -> f64,
{
    fn apply(&mut self, row: usize, column: usize, depth: usize, value: f64) {
        let other = self.other.broadcast_value(row, column, depth);
        self.result.set_value(row, column, depth, (self.function)(value, other));
    }
}

/// Writes `function(value)` per cell into a fresh result tensor.
pub struct UnaryCellOperation<F>
where
    F: Fn(f64) -> f64,
{
    function: F,
    result: Tensor,
}

impl<F> UnaryCellOperation<F>
where
    F: Fn(f64) -> f64,
{
    pub fn new(shape: Shape, function: F) -> Self {
        Self {
            function,
            result: Tensor::zeros(shape),
        }
    }

    pub fn into_result(self) -> Tensor {
        self.result
    }
}

impl<F> CellOperation for UnaryCellOperation<F>
where
    F: Fn(f64) -> f64,
{
    fn apply(&mut self, row: usize, column: usize, depth: usize, value: f64) {
        self.result.set_value(row, column, depth, (self.function)(value));
    }
}

/// Folds every visited cell value into an accumulator.
pub struct FoldOperation<F>
where
    F: Fn(f64, f64) -> f64,
{
    accumulator: f64,
    function: F,
}

impl<F> FoldOperation<F>
where
    F: Fn(f64, f64) -> f64,
{
    pub fn new(initial: f64, function: F) -> Self {
        Self {
            accumulator: initial,
            function,
        }
    }

    pub fn value(&self) -> f64 {
        self.accumulator
    }
}

impl<F> CellOperation for FoldOperation<F>
where
    F: Fn(f64, f64) -> f64,
{
    fn apply(&mut self, _row: usize, _column: usize, _depth: usize, value: f64) {
        self.accumulator = (self.function)(self.accumulator, value);
    }
}
