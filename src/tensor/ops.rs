//! Tensor arithmetic, reductions and structural helpers
//!
//! Every elementwise operation and reduction is driven through
//! [`crate::ops::core::execute`], so masks attached to an operand are honoured
//! uniformly: suppressed cells are skipped and read as zero.

use super::core::{Shape, Tensor};
use super::function::UnaryFunction;
use crate::error::{AutotraceError, AutotraceResult};
use crate::ops::core::{execute, BinaryCellOperation, FoldOperation, OperationExtent, UnaryCellOperation};

impl Tensor {
    fn elementwise<F>(&self, other: &Tensor, operation: &str, function: F) -> AutotraceResult<Tensor>
    where
        F: Fn(f64, f64) -> f64,
    {
        let shape = self.shape().broadcast(&other.shape(), operation)?;
        let mut cell = BinaryCellOperation::new(other, shape, function);
        execute(&mut cell, &OperationExtent::new(shape), self, Some(other));
        Ok(cell.into_result())
    }

    /// Applies `function` to every active cell; suppressed cells stay zero.
    pub fn map<F>(&self, function: F) -> Tensor
    where
        F: Fn(f64) -> f64,
    {
        let mut cell = UnaryCellOperation::new(self.shape(), function);
        execute(&mut cell, &OperationExtent::new(self.shape()), self, None);
        cell.into_result()
    }

    fn assign(&mut self, result: Tensor, operation: &str) -> AutotraceResult<()> {
        if result.shape() != self.shape() {
            return Err(AutotraceError::dimension_mismatch(
                operation,
                &self.shape().to_string(),
                &result.shape().to_string(),
            ));
        }
        self.data_mut().copy_from_slice(result.data());
        Ok(())
    }

    pub fn add(&self, other: &Tensor) -> AutotraceResult<Tensor> {
        self.elementwise(other, "add", |a, b| a + b)
    }

    pub fn subtract(&self, other: &Tensor) -> AutotraceResult<Tensor> {
        self.elementwise(other, "subtract", |a, b| a - b)
    }

    pub fn multiply(&self, other: &Tensor) -> AutotraceResult<Tensor> {
        self.elementwise(other, "multiply", |a, b| a * b)
    }

    pub fn divide(&self, other: &Tensor) -> AutotraceResult<Tensor> {
        self.elementwise(other, "divide", |a, b| a / b)
    }

    /// Elementwise `self ^ other`
    pub fn power(&self, other: &Tensor) -> AutotraceResult<Tensor> {
        self.elementwise(other, "power", f64::powf)
    }

    pub fn add_scalar(&self, value: f64) -> Tensor {
        self.map(|a| a + value)
    }

    pub fn subtract_scalar(&self, value: f64) -> Tensor {
        self.map(|a| a - value)
    }

    pub fn multiply_scalar(&self, value: f64) -> Tensor {
        self.map(|a| a * value)
    }

    pub fn divide_scalar(&self, value: f64) -> Tensor {
        self.map(|a| a / value)
    }

    pub fn power_scalar(&self, exponent: f64) -> Tensor {
        self.map(|a| a.powf(exponent))
    }

    pub fn add_in_place(&mut self, other: &Tensor) -> AutotraceResult<()> {
        let result = self.add(other)?;
        self.assign(result, "add_in_place")
    }

    pub fn subtract_in_place(&mut self, other: &Tensor) -> AutotraceResult<()> {
        let result = self.subtract(other)?;
        self.assign(result, "subtract_in_place")
    }

    pub fn multiply_in_place(&mut self, other: &Tensor) -> AutotraceResult<()> {
        let result = self.multiply(other)?;
        self.assign(result, "multiply_in_place")
    }

    pub fn divide_in_place(&mut self, other: &Tensor) -> AutotraceResult<()> {
        let result = self.divide(other)?;
        self.assign(result, "divide_in_place")
    }

    pub fn power_in_place(&mut self, other: &Tensor) -> AutotraceResult<()> {
        let result = self.power(other)?;
        self.assign(result, "power_in_place")
    }

    fn map_in_place<F>(&mut self, function: F)
    where
        F: Fn(f64) -> f64,
    {
        let result = self.map(function);
        self.data_mut().copy_from_slice(result.data());
    }

    pub fn add_scalar_in_place(&mut self, value: f64) {
        self.map_in_place(|a| a + value);
    }

    pub fn subtract_scalar_in_place(&mut self, value: f64) {
        self.map_in_place(|a| a - value);
    }

    pub fn multiply_scalar_in_place(&mut self, value: f64) {
        self.map_in_place(|a| a * value);
    }

    pub fn divide_scalar_in_place(&mut self, value: f64) {
        self.map_in_place(|a| a / value);
    }

    pub fn power_scalar_in_place(&mut self, exponent: f64) {
        self.map_in_place(|a| a.powf(exponent));
    }

    /// Multiplies every cell by `factor`, masked or not.
    pub fn scale_in_place(&mut self, factor: f64) {
        self.data_mut().iter_mut().for_each(|value| *value *= factor);
    }

    pub fn apply(&self, function: UnaryFunction) -> Tensor {
        self.map(|x| function.value(x))
    }

    pub fn apply_derivative(&self, function: UnaryFunction) -> Tensor {
        self.map(|x| function.derivative(x))
    }

    pub fn apply_in_place(&mut self, function: UnaryFunction) {
        self.map_in_place(|x| function.value(x));
    }

    /// Sum of every active cell
    pub fn sum(&self) -> f64 {
        let mut fold = FoldOperation::new(0.0, |accumulator, value| accumulator + value);
        execute(&mut fold, &OperationExtent::new(self.shape()), self, None);
        fold.value()
    }

    /// Sum divided by the full element count
    pub fn mean(&self) -> f64 {
        self.sum() / self.size() as f64
    }

    /// p-norm `(Σ|x|^p)^(1/p)`
    pub fn norm(&self, p: f64) -> f64 {
        let mut fold = FoldOperation::new(0.0, |accumulator, value: f64| accumulator + value.abs().powf(p));
        execute(&mut fold, &OperationExtent::new(self.shape()), self, None);
        fold.value().powf(1.0 / p)
    }

    /// Sample variance around `mean`; zero for single-element tensors.
    pub fn variance(&self, mean: f64) -> f64 {
        let n = self.size();
        if n < 2 {
            return 0.0;
        }
        let mut fold = FoldOperation::new(0.0, |accumulator, value: f64| accumulator + (value - mean).powi(2));
        execute(&mut fold, &OperationExtent::new(self.shape()), self, None);
        fold.value() / (n - 1) as f64
    }

    /// Sample standard deviation around `mean` (n − 1 denominator)
    pub fn standard_deviation(&self, mean: f64) -> f64 {
        self.variance(mean).sqrt()
    }

    pub fn sum_as_matrix(&self) -> Tensor {
        Tensor::scalar(self.sum())
    }

    pub fn mean_as_matrix(&self) -> Tensor {
        Tensor::scalar(self.mean())
    }

    pub fn norm_as_matrix(&self, p: f64) -> Tensor {
        Tensor::scalar(self.norm(p))
    }

    pub fn standard_deviation_as_matrix(&self, mean: f64) -> Tensor {
        Tensor::scalar(self.standard_deviation(mean))
    }

    /// `self · g / ‖self‖₂`, the weight normalization reparameterization.
    pub fn weight_normalized(&self, g: f64) -> AutotraceResult<Tensor> {
        let norm = self.norm(2.0);
        if norm == 0.0 {
            return Err(AutotraceError::operation_error(
                "weight_normalized",
                "cannot normalize a tensor with zero norm",
            ));
        }
        Ok(self.multiply_scalar(g / norm))
    }

    /// Matrix product over rows × columns, applied independently per depth slice.
    pub fn dot(&self, other: &Tensor) -> AutotraceResult<Tensor> {
        if self.columns() != other.rows() || self.depth() != other.depth() {
            return Err(AutotraceError::dimension_mismatch(
                "dot",
                &format!("{} rows and depth {}", self.columns(), self.depth()),
                &format!("{} rows and depth {}", other.rows(), other.depth()),
            ));
        }
        let mut result = Tensor::zeros(Shape::new(self.rows(), other.columns(), self.depth()));
        for depth in 0..self.depth() {
            for row in 0..self.rows() {
                for inner in 0..self.columns() {
                    let left = self.active_value(row, inner, depth);
                    for column in 0..other.columns() {
                        result.increment_value(row, column, depth, left * other.active_value(inner, column, depth));
                    }
                }
            }
        }
        Ok(result)
    }

    pub fn transpose(&self) -> Tensor {
        let mut result = Tensor::zeros(Shape::new(self.columns(), self.rows(), self.depth()));
        for depth in 0..self.depth() {
            for row in 0..self.rows() {
                for column in 0..self.columns() {
                    result.set_value(column, row, depth, self.active_value(row, column, depth));
                }
            }
        }
        result
    }

    /// Reduces a gradient computed for a broadcast result back onto `shape`.
    pub fn sum_to_shape(&self, shape: Shape) -> AutotraceResult<Tensor> {
        if self.shape() == shape {
            Ok(self.clone())
        } else if shape.is_scalar() {
            Ok(self.sum_as_matrix())
        } else {
            Err(AutotraceError::dimension_mismatch(
                "sum_to_shape",
                &shape.to_string(),
                &self.shape().to_string(),
            ))
        }
    }

    /// Copy of this tensor with every cell suppressed in `gate` set to zero.
    pub fn gate_by(&self, gate: &Tensor) -> AutotraceResult<Tensor> {
        if !gate.has_mask() {
            return Ok(self.clone());
        }
        self.elementwise(gate, "gate_by", |value, _| value)
    }

    /// Cell value, or zero when the cell is suppressed
    pub fn active_value(&self, row: usize, column: usize, depth: usize) -> f64 {
        if self.has_mask_at(row, column, depth) {
            0.0
        } else {
            self.value(row, column, depth)
        }
    }
}
