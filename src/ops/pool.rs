//! Max and average pooling

use super::conv::check_gradient_shape;
use super::window::{execute_window, WindowCell, WindowOperation};
use crate::config::WindowConfig;
use crate::error::{AutotraceError, AutotraceResult};
use crate::tensor::{Shape, Tensor};

/// Input coordinate that won each output cell of a max pool.
///
/// `None` marks an output cell whose whole window was suppressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolIndices {
    shape: Shape,
    winners: Vec<Option<(usize, usize)>>,
}

impl PoolIndices {
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            winners: vec![None; shape.total_elements()],
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Winning (input row, input column) for an output cell
    pub fn get(&self, row: usize, column: usize, depth: usize) -> Option<(usize, usize)> {
        self.winners[self.shape.offset(row, column, depth)]
    }

    fn record(&mut self, row: usize, column: usize, depth: usize, winner: (usize, usize)) {
        let offset = self.shape.offset(row, column, depth);
        self.winners[offset] = Some(winner);
    }
}

struct MaxPoolOperation {
    result: Tensor,
    indices: PoolIndices,
    current: Option<(f64, usize, usize)>,
}

impl WindowOperation for MaxPoolOperation {
    fn start_operation(&mut self, _row: usize, _column: usize, _depth: usize) {
        self.current = None;
    }

    fn apply_operation(&mut self, cell: WindowCell, value: f64) {
        let better = match self.current {
            Some((max, _, _)) => value > max,
            None => true,
        };
        if better {
            self.current = Some((value, cell.input_row, cell.input_column));
        }
    }

    fn finish_operation(&mut self, row: usize, column: usize, depth: usize) {
        if let Some((max, input_row, input_column)) = self.current.take() {
            self.result.set_value(row, column, depth, max);
            self.indices.record(row, column, depth, (input_row, input_column));
        }
    }
}

struct AveragePoolOperation {
    result: Tensor,
    scale: f64,
}

impl WindowOperation for AveragePoolOperation {
    fn apply_operation(&mut self, cell: WindowCell, value: f64) {
        self.result.increment_value(cell.row, cell.column, cell.depth, value * self.scale);
    }
}

struct AveragePoolGradient<'a> {
    output_gradient: &'a Tensor,
    result: Tensor,
    scale: f64,
}

impl WindowOperation for AveragePoolGradient<'_> {
    fn apply_operation(&mut self, cell: WindowCell, _value: f64) {
        let gradient = self.output_gradient.value(cell.row, cell.column, cell.depth);
        self.result
            .increment_value(cell.input_row, cell.input_column, cell.depth, gradient * self.scale);
    }
}

impl Tensor {
    /// Max pool over each window, recording the winning input coordinate.
    ///
    /// Ties keep the first sample in row-major window order.
    pub fn max_pool(&self, config: &WindowConfig) -> AutotraceResult<(Tensor, PoolIndices)> {
        let output = config.output_shape(self.shape())?;
        let mut operation = MaxPoolOperation {
            result: Tensor::zeros(output),
            indices: PoolIndices::new(output),
            current: None,
        };
        execute_window(&mut operation, config, self)?;
        Ok((operation.result, operation.indices))
    }

    /// Routes each output gradient to the recorded winning input cell only.
    pub fn max_pool_gradient(&self, output_gradient: &Tensor, indices: &PoolIndices) -> AutotraceResult<Tensor> {
        if output_gradient.shape() != indices.shape() {
            return Err(AutotraceError::dimension_mismatch(
                "max_pool_gradient",
                &indices.shape().to_string(),
                &output_gradient.shape().to_string(),
            ));
        }
        let mut result = self.zeros_like();
        let shape = indices.shape();
        for depth in 0..shape.depth {
            for row in 0..shape.rows {
                for column in 0..shape.columns {
                    if let Some((input_row, input_column)) = indices.get(row, column, depth) {
                        let gradient = output_gradient.value(row, column, depth);
                        result.increment_value(input_row, input_column, depth, gradient);
                    }
                }
            }
        }
        Ok(result)
    }

    /// Average over each window; suppressed samples add nothing but still count.
    pub fn average_pool(&self, config: &WindowConfig) -> AutotraceResult<Tensor> {
        let mut operation = AveragePoolOperation {
            result: Tensor::zeros(config.output_shape(self.shape())?),
            scale: window_scale(config),
        };
        execute_window(&mut operation, config, self)?;
        Ok(operation.result)
    }

    pub fn average_pool_gradient(&self, output_gradient: &Tensor, config: &WindowConfig) -> AutotraceResult<Tensor> {
        check_gradient_shape("average_pool_gradient", config, self, output_gradient)?;
        let mut operation = AveragePoolGradient {
            output_gradient,
            result: self.zeros_like(),
            scale: window_scale(config),
        };
        execute_window(&mut operation, config, self)?;
        Ok(operation.result)
    }
}

fn window_scale(config: &WindowConfig) -> f64 {
    1.0 / (config.filter_rows * config.filter_columns) as f64
}
