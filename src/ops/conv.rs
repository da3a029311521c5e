//! Convolution operations

use super::window::{execute_window, WindowCell, WindowOperation};
use crate::config::WindowConfig;
use crate::error::{AutotraceError, AutotraceResult};
use crate::tensor::{Shape, Tensor};

/// Depth slice of the filter used for an input depth; single-depth filters are shared.
fn filter_depth(filter: &Tensor, depth: usize) -> usize {
    if filter.depth() == 1 {
        0
    } else {
        depth
    }
}

fn check_filter(input: &Tensor, filter: &Tensor) -> AutotraceResult<()> {
    if filter.depth() != 1 && filter.depth() != input.depth() {
        return Err(AutotraceError::dimension_mismatch(
            "convolve",
            &format!("filter depth 1 or {}", input.depth()),
            &format!("filter depth {}", filter.depth()),
        ));
    }
    Ok(())
}

/// Cross-correlation of an input with a depthwise filter
struct ConvolutionOperation<'a> {
    filter: &'a Tensor,
    result: Tensor,
}

impl WindowOperation for ConvolutionOperation<'_> {
    fn apply_operation(&mut self, cell: WindowCell, value: f64) {
        let weight = self
            .filter
            .active_value(cell.filter_row, cell.filter_column, filter_depth(self.filter, cell.depth));
        self.result.increment_value(cell.row, cell.column, cell.depth, value * weight);
    }
}

/// Routes an output gradient back onto every input sample it was computed from
struct ConvolutionInputGradient<'a> {
    filter: &'a Tensor,
    output_gradient: &'a Tensor,
    result: Tensor,
}

impl WindowOperation for ConvolutionInputGradient<'_> {
    fn apply_operation(&mut self, cell: WindowCell, _value: f64) {
        let weight = self
            .filter
            .active_value(cell.filter_row, cell.filter_column, filter_depth(self.filter, cell.depth));
        let gradient = self.output_gradient.value(cell.row, cell.column, cell.depth);
        self.result
            .increment_value(cell.input_row, cell.input_column, cell.depth, gradient * weight);
    }
}

/// Accumulates `output gradient × input sample` per filter weight
struct ConvolutionFilterGradient<'a> {
    output_gradient: &'a Tensor,
    result: Tensor,
}

impl WindowOperation for ConvolutionFilterGradient<'_> {
    fn apply_operation(&mut self, cell: WindowCell, value: f64) {
        let gradient = self.output_gradient.value(cell.row, cell.column, cell.depth);
        let depth = filter_depth(&self.result, cell.depth);
        self.result
            .increment_value(cell.filter_row, cell.filter_column, depth, gradient * value);
    }
}

impl Tensor {
    /// Convolves this tensor with `filter` without padding.
    ///
    /// The filter slides without flipping. A filter of depth 1 is applied to
    /// every input depth, otherwise depths are paired one to one.
    pub fn convolve(&self, filter: &Tensor, stride: usize, dilation: usize) -> AutotraceResult<Tensor> {
        check_filter(self, filter)?;
        let config = WindowConfig::for_filter(filter.shape(), stride, dilation)?;
        let mut operation = ConvolutionOperation {
            filter,
            result: Tensor::zeros(config.output_shape(self.shape())?),
        };
        execute_window(&mut operation, &config, self)?;
        Ok(operation.result)
    }

    /// Gradient of a convolution with respect to its input
    pub fn convolve_input_gradient(
        &self,
        filter: &Tensor,
        output_gradient: &Tensor,
        stride: usize,
        dilation: usize,
    ) -> AutotraceResult<Tensor> {
        check_filter(self, filter)?;
        let config = WindowConfig::for_filter(filter.shape(), stride, dilation)?;
        check_gradient_shape("convolve_input_gradient", &config, self, output_gradient)?;
        let mut operation = ConvolutionInputGradient {
            filter,
            output_gradient,
            result: self.zeros_like(),
        };
        execute_window(&mut operation, &config, self)?;
        Ok(operation.result)
    }

    /// Gradient of a convolution with respect to its filter
    pub fn convolve_filter_gradient(
        &self,
        filter: &Tensor,
        output_gradient: &Tensor,
        stride: usize,
        dilation: usize,
    ) -> AutotraceResult<Tensor> {
        check_filter(self, filter)?;
        let config = WindowConfig::for_filter(filter.shape(), stride, dilation)?;
        check_gradient_shape("convolve_filter_gradient", &config, self, output_gradient)?;
        let mut operation = ConvolutionFilterGradient {
            output_gradient,
            result: filter.zeros_like(),
        };
        execute_window(&mut operation, &config, self)?;
        Ok(operation.result)
    }
}

pub(crate) fn check_gradient_shape(
    operation: &str,
    config: &WindowConfig,
    input: &Tensor,
    output_gradient: &Tensor,
) -> AutotraceResult<Shape> {
    let expected = config.output_shape(input.shape())?;
    if output_gradient.shape() != expected {
        return Err(AutotraceError::dimension_mismatch(
            operation,
            &expected.to_string(),
            &output_gradient.shape().to_string(),
        ));
    }
    Ok(expected)
}
