//! Receptive-field iteration for convolution and pooling

use crate::config::WindowConfig;
use crate::error::AutotraceResult;
use crate::tensor::{Shape, Tensor};

/// Coordinates of one sample inside one output cell's receptive field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCell {
    pub row: usize,
    pub column: usize,
    pub depth: usize,
    pub input_row: usize,
    pub input_column: usize,
    pub filter_row: usize,
    pub filter_column: usize,
}

/// Per-window callback driven by [`execute_window`].
///
/// `start_operation` and `finish_operation` bracket the scan over a single
/// output cell, so running state such as an extremum can be reset and committed.
pub trait WindowOperation {
    fn start_operation(&mut self, _row: usize, _column: usize, _depth: usize) {}

    fn apply_operation(&mut self, cell: WindowCell, value: f64);

    /// Called instead of `apply_operation` for unsuppressed samples of a masked input.
    fn apply_masked_operation(&mut self, cell: WindowCell, value: f64) {
        self.apply_operation(cell, value);
    }

    fn finish_operation(&mut self, _row: usize, _column: usize, _depth: usize) {}
}

/// Scans every output cell of `config` over `input`, returning the output shape.
///
/// Output cells advance by the stride; samples inside a window are spaced by
/// the dilation. Suppressed input samples are skipped entirely.
pub fn execute_window<O: WindowOperation + ?Sized>(
    operation: &mut O,
    config: &WindowConfig,
    input: &Tensor,
) -> AutotraceResult<Shape> {
    let output = config.output_shape(input.shape())?;
    let masked = input.has_mask();

    for depth in 0..output.depth {
        for row in 0..output.rows {
            for column in 0..output.columns {
                operation.start_operation(row, column, depth);
                for filter_row in 0..config.filter_rows {
                    for filter_column in 0..config.filter_columns {
                        let input_row = row * config.stride + filter_row * config.dilation;
                        let input_column = column * config.stride + filter_column * config.dilation;
                        let cell = WindowCell {
                            row,
                            column,
                            depth,
                            input_row,
                            input_column,
                            filter_row,
                            filter_column,
                        };
                        let value = input.value(input_row, input_column, depth);
                        if !masked {
                            operation.apply_operation(cell, value);
                        } else if !input.has_mask_at(input_row, input_column, depth) {
                            operation.apply_masked_operation(cell, value);
                        }
                    }
                }
                operation.finish_operation(row, column, depth);
            }
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        windows: Vec<Vec<(usize, usize)>>,
        current: Vec<(usize, usize)>,
    }

    impl WindowOperation for Recorder {
        fn start_operation(&mut self, _row: usize, _column: usize, _depth: usize) {
            self.current.clear();
        }

        fn apply_operation(&mut self, cell: WindowCell, _value: f64) {
            self.current.push((cell.input_row, cell.input_column));
        }

        fn finish_operation(&mut self, _row: usize, _column: usize, _depth: usize) {
            self.windows.push(std::mem::take(&mut self.current));
        }
    }

    #[test]
    fn test_strided_windows() {
        let input = Tensor::zeros(Shape::new(4, 4, 1));
        let mut recorder = Recorder::default();
        let config = WindowConfig::new(2, 2, 2, 1).unwrap();
        let output = execute_window(&mut recorder, &config, &input).unwrap();
        assert_eq!(output, Shape::new(2, 2, 1));
        assert_eq!(recorder.windows.len(), 4);
        assert_eq!(recorder.windows[3], vec![(2, 2), (2, 3), (3, 2), (3, 3)]);
    }

    #[test]
    fn test_dilated_window_samples_with_gaps() {
        let input = Tensor::zeros(Shape::new(3, 3, 1));
        let mut recorder = Recorder::default();
        let config = WindowConfig::new(2, 2, 1, 2).unwrap();
        execute_window(&mut recorder, &config, &input).unwrap();
        assert_eq!(recorder.windows, vec![vec![(0, 0), (0, 2), (2, 0), (2, 2)]]);
    }

    #[test]
    fn test_masked_samples_are_skipped() {
        let mut input = Tensor::zeros(Shape::new(2, 2, 1));
        input.set_mask();
        input.mask_mut().unwrap().mask(0, 1, 0);
        let mut recorder = Recorder::default();
        execute_window(&mut recorder, &WindowConfig::new(2, 2, 1, 1).unwrap(), &input).unwrap();
        assert_eq!(recorder.windows[0], vec![(0, 0), (1, 0), (1, 1)]);
    }
}
