//! Inverted dropout over masks

use rand::Rng;

use super::core::{execute, OperationExtent, UnaryCellOperation};
use crate::error::{AutotraceError, AutotraceResult};
use crate::tensor::{Mask, Tensor};

/// Draws a fresh dropout mask for `input` suppressing each cell with `probability`.
pub fn draw_mask<R: Rng + ?Sized>(input: &Tensor, probability: f64, rng: &mut R) -> AutotraceResult<Mask> {
    let mut mask = Mask::new(input.shape());
    mask.set_probability(probability)?;
    mask.mask_by_probability(rng);
    Ok(mask)
}

/// Scales active cells of `source` by the mask's keep compensation; suppressed cells become zero.
///
/// Used for both the forward value and its gradient, so the two always agree
/// on which cells were dropped.
pub fn apply_mask(source: &Tensor, mask: &Mask) -> AutotraceResult<Tensor> {
    if mask.shape() != source.shape() {
        return Err(AutotraceError::dimension_mismatch(
            "dropout",
            &source.shape().to_string(),
            &mask.shape().to_string(),
        ));
    }
    let mut gate = Tensor::zeros(source.shape());
    gate.set_mask_to(mask.clone())?;

    let scale = mask.keep_scale();
    let mut operation = UnaryCellOperation::new(source.shape(), |value| value * scale);
    execute(&mut operation, &OperationExtent::new(source.shape()), source, Some(&gate));
    Ok(operation.into_result())
}

impl Tensor {
    /// Inverted dropout: returns the output and the mask that produced it.
    pub fn dropout<R: Rng + ?Sized>(&self, probability: f64, rng: &mut R) -> AutotraceResult<(Tensor, Mask)> {
        let mask = draw_mask(self, probability, rng)?;
        let output = apply_mask(self, &mask)?;
        Ok((output, mask))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Shape;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_dropout_zeroes_suppressed_and_scales_active() {
        let input = Tensor::from_vec(Shape::new(4, 4, 1), (1..=16).map(f64::from).collect()).unwrap();
        let (output, mask) = input.dropout(0.5, &mut StdRng::seed_from_u64(1)).unwrap();
        assert!(mask.masked_count() > 0 && mask.masked_count() < 16);

        for row in 0..4 {
            for column in 0..4 {
                let value = output.value(row, column, 0);
                if mask.is_masked(row, column, 0) {
                    assert_eq!(value, 0.0);
                } else {
                    assert_eq!(value, input.value(row, column, 0) * 2.0);
                }
            }
        }
    }

    #[test]
    fn test_gradient_uses_same_mask() {
        let input = Tensor::ones(Shape::new(3, 3, 1));
        let (output, mask) = input.dropout(0.5, &mut StdRng::seed_from_u64(9)).unwrap();
        let gradient = apply_mask(&Tensor::ones(input.shape()), &mask).unwrap();
        assert_eq!(gradient.data(), output.data());
    }

    #[test]
    fn test_invalid_probability() {
        let input = Tensor::ones(Shape::new(2, 2, 1));
        assert!(input.dropout(1.0, &mut StdRng::seed_from_u64(0)).is_err());
        let mask = Mask::new(Shape::new(3, 1, 1));
        assert!(apply_mask(&input, &mask).is_err());
    }
}
