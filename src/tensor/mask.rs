use rand::Rng;

use super::core::Shape;
use crate::error::{AutotraceError, AutotraceResult};

/// Per-cell suppression flags parallel to a tensor.
///
/// A suppressed cell is skipped by the windowed operation framework and reads
/// as zero. The optional probability drives random masking and the inverted
/// dropout compensation factor.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    shape: Shape,
    suppressed: Vec<bool>,
    probability: f64,
}

impl Mask {
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            suppressed: vec![false; shape.total_elements()],
            probability: 0.0,
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn set_probability(&mut self, probability: f64) -> AutotraceResult<()> {
        if !(0.0..1.0).contains(&probability) {
            return Err(AutotraceError::configuration(&format!(
                "Mask probability must be in [0, 1), got {}",
                probability
            )));
        }
        self.probability = probability;
        Ok(())
    }

    /// Factor applied to active cells so the expected activation is unchanged.
    pub fn keep_scale(&self) -> f64 {
        1.0 / (1.0 - self.probability)
    }

    pub fn mask(&mut self, row: usize, column: usize, depth: usize) {
        let offset = self.shape.offset(row, column, depth);
        self.suppressed[offset] = true;
    }

    pub fn unmask(&mut self, row: usize, column: usize, depth: usize) {
        let offset = self.shape.offset(row, column, depth);
        self.suppressed[offset] = false;
    }

    pub fn is_masked(&self, row: usize, column: usize, depth: usize) -> bool {
        self.suppressed[self.shape.offset(row, column, depth)]
    }

    /// Redraws every cell: suppressed with the mask probability, active otherwise.
    pub fn mask_by_probability<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let probability = self.probability;
        for cell in self.suppressed.iter_mut() {
            *cell = rng.gen::<f64>() < probability;
        }
    }

    pub fn clear(&mut self) {
        self.suppressed.iter_mut().for_each(|cell| *cell = false);
    }

    pub fn masked_count(&self) -> usize {
        self.suppressed.iter().filter(|&&cell| cell).count()
    }
}
