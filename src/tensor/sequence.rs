//! Time-indexed tensor sequences

use std::collections::BTreeMap;

use super::core::Tensor;
use super::function::UnaryFunction;
use crate::error::{AutotraceError, AutotraceResult};

/// Ordered mapping from sequence position to tensor.
///
/// Positions need not be contiguous; iteration is always in ascending order.
#[derive(Debug, Clone, Default)]
pub struct Sequence {
    entries: BTreeMap<usize, Tensor>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence holding one tensor at position 0
    pub fn single(tensor: Tensor) -> Self {
        let mut sequence = Self::new();
        sequence.insert(0, tensor);
        sequence
    }

    /// Sequence with the tensors at positions 0, 1, 2, ...
    pub fn from_tensors(tensors: Vec<Tensor>) -> Self {
        Self {
            entries: tensors.into_iter().enumerate().collect(),
        }
    }

    pub fn insert(&mut self, index: usize, tensor: Tensor) -> Option<Tensor> {
        self.entries.insert(index, tensor)
    }

    pub fn get(&self, index: usize) -> Option<&Tensor> {
        self.entries.get(&index)
    }

    pub fn keys(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Tensor)> + '_ {
        self.entries.iter().map(|(&index, tensor)| (index, tensor))
    }

    /// Tensor at the lowest position
    pub fn first(&self) -> Option<&Tensor> {
        self.entries.values().next()
    }

    pub fn into_tensors(self) -> Vec<Tensor> {
        self.entries.into_values().collect()
    }

    fn require_first(&self, operation: &str) -> AutotraceResult<&Tensor> {
        self.first()
            .ok_or_else(|| AutotraceError::operation_error(operation, "sequence is empty"))
    }

    /// Elementwise sum over every position
    pub fn sum(&self) -> AutotraceResult<Tensor> {
        let mut result = self.require_first("sequence_sum")?.zeros_like();
        for tensor in self.entries.values() {
            result.add_in_place(tensor)?;
        }
        Ok(result)
    }

    /// Elementwise mean over every position
    pub fn mean(&self) -> AutotraceResult<Tensor> {
        let mut result = self.sum()?;
        result.scale_in_place(1.0 / self.len() as f64);
        Ok(result)
    }

    /// Elementwise sample standard deviation (n − 1 denominator) around `mean`.
    ///
    /// A single-position sequence has zero deviation.
    pub fn standard_deviation(&self, mean: &Tensor) -> AutotraceResult<Tensor> {
        let mut variance = self.require_first("sequence_standard_deviation")?.zeros_like();
        for tensor in self.entries.values() {
            let centered = tensor.subtract(mean)?;
            variance.add_in_place(&centered.multiply(&centered)?)?;
        }
        if self.len() > 1 {
            variance.scale_in_place(1.0 / (self.len() - 1) as f64);
        }
        variance.apply_in_place(UnaryFunction::Sqrt);
        Ok(variance)
    }
}

impl FromIterator<(usize, Tensor)> for Sequence {
    fn from_iter<I: IntoIterator<Item = (usize, Tensor)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Shape;

    fn sequence() -> Sequence {
        Sequence::from_tensors(vec![
            Tensor::from_rows(&[vec![1.0, 10.0]]).unwrap(),
            Tensor::from_rows(&[vec![2.0, 10.0]]).unwrap(),
            Tensor::from_rows(&[vec![3.0, 10.0]]).unwrap(),
            Tensor::from_rows(&[vec![4.0, 10.0]]).unwrap(),
        ])
    }

    #[test]
    fn test_ordering_and_access() {
        let mut sequence = Sequence::new();
        sequence.insert(5, Tensor::scalar(5.0));
        sequence.insert(2, Tensor::scalar(2.0));
        assert_eq!(sequence.keys().collect::<Vec<_>>(), vec![2, 5]);
        assert_eq!(sequence.first().unwrap().scalar_value(), 2.0);
        assert!(sequence.get(3).is_none());
    }

    #[test]
    fn test_elementwise_statistics() {
        let sequence = sequence();
        let mean = sequence.mean().unwrap();
        assert_eq!(mean.data(), &[2.5, 10.0]);

        let std = sequence.standard_deviation(&mean).unwrap();
        assert!((std.value(0, 0, 0) - 1.2909944).abs() < 1e-6);
        assert_eq!(std.value(0, 1, 0), 0.0);

        assert_eq!(sequence.sum().unwrap().data(), &[10.0, 40.0]);
    }

    #[test]
    fn test_empty_sequence_statistics_fail() {
        assert!(Sequence::new().mean().is_err());
        let single = Sequence::single(Tensor::ones(Shape::new(1, 2, 1)));
        let mean = single.mean().unwrap();
        assert_eq!(single.standard_deviation(&mean).unwrap().data(), &[0.0, 0.0]);
    }
}
