//! Core tensor types and fundamental operations

use std::fmt::{self, Debug, Display};
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use rand_distr::{Distribution, Normal, StandardNormal};
use serde::{Deserialize, Serialize};

use super::mask::Mask;
use crate::error::{AutotraceError, AutotraceResult};

static TENSOR_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_tensor_id() -> TensorId {
    TensorId(TENSOR_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Stable identity handle assigned to every tensor at construction.
///
/// Auxiliary per-tensor state (optimizer moments, cached procedures) is keyed
/// by this handle instead of by tensor contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(u64);

impl TensorId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Rows × columns × depth extent of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    pub rows: usize,
    pub columns: usize,
    pub depth: usize,
}

impl Shape {
    pub fn new(rows: usize, columns: usize, depth: usize) -> Self {
        Self { rows, columns, depth }
    }

    /// 1×1×1 shape that broadcasts against any other shape
    pub fn scalar() -> Self {
        Self::new(1, 1, 1)
    }

    pub fn total_elements(&self) -> usize {
        self.rows * self.columns * self.depth
    }

    pub fn is_scalar(&self) -> bool {
        self.total_elements() == 1
    }

    pub fn is_valid(&self) -> bool {
        self.rows > 0 && self.columns > 0 && self.depth > 0
    }

    /// Flat offset of (row, column, depth); depth is the outermost axis.
    pub fn offset(&self, row: usize, column: usize, depth: usize) -> usize {
        (depth * self.rows + row) * self.columns + column
    }

    /// Resulting shape of an elementwise operation between two shapes.
    pub fn broadcast(&self, other: &Shape, operation: &str) -> AutotraceResult<Shape> {
        if self == other || other.is_scalar() {
            Ok(*self)
        } else if self.is_scalar() {
            Ok(*other)
        } else {
            Err(AutotraceError::dimension_mismatch(
                operation,
                &self.to_string(),
                &other.to_string(),
            ))
        }
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.rows, self.columns, self.depth)
    }
}

/// Initialization policy for newly constructed tensors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Initialization {
    Zero,
    One,
    Constant(f64),
    RandomUniform { low: f64, high: f64 },
    RandomNormal { mean: f64, std: f64 },
    /// Uniform in ±sqrt(6 / (fan_in + fan_out)) with fan_in = columns, fan_out = rows
    XavierUniform,
    /// Normal with std sqrt(2 / fan_in)
    HeNormal,
}

impl Initialization {
    fn fill<R: Rng + ?Sized>(&self, shape: &Shape, rng: &mut R) -> AutotraceResult<Vec<f64>> {
        let count = shape.total_elements();
        let data = match *self {
            Initialization::Zero => vec![0.0; count],
            Initialization::One => vec![1.0; count],
            Initialization::Constant(value) => vec![value; count],
            Initialization::RandomUniform { low, high } => {
                (0..count).map(|_| low + (high - low) * rng.gen::<f64>()).collect()
            }
            Initialization::RandomNormal { mean, std } => {
                let normal = Normal::new(mean, std)?;
                (0..count).map(|_| normal.sample(rng)).collect()
            }
            Initialization::XavierUniform => {
                let limit = (6.0 / (shape.columns + shape.rows) as f64).sqrt();
                (0..count).map(|_| -limit + 2.0 * limit * rng.gen::<f64>()).collect()
            }
            Initialization::HeNormal => {
                let std = (2.0 / shape.columns.max(1) as f64).sqrt();
                (0..count)
                    .map(|_| {
                        let z: f64 = StandardNormal.sample(rng);
                        std * z
                    })
                    .collect()
            }
        };
        Ok(data)
    }
}

/// Dense, mutable rows × columns × depth tensor.
///
/// Equality is by identity: two tensors with equal contents are still distinct,
/// and cloning a tensor produces a new identity.
pub struct Tensor {
    id: TensorId,
    shape: Shape,
    data: Vec<f64>,
    mask: Option<Mask>,
    name: Option<String>,
}

impl Tensor {
    /// Create a tensor using the given initialization policy
    pub fn new<R: Rng + ?Sized>(shape: Shape, initialization: Initialization, rng: &mut R) -> AutotraceResult<Self> {
        let data = initialization.fill(&shape, rng)?;
        Ok(Self::with_data(shape, data))
    }

    pub fn zeros(shape: Shape) -> Self {
        Self::filled(shape, 0.0)
    }

    pub fn ones(shape: Shape) -> Self {
        Self::filled(shape, 1.0)
    }

    pub fn filled(shape: Shape, value: f64) -> Self {
        Self::with_data(shape, vec![value; shape.total_elements()])
    }

    /// 1×1×1 tensor holding a single value
    pub fn scalar(value: f64) -> Self {
        Self::filled(Shape::scalar(), value)
    }

    /// Create from a flat vector laid out depth-major, then row-major
    pub fn from_vec(shape: Shape, data: Vec<f64>) -> AutotraceResult<Self> {
        if data.len() != shape.total_elements() {
            return Err(AutotraceError::dimension_mismatch(
                "from_vec",
                &format!("{} elements for {}", shape.total_elements(), shape),
                &format!("{} elements", data.len()),
            ));
        }
        Ok(Self::with_data(shape, data))
    }

    /// Create a single-depth tensor from nested rows
    pub fn from_rows(rows: &[Vec<f64>]) -> AutotraceResult<Self> {
        let columns = rows.first().map(|row| row.len()).unwrap_or(0);
        if rows.iter().any(|row| row.len() != columns) {
            return Err(AutotraceError::InvalidInput("All rows must have the same length".to_string()));
        }
        let data = rows.iter().flatten().copied().collect();
        Self::from_vec(Shape::new(rows.len(), columns, 1), data)
    }

    pub(crate) fn with_data(shape: Shape, data: Vec<f64>) -> Self {
        Self {
            id: next_tensor_id(),
            shape,
            data,
            mask: None,
            name: None,
        }
    }

    /// Zero tensor with the same shape, without mask or name
    pub fn zeros_like(&self) -> Self {
        Self::zeros(self.shape)
    }

    pub fn id(&self) -> TensorId {
        self.id
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn rows(&self) -> usize {
        self.shape.rows
    }

    pub fn columns(&self) -> usize {
        self.shape.columns
    }

    pub fn depth(&self) -> usize {
        self.shape.depth
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_scalar()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = Some(name.to_string());
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.set_name(name);
        self
    }

    pub fn value(&self, row: usize, column: usize, depth: usize) -> f64 {
        self.data[self.shape.offset(row, column, depth)]
    }

    pub fn set_value(&mut self, row: usize, column: usize, depth: usize, value: f64) {
        let offset = self.shape.offset(row, column, depth);
        self.data[offset] = value;
    }

    pub fn increment_value(&mut self, row: usize, column: usize, depth: usize, value: f64) {
        let offset = self.shape.offset(row, column, depth);
        self.data[offset] += value;
    }

    /// Value at a coordinate, reading the single cell of a scalar tensor for any coordinate.
    pub fn broadcast_value(&self, row: usize, column: usize, depth: usize) -> f64 {
        if self.is_scalar() {
            self.data[0]
        } else {
            self.value(row, column, depth)
        }
    }

    /// Value of the first cell; meaningful for scalar tensors
    pub fn scalar_value(&self) -> f64 {
        self.data[0]
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub(crate) fn into_data(self) -> Vec<f64> {
        self.data
    }

    /// Overwrite contents with another tensor's values, keeping this tensor's identity.
    pub fn copy_from(&mut self, other: &Tensor) -> AutotraceResult<()> {
        if self.shape != other.shape {
            return Err(AutotraceError::dimension_mismatch(
                "copy_from",
                &self.shape.to_string(),
                &other.shape.to_string(),
            ));
        }
        self.data.copy_from_slice(&other.data);
        Ok(())
    }

    /// Creates an empty mask (nothing suppressed) unless one already exists.
    pub fn set_mask(&mut self) {
        if self.mask.is_none() {
            self.mask = Some(Mask::new(self.shape));
        }
    }

    pub fn set_mask_to(&mut self, mask: Mask) -> AutotraceResult<()> {
        if mask.shape() != self.shape {
            return Err(AutotraceError::dimension_mismatch(
                "set_mask",
                &self.shape.to_string(),
                &mask.shape().to_string(),
            ));
        }
        self.mask = Some(mask);
        Ok(())
    }

    pub fn mask(&self) -> Option<&Mask> {
        self.mask.as_ref()
    }

    pub fn mask_mut(&mut self) -> Option<&mut Mask> {
        self.mask.as_mut()
    }

    pub fn has_mask(&self) -> bool {
        self.mask.is_some()
    }

    pub fn has_mask_at(&self, row: usize, column: usize, depth: usize) -> bool {
        match &self.mask {
            Some(mask) if self.is_scalar() => mask.is_masked(0, 0, 0),
            Some(mask) => mask.is_masked(row, column, depth),
            None => false,
        }
    }

    pub fn remove_mask(&mut self) {
        self.mask = None;
    }

    /// Sets a mask if needed and suppresses each cell independently with `probability`.
    pub fn mask_by_probability<R: Rng + ?Sized>(&mut self, probability: f64, rng: &mut R) -> AutotraceResult<()> {
        self.set_mask();
        if let Some(mask) = self.mask.as_mut() {
            mask.set_probability(probability)?;
            mask.mask_by_probability(rng);
        }
        Ok(())
    }
}

impl Clone for Tensor {
    fn clone(&self) -> Self {
        Self {
            id: next_tensor_id(),
            shape: self.shape,
            data: self.data.clone(),
            mask: self.mask.clone(),
            name: self.name.clone(),
        }
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Tensor {}

impl Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("masked", &self.mask.is_some())
            .field("data", &self.data)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_shape_offsets() {
        let shape = Shape::new(2, 3, 4);
        assert_eq!(shape.total_elements(), 24);
        assert!(shape.is_valid());
        assert_eq!(shape.offset(0, 0, 0), 0);
        assert_eq!(shape.offset(1, 2, 0), 5);
        assert_eq!(shape.offset(0, 0, 1), 6);
        assert_eq!(shape.to_string(), "2x3x4");
    }

    #[test]
    fn test_shape_broadcast() {
        let shape = Shape::new(2, 2, 1);
        assert_eq!(shape.broadcast(&Shape::scalar(), "add").unwrap(), shape);
        assert_eq!(Shape::scalar().broadcast(&shape, "add").unwrap(), shape);
        assert!(shape.broadcast(&Shape::new(3, 2, 1), "add").is_err());
    }

    #[test]
    fn test_identity_equality() {
        let a = Tensor::ones(Shape::new(2, 2, 1));
        let b = Tensor::ones(Shape::new(2, 2, 1));
        let c = a.clone();
        assert_ne!(a, b);
        assert_ne!(a.id(), c.id());
        assert_eq!(a.data(), c.data());
        assert_eq!(a, a);
    }

    #[test]
    fn test_initialization_policies() {
        let mut rng = StdRng::seed_from_u64(7);
        let shape = Shape::new(4, 5, 1);

        let zero = Tensor::new(shape, Initialization::Zero, &mut rng).unwrap();
        assert!(zero.data().iter().all(|&v| v == 0.0));

        let one = Tensor::new(shape, Initialization::One, &mut rng).unwrap();
        assert!(one.data().iter().all(|&v| v == 1.0));

        let uniform = Tensor::new(shape, Initialization::RandomUniform { low: -0.5, high: 0.5 }, &mut rng).unwrap();
        assert!(uniform.data().iter().all(|&v| (-0.5..0.5).contains(&v)));

        let xavier = Tensor::new(shape, Initialization::XavierUniform, &mut rng).unwrap();
        let limit = (6.0f64 / 9.0).sqrt();
        assert!(xavier.data().iter().all(|&v| v.abs() <= limit));
    }

    #[test]
    fn test_seeded_initialization_is_deterministic() {
        let shape = Shape::new(3, 3, 2);
        let a = Tensor::new(shape, Initialization::HeNormal, &mut StdRng::seed_from_u64(11)).unwrap();
        let b = Tensor::new(shape, Initialization::HeNormal, &mut StdRng::seed_from_u64(11)).unwrap();
        assert_eq!(a.data(), b.data());
    }

    #[test]
    fn test_random_normal_initialization() {
        let mut rng = StdRng::seed_from_u64(3);
        let shape = Shape::new(20, 50, 1);
        let tensor = Tensor::new(shape, Initialization::RandomNormal { mean: 2.0, std: 0.5 }, &mut rng).unwrap();
        let mean = tensor.data().iter().sum::<f64>() / tensor.size() as f64;
        assert!((mean - 2.0).abs() < 0.1);

        let error = Tensor::new(shape, Initialization::RandomNormal { mean: 0.0, std: -1.0 }, &mut rng).unwrap_err();
        assert!(matches!(error, AutotraceError::ConfigurationError(_)));
    }

    #[test]
    fn test_from_vec_validates_length() {
        assert!(Tensor::from_vec(Shape::new(2, 2, 1), vec![1.0, 2.0, 3.0]).is_err());
        let tensor = Tensor::from_vec(Shape::new(2, 2, 1), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(tensor.value(1, 0, 0), 3.0);
    }

    #[test]
    fn test_copy_from_keeps_identity() {
        let mut target = Tensor::zeros(Shape::new(1, 3, 1));
        let id = target.id();
        let source = Tensor::from_rows(&[vec![1.0, 2.0, 3.0]]).unwrap();
        target.copy_from(&source).unwrap();
        assert_eq!(target.id(), id);
        assert_eq!(target.data(), &[1.0, 2.0, 3.0]);
        assert!(target.copy_from(&Tensor::scalar(1.0)).is_err());
    }

    #[test]
    fn test_mask_lifecycle() {
        let mut tensor = Tensor::ones(Shape::new(2, 2, 1));
        assert!(!tensor.has_mask());
        tensor.set_mask();
        assert!(tensor.has_mask());
        assert!(!tensor.has_mask_at(0, 1, 0));
        tensor.mask_mut().unwrap().mask(0, 1, 0);
        assert!(tensor.has_mask_at(0, 1, 0));
        tensor.remove_mask();
        assert!(!tensor.has_mask_at(0, 1, 0));
    }
}
