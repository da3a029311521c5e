//! Dense rows × columns × depth tensors with masks and time-indexed sequences

pub mod core;
pub mod function;
pub mod mask;
pub mod ops;
pub mod sequence;

pub use self::core::{Initialization, Shape, Tensor, TensorId};
pub use function::UnaryFunction;
pub use mask::Mask;
pub use sequence::Sequence;
