//! Windowed operation framework and the structural kernels built on it

pub mod conv;
pub mod core;
pub mod dropout;
pub mod pool;
pub mod window;

pub use self::core::{execute, CellOperation, OperationExtent};
pub use pool::PoolIndices;
pub use window::{execute_window, WindowCell, WindowOperation};
