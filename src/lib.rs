//! Autotrace - trace-based automatic differentiation core
//!
//! Features:
//! - Three-dimensional `f64` tensors with per-cell masks
//! - Windowed cell operations for convolution and pooling
//! - Procedures traced once from a forward definition and replayed for
//!   forward and backward passes over single tensors or time-indexed sequences
//! - Optimizers, weight normalization and finite-difference gradient checks

pub mod autograd;
pub mod config;
pub mod error;
pub mod normalization;
pub mod ops;
pub mod optim;
pub mod tensor;
pub mod verification;

pub use autograd::{ForwardDefinition, Input, Procedure, ProcedureFactory, Scope, Traced, Tracer};
pub use error::{AutotraceError, AutotraceResult};
pub use tensor::{Mask, Sequence, Shape, Tensor, TensorId, UnaryFunction};

/// Install a `tracing` subscriber for the process.
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init() -> AutotraceResult<()> {
    if let Err(error) = tracing_subscriber::fmt().try_init() {
        tracing::debug!("Keeping the installed tracing subscriber: {}", error);
    }
    tracing::info!("Autotrace {} initialized", version());
    Ok(())
}

/// Set the seed every subsequently built procedure draws its random masks from
pub fn set_seed(seed: u64) -> AutotraceResult<()> {
    config::update_config(|config| config.random.seed = seed)
}

/// Get the current crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
