//! Trace-based reverse-mode differentiation
//!
//! A [`ForwardDefinition`] is executed once against a [`Tracer`], which
//! records every operation as an [`Expression`] over a flat arena of
//! [`Node`]s. The [`ProcedureFactory`] turns that record into a
//! [`Procedure`] that replays the forward chain in trace order and the
//! gradient chain in reverse order.

pub mod expression;
pub mod node;
pub mod procedure;
pub mod tracer;

pub use expression::{EvaluationContext, Expression, Operands, Scope};
pub use node::{Node, NodeArena, NodeId, NodeKind};
pub use procedure::Procedure;
pub use tracer::{ForwardDefinition, Input, ProcedureFactory, Traced, Tracer};
