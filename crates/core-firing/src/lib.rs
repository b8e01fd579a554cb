//! Firing resolution: repetition vectors, per-(sub)graph-firing handlers and
//! the execution/consumption dependency traversals.
//!
//! This crate answers the two questions the scheduler and allocator keep
//! asking: *how many times does each actor fire* (the repetition vector,
//! computed per handler from the resolved parameter values) and *which
//! producer firings feed byte range `[f·r, (f+1)·r)` of a consumer firing*
//! (the dependency traversals, which walk through hierarchy boundaries,
//! interfaces and delays without ever materializing a single-rate graph).

use thiserror::Error;

pub mod brv;
pub mod deps;
mod handler;

pub use deps::{DependencyInfo, DependencyIterator};
pub use handler::{EdgeSlot, FiringTree, Handler, HandlerId, NO_ADDRESS, NO_TASK};

use core_expr::ExprError;
use core_math::MathError;

#[derive(Debug, Error)]
pub enum FiringError {
    /// Rate/timing expression produced a non-finite value or referenced a
    /// missing slot.
    #[error("expression evaluation failed")]
    Expression(#[from] ExprError),
    #[error("rational arithmetic failed")]
    Math(#[from] MathError),
    /// Elimination hit a zero diagonal pivot on a non-degenerate component:
    /// the rates of the named graph cannot be balanced.
    #[error("graph [{graph}]: null topology pivot at column {column}")]
    NullTopologyPivot { graph: String, column: usize },
    #[error("parameter [{name}]: already resolved")]
    AlreadyResolved { name: String },
    #[error("handler for graph [{graph}] queried before resolution")]
    Unresolved { graph: String },
    #[error("dependency window [{lower}, {upper}] is malformed")]
    InvalidWindow { lower: i64, upper: i64 },
}
