//! Error types for the continuation engine.

use thiserror::Error;

/// Errors surfaced by the continuation/Newton/Krylov machinery and by
/// models implementing the [`crate::model::Model`] contract.
///
/// Newton non-convergence and Krylov failures are normally handled through
/// reports, not through this type; the variants here are for conditions the
/// engine cannot recover from locally.
#[derive(Error, Debug)]
pub enum Error {
    #[error("corrector failed to converge after {iterations} iterations (residual {residual:.3e})")]
    NonConvergence { iterations: usize, residual: f64 },

    #[error("linear solve failed: {what}")]
    LinearSolve { what: String },

    #[error("invalid configuration: {what}")]
    Configuration { what: String },

    #[error("continuation aborted: {what}")]
    FatalAbort { what: String },

    #[error("model error: {what}")]
    Model { what: String },

    #[error("dimension mismatch: expected {expected}, got {got}")]
    Dimension { expected: usize, got: usize },

    #[error("unknown parameter: {name}")]
    UnknownParameter { name: String },
}

pub type Result<T> = std::result::Result<T, Error>;
