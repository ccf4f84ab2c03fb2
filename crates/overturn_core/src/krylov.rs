//! Krylov subspace solvers for the linearized systems.
//!
//! Two solvers share the [`crate::model::LinearOperator`] surface:
//! restarted GMRES ([`gmres`]) and the short-recurrence IDR(s) method
//! ([`idr`]). Both report failure to meet the tolerance through
//! [`KrylovReport`]; an `Err` is reserved for operator or dimension
//! problems.

pub mod gmres;
pub mod idr;

pub use gmres::{Gmres, GmresConfig, MinimizeScheme, PreconSide};
pub use idr::{Idr, IdrConfig};

/// Outcome of a Krylov solve.
#[derive(Debug, Clone, Copy)]
pub struct KrylovReport {
    pub converged: bool,
    pub iterations: usize,
    /// Relative residual at exit.
    pub residual: f64,
}
