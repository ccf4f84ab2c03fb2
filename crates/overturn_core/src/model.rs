//! The model contract consumed by the continuation core.
//!
//! A model owns its state, right-hand side and solution vectors together
//! with a Jacobian-like operator; the engine drives it exclusively through
//! this interface. Parallel decomposition, file I/O and the physics behind
//! `compute_rhs`/`compute_jacobian` are entirely the model's business.
//!
//! Views of model vectors are borrows (`state()`/`state_mut()`); callers
//! needing an independent copy `clone()` explicitly.

use crate::error::Result;
use crate::vector::Vector;

/// Operator surface consumed by the Krylov solvers and the eigenvalue
/// analysis: matrix-vector product and preconditioner application.
pub trait LinearOperator {
    type Vector: Vector;

    /// `out = A * v` for the current linearization.
    fn apply_matrix(&self, v: &Self::Vector, out: &mut Self::Vector) -> Result<()>;

    /// `out = inv(P) * v`. Defaults to the identity preconditioner.
    fn apply_precon(&self, v: &Self::Vector, out: &mut Self::Vector) -> Result<()> {
        out.update(1.0, v, 0.0);
        Ok(())
    }
}

/// Contract for a nonlinear model F(x, par) whose solution branches the
/// continuation engine traces.
///
/// `compute_rhs` and `compute_jacobian` recompute from the current state in
/// place; `solve` produces the Newton direction for a given right-hand side
/// and leaves it in `solution()`. Both may be backed by a distributed
/// problem; the engine only issues these calls serially.
pub trait Model: LinearOperator {
    /// View of the current state.
    fn state(&self) -> &Self::Vector;

    /// Mutable view of the current state; the predictor and corrector
    /// update the model state through this.
    fn state_mut(&mut self) -> &mut Self::Vector;

    /// View of the right-hand side F(x, par) as of the last `compute_rhs`.
    fn rhs(&self) -> &Self::Vector;

    /// View of the solution of the last `solve`.
    fn solution(&self) -> &Self::Vector;

    /// Recompute F from the current state and parameters.
    fn compute_rhs(&mut self) -> Result<()>;

    /// Recompute the Jacobian at the current state and parameters.
    fn compute_jacobian(&mut self) -> Result<()>;

    /// Solve the linearized system `J * sol = rhs`, placing the result in
    /// `solution()`. A Krylov solver failing to meet its tolerance should
    /// surface as [`crate::error::Error::LinearSolve`]; the Newton
    /// corrector folds that into its non-convergence handling.
    fn solve(&mut self, rhs: &Self::Vector) -> Result<()>;

    /// `out = B * v` with B the mass matrix of the problem. Defaults to
    /// the identity, which turns the generalized eigenvalue problem into
    /// an ordinary one.
    fn apply_mass(&self, v: &Self::Vector, out: &mut Self::Vector) -> Result<()> {
        out.update(1.0, v, 0.0);
        Ok(())
    }

    /// Scalar parameter access by name.
    fn get_par(&self, name: &str) -> Result<f64>;

    fn set_par(&mut self, name: &str, value: f64) -> Result<()>;

    /// Hook invoked once when a continuation run starts, before the
    /// initial point is converged onto the branch.
    fn pre_process(&mut self) -> Result<()> {
        Ok(())
    }

    /// Hook invoked after accepted steps and at run boundaries
    /// (bookkeeping, persistence).
    fn post_process(&mut self) -> Result<()> {
        Ok(())
    }

    /// Optional signed scalar for user-defined special-point detection; a
    /// sign change between accepted steps stops the run.
    fn monitor(&self) -> Option<f64> {
        None
    }
}
