//! Ready-made models, used by the test suite and as implementation
//! templates for real problems.

use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};
use crate::krylov::gmres::{Gmres, GmresConfig};
use crate::model::{LinearOperator, Model};

/// One-dimensional quadratic test problem `F(x, lambda) = x^2 + c*lambda`.
///
/// With `c = -1` the branch is `x = sqrt(lambda)`, convenient for
/// destination runs; with `c = +1` the branch `lambda = -x^2` folds at the
/// origin, convenient for turning-point runs.
pub struct ScalarFold {
    state: DVector<f64>,
    rhs: DVector<f64>,
    sol: DVector<f64>,
    lambda: f64,
    lambda_coeff: f64,
    monitor_offset: Option<f64>,
}

impl ScalarFold {
    /// `F = x^2 - lambda`, solution branch `x = +-sqrt(lambda)`.
    pub fn new_root(x0: f64, lambda0: f64) -> Self {
        Self::new(x0, lambda0, -1.0)
    }

    /// `F = x^2 + lambda`, branch `lambda = -x^2` with a fold at 0.
    pub fn new_fold(x0: f64, lambda0: f64) -> Self {
        Self::new(x0, lambda0, 1.0)
    }

    fn new(x0: f64, lambda0: f64, lambda_coeff: f64) -> Self {
        let mut m = Self {
            state: DVector::from_vec(vec![x0]),
            rhs: DVector::zeros(1),
            sol: DVector::zeros(1),
            lambda: lambda0,
            lambda_coeff,
            monitor_offset: None,
        };
        m.compute_rhs().ok();
        m
    }

    /// Report `x - offset` through the monitor hook, so a run with user
    /// detection stops when the state crosses `offset`.
    pub fn with_monitor(mut self, offset: f64) -> Self {
        self.monitor_offset = Some(offset);
        self
    }
}

impl LinearOperator for ScalarFold {
    type Vector = DVector<f64>;

    fn apply_matrix(&self, v: &Self::Vector, out: &mut Self::Vector) -> Result<()> {
        out[0] = 2.0 * self.state[0] * v[0];
        Ok(())
    }
}

impl Model for ScalarFold {
    fn state(&self) -> &Self::Vector {
        &self.state
    }

    fn state_mut(&mut self) -> &mut Self::Vector {
        &mut self.state
    }

    fn rhs(&self) -> &Self::Vector {
        &self.rhs
    }

    fn solution(&self) -> &Self::Vector {
        &self.sol
    }

    fn compute_rhs(&mut self) -> Result<()> {
        self.rhs[0] = self.state[0] * self.state[0] + self.lambda_coeff * self.lambda;
        Ok(())
    }

    fn compute_jacobian(&mut self) -> Result<()> {
        // Jacobian 2x is formed on the fly in apply_matrix/solve.
        Ok(())
    }

    fn solve(&mut self, rhs: &Self::Vector) -> Result<()> {
        let jac = 2.0 * self.state[0];
        if jac.abs() < 1.0e-12 {
            return Err(Error::LinearSolve {
                what: format!("singular scalar Jacobian {jac:e}"),
            });
        }
        self.sol[0] = rhs[0] / jac;
        Ok(())
    }

    fn get_par(&self, name: &str) -> Result<f64> {
        match name {
            "lambda" => Ok(self.lambda),
            _ => Err(Error::UnknownParameter {
                name: name.to_string(),
            }),
        }
    }

    fn set_par(&mut self, name: &str, value: f64) -> Result<()> {
        match name {
            "lambda" => {
                self.lambda = value;
                Ok(())
            }
            _ => Err(Error::UnknownParameter {
                name: name.to_string(),
            }),
        }
    }

    fn monitor(&self) -> Option<f64> {
        self.monitor_offset.map(|o| self.state[0] - o)
    }
}

/// Linear load-response model `F(x, load) = A x - load * b`, solved with
/// the crate's own GMRES and a Jacobi preconditioner. An optional diagonal
/// mass matrix makes the eigenvalue analysis generalized.
pub struct DenseLinearModel {
    a: DMatrix<f64>,
    b: DVector<f64>,
    mass: Option<DVector<f64>>,
    state: DVector<f64>,
    rhs: DVector<f64>,
    sol: DVector<f64>,
    load: f64,
    gmres: Gmres,
}

impl DenseLinearModel {
    pub fn new(a: DMatrix<f64>, b: DVector<f64>) -> Self {
        let n = b.len();
        assert_eq!(a.nrows(), n);
        assert_eq!(a.ncols(), n);
        let mut m = Self {
            a,
            b,
            mass: None,
            state: DVector::zeros(n),
            rhs: DVector::zeros(n),
            sol: DVector::zeros(n),
            load: 0.0,
            gmres: Gmres::new(GmresConfig {
                tol: 1.0e-12,
                ..GmresConfig::default()
            }),
        };
        m.compute_rhs().ok();
        m
    }

    pub fn with_mass(mut self, diag: DVector<f64>) -> Self {
        assert_eq!(diag.len(), self.b.len());
        self.mass = Some(diag);
        self
    }
}

impl LinearOperator for DenseLinearModel {
    type Vector = DVector<f64>;

    fn apply_matrix(&self, v: &Self::Vector, out: &mut Self::Vector) -> Result<()> {
        out.copy_from(&(&self.a * v));
        Ok(())
    }

    fn apply_precon(&self, v: &Self::Vector, out: &mut Self::Vector) -> Result<()> {
        for i in 0..v.len() {
            out[i] = v[i] / self.a[(i, i)];
        }
        Ok(())
    }
}

impl Model for DenseLinearModel {
    fn state(&self) -> &Self::Vector {
        &self.state
    }

    fn state_mut(&mut self) -> &mut Self::Vector {
        &mut self.state
    }

    fn rhs(&self) -> &Self::Vector {
        &self.rhs
    }

    fn solution(&self) -> &Self::Vector {
        &self.sol
    }

    fn compute_rhs(&mut self) -> Result<()> {
        self.rhs = &self.a * &self.state;
        self.rhs.axpy(-self.load, &self.b, 1.0);
        Ok(())
    }

    fn compute_jacobian(&mut self) -> Result<()> {
        // The Jacobian is the constant matrix A.
        Ok(())
    }

    fn solve(&mut self, rhs: &Self::Vector) -> Result<()> {
        let mut x = DVector::zeros(rhs.len());
        let report = self.gmres.solve(&*self, rhs, &mut x)?;
        if !report.converged {
            return Err(Error::LinearSolve {
                what: format!(
                    "gmres stalled at relative residual {:.3e} after {} iterations",
                    report.residual, report.iterations
                ),
            });
        }
        self.sol = x;
        Ok(())
    }

    fn apply_mass(&self, v: &Self::Vector, out: &mut Self::Vector) -> Result<()> {
        match &self.mass {
            Some(diag) => {
                for i in 0..v.len() {
                    out[i] = diag[i] * v[i];
                }
            }
            None => out.copy_from(v),
        }
        Ok(())
    }

    fn get_par(&self, name: &str) -> Result<f64> {
        match name {
            "load" => Ok(self.load),
            _ => Err(Error::UnknownParameter {
                name: name.to_string(),
            }),
        }
    }

    fn set_par(&mut self, name: &str, value: f64) -> Result<()> {
        match name {
            "load" => {
                self.load = value;
                Ok(())
            }
            _ => Err(Error::UnknownParameter {
                name: name.to_string(),
            }),
        }
    }
}

/// One-dimensional Bratu problem `u'' + lambda * exp(u) = 0` on (0, 1)
/// with homogeneous Dirichlet boundaries, discretized on `n` interior
/// nodes. The solution branch folds near `lambda = 3.51`.
pub struct Bratu1D {
    n: usize,
    h2_inv: f64,
    state: DVector<f64>,
    rhs: DVector<f64>,
    sol: DVector<f64>,
    jac: DMatrix<f64>,
    lambda: f64,
}

impl Bratu1D {
    pub fn new(n: usize, lambda0: f64) -> Self {
        let h = 1.0 / (n as f64 + 1.0);
        let mut m = Self {
            n,
            h2_inv: 1.0 / (h * h),
            state: DVector::zeros(n),
            rhs: DVector::zeros(n),
            sol: DVector::zeros(n),
            jac: DMatrix::zeros(n, n),
            lambda: lambda0,
        };
        m.compute_rhs().ok();
        m.compute_jacobian().ok();
        m
    }
}

impl LinearOperator for Bratu1D {
    type Vector = DVector<f64>;

    fn apply_matrix(&self, v: &Self::Vector, out: &mut Self::Vector) -> Result<()> {
        for i in 0..self.n {
            let mut acc = (self.lambda * self.state[i].exp() - 2.0 * self.h2_inv) * v[i];
            if i > 0 {
                acc += self.h2_inv * v[i - 1];
            }
            if i + 1 < self.n {
                acc += self.h2_inv * v[i + 1];
            }
            out[i] = acc;
        }
        Ok(())
    }
}

impl Model for Bratu1D {
    fn state(&self) -> &Self::Vector {
        &self.state
    }

    fn state_mut(&mut self) -> &mut Self::Vector {
        &mut self.state
    }

    fn rhs(&self) -> &Self::Vector {
        &self.rhs
    }

    fn solution(&self) -> &Self::Vector {
        &self.sol
    }

    fn compute_rhs(&mut self) -> Result<()> {
        for i in 0..self.n {
            let left = if i > 0 { self.state[i - 1] } else { 0.0 };
            let right = if i + 1 < self.n { self.state[i + 1] } else { 0.0 };
            self.rhs[i] = (left - 2.0 * self.state[i] + right) * self.h2_inv
                + self.lambda * self.state[i].exp();
        }
        Ok(())
    }

    fn compute_jacobian(&mut self) -> Result<()> {
        self.jac.fill(0.0);
        for i in 0..self.n {
            self.jac[(i, i)] = self.lambda * self.state[i].exp() - 2.0 * self.h2_inv;
            if i > 0 {
                self.jac[(i, i - 1)] = self.h2_inv;
            }
            if i + 1 < self.n {
                self.jac[(i, i + 1)] = self.h2_inv;
            }
        }
        Ok(())
    }

    fn solve(&mut self, rhs: &Self::Vector) -> Result<()> {
        let lu = self.jac.clone().lu();
        match lu.solve(rhs) {
            Some(sol) => {
                self.sol = sol;
                Ok(())
            }
            None => Err(Error::LinearSolve {
                what: "singular Bratu Jacobian".to_string(),
            }),
        }
    }

    fn get_par(&self, name: &str) -> Result<f64> {
        match name {
            "lambda" => Ok(self.lambda),
            _ => Err(Error::UnknownParameter {
                name: name.to_string(),
            }),
        }
    }

    fn set_par(&mut self, name: &str, value: f64) -> Result<()> {
        match name {
            "lambda" => {
                self.lambda = value;
                Ok(())
            }
            _ => Err(Error::UnknownParameter {
                name: name.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_fold_residual_and_jacobian() {
        let mut m = ScalarFold::new_root(3.0, 4.0);
        m.compute_rhs().unwrap();
        assert_eq!(m.rhs()[0], 5.0);
        let v = DVector::from_vec(vec![1.0]);
        let mut out = DVector::zeros(1);
        m.apply_matrix(&v, &mut out).unwrap();
        assert_eq!(out[0], 6.0);
        m.solve(&v.clone()).unwrap();
        assert!((m.solution()[0] - 1.0 / 6.0).abs() < 1e-14);
    }

    #[test]
    fn scalar_fold_rejects_unknown_parameter() {
        let m = ScalarFold::new_root(1.0, 1.0);
        assert!(m.get_par("viscosity").is_err());
    }

    #[test]
    fn dense_linear_solve_matches_direct() {
        let a = DMatrix::from_fn(8, 8, |i, j| {
            if i == j {
                4.0
            } else if i.abs_diff(j) == 1 {
                -1.0
            } else {
                0.0
            }
        });
        let b = DVector::from_element(8, 1.0);
        let mut m = DenseLinearModel::new(a.clone(), b.clone());
        m.set_par("load", 2.0).unwrap();
        m.compute_rhs().unwrap();

        let f = m.rhs().clone();
        m.solve(&f).unwrap();
        let direct = a.lu().solve(&f).unwrap();
        assert!((m.solution() - &direct).norm() < 1e-9);
    }

    #[test]
    fn bratu_zero_state_residual_is_lambda() {
        let mut m = Bratu1D::new(5, 2.0);
        m.compute_rhs().unwrap();
        for i in 0..5 {
            assert!((m.rhs()[i] - 2.0).abs() < 1e-14);
        }
    }

    #[test]
    fn bratu_jacobian_matches_finite_difference() {
        let mut m = Bratu1D::new(6, 1.5);
        for i in 0..6 {
            m.state_mut()[i] = 0.1 * (i as f64 + 1.0);
        }
        m.compute_rhs().unwrap();
        m.compute_jacobian().unwrap();

        let f0 = m.rhs().clone();
        let eps = 1e-7;
        let mut v = DVector::zeros(6);
        v[2] = 1.0;
        let mut jv = DVector::zeros(6);
        m.apply_matrix(&v, &mut jv).unwrap();

        m.state_mut()[2] += eps;
        m.compute_rhs().unwrap();
        let fd = (m.rhs() - &f0) / eps;
        assert!((&jv - &fd).norm() < 1e-5, "mismatch {}", (&jv - &fd).norm());
    }
}
