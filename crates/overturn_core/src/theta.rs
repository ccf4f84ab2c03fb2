//! Theta time-stepping wrapper.
//!
//! [`ThetaModel`] decorates a steady model `B du/dt = F(u)` with the
//! theta scheme, turning one implicit time step into a nonlinear system
//! the Newton corrector can solve:
//!
//! ```text
//! G(u) = B (u_n - u) + dt * theta * F(u) + dt * (1 - theta) * F(u_n)
//! ```
//!
//! `theta = 1` is backward Euler, `theta = 1/2` Crank-Nicolson. The
//! wrapper is itself a [`Model`], so continuation in time-discretized
//! problems reuses every piece of the steady machinery.

use log::warn;

use crate::error::{Error, Result};
use crate::krylov::gmres::{Gmres, GmresConfig};
use crate::model::{LinearOperator, Model};
use crate::vector::Vector;

pub struct ThetaModel<M: Model> {
    inner: M,
    theta: f64,
    dt: f64,
    /// State at the start of the step, u_n.
    old_state: M::Vector,
    /// F(u_n), frozen at the start of the step.
    old_rhs: M::Vector,
    rhs_buf: M::Vector,
    sol_buf: M::Vector,
    gmres: Gmres,
}

impl<M: Model> ThetaModel<M> {
    pub fn new(inner: M, theta: f64) -> Self {
        let old_state = inner.state().clone();
        let rhs_buf = inner.state().zero_like();
        let old_rhs = rhs_buf.clone();
        let sol_buf = rhs_buf.clone();
        let mut model = Self {
            inner,
            theta: 1.0,
            dt: 0.0,
            old_state,
            old_rhs,
            rhs_buf,
            sol_buf,
            gmres: Gmres::new(GmresConfig {
                tol: 1.0e-12,
                ..GmresConfig::default()
            }),
        };
        model.set_theta(theta);
        model
    }

    /// Freeze u_n and F(u_n) and set the step length, starting a new
    /// implicit step from the current inner state.
    pub fn init_step(&mut self, dt: f64) -> Result<()> {
        self.dt = dt;
        self.old_state = self.inner.state().clone();
        self.inner.compute_rhs()?;
        self.old_rhs = self.inner.rhs().clone();
        Ok(())
    }

    /// Set theta, clamping to [0, 1] with a warning on out-of-range
    /// values.
    pub fn set_theta(&mut self, theta: f64) {
        if !(0.0..=1.0).contains(&theta) {
            let clamped = theta.clamp(0.0, 1.0);
            warn!("theta {theta} outside [0, 1], clamping to {clamped}");
            self.theta = clamped;
        } else {
            self.theta = theta;
        }
    }

    pub fn theta(&self) -> f64 {
        self.theta
    }

    pub fn timestep(&self) -> f64 {
        self.dt
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut M {
        &mut self.inner
    }

    pub fn into_inner(self) -> M {
        self.inner
    }
}

impl<M: Model> LinearOperator for ThetaModel<M> {
    type Vector = M::Vector;

    /// `out = (J - B / (theta * dt)) v`, the scaled step operator.
    fn apply_matrix(&self, v: &Self::Vector, out: &mut Self::Vector) -> Result<()> {
        self.inner.apply_matrix(v, out)?;
        let mut bv = v.zero_like();
        self.inner.apply_mass(v, &mut bv)?;
        out.update(-1.0 / (self.theta * self.dt), &bv, 1.0);
        Ok(())
    }

    fn apply_precon(&self, v: &Self::Vector, out: &mut Self::Vector) -> Result<()> {
        self.inner.apply_precon(v, out)
    }
}

impl<M: Model> Model for ThetaModel<M> {
    fn state(&self) -> &Self::Vector {
        self.inner.state()
    }

    fn state_mut(&mut self) -> &mut Self::Vector {
        self.inner.state_mut()
    }

    fn rhs(&self) -> &Self::Vector {
        &self.rhs_buf
    }

    fn solution(&self) -> &Self::Vector {
        &self.sol_buf
    }

    fn compute_rhs(&mut self) -> Result<()> {
        self.inner.compute_rhs()?;
        let mut diff = self.old_state.clone();
        diff.update(-1.0, self.inner.state(), 1.0);
        self.inner.apply_mass(&diff, &mut self.rhs_buf)?;
        self.rhs_buf
            .update(self.dt * self.theta, self.inner.rhs(), 1.0);
        self.rhs_buf
            .update(self.dt * (1.0 - self.theta), &self.old_rhs, 1.0);
        Ok(())
    }

    fn compute_jacobian(&mut self) -> Result<()> {
        self.inner.compute_jacobian()
    }

    /// Solve the step system `(dt*theta*J - B) x = rhs` through the
    /// scaled operator with the crate's GMRES.
    fn solve(&mut self, rhs: &Self::Vector) -> Result<()> {
        if self.theta == 0.0 {
            return Err(Error::LinearSolve {
                what: "explicit scheme (theta = 0) has no step operator to invert".to_string(),
            });
        }
        if self.dt == 0.0 {
            return Err(Error::LinearSolve {
                what: "time step is zero; call init_step first".to_string(),
            });
        }
        let mut b = rhs.clone();
        b.scale(1.0 / (self.theta * self.dt));
        let mut x = rhs.zero_like();
        let report = self.gmres.solve(&*self, &b, &mut x)?;
        if !report.converged {
            return Err(Error::LinearSolve {
                what: format!(
                    "step solve stalled at relative residual {:.3e} after {} iterations",
                    report.residual, report.iterations
                ),
            });
        }
        self.sol_buf = x;
        Ok(())
    }

    fn apply_mass(&self, v: &Self::Vector, out: &mut Self::Vector) -> Result<()> {
        self.inner.apply_mass(v, out)
    }

    fn get_par(&self, name: &str) -> Result<f64> {
        self.inner.get_par(name)
    }

    fn set_par(&mut self, name: &str, value: f64) -> Result<()> {
        self.inner.set_par(name, value)
    }

    fn pre_process(&mut self) -> Result<()> {
        self.inner.pre_process()
    }

    fn post_process(&mut self) -> Result<()> {
        self.inner.post_process()
    }

    fn monitor(&self) -> Option<f64> {
        self.inner.monitor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResidualTest;
    use crate::models::DenseLinearModel;
    use crate::newton::{correct_fixed_par, CorrectorSettings};
    use nalgebra::{DMatrix, DVector};

    fn decay_model(a: f64, u0: f64) -> DenseLinearModel {
        // du/dt = -a u as F(u) = A u with A = [-a].
        let mut m = DenseLinearModel::new(
            DMatrix::from_element(1, 1, -a),
            DVector::zeros(1),
        );
        m.state_mut()[0] = u0;
        m.compute_rhs().unwrap();
        m
    }

    fn settings() -> CorrectorSettings {
        CorrectorSettings {
            max_iterations: 10,
            tolerance: 1e-12,
            residual_test: ResidualTest::AugmentedNorm,
            backtracking: false,
            num_backtracking_steps: 5,
            backtrack_increase: 10.0,
            chord_hybrid: false,
            epsilon: 1e-7,
        }
    }

    #[test]
    fn backward_euler_step_matches_closed_form() {
        let a = 2.0;
        let dt = 0.1;
        let mut model = ThetaModel::new(decay_model(a, 1.0), 1.0);
        model.init_step(dt).unwrap();

        let report = correct_fixed_par(&mut model, &settings()).unwrap();
        assert!(report.converged);
        let expected = 1.0 / (1.0 + a * dt);
        assert!(
            (model.state()[0] - expected).abs() < 1e-10,
            "got {}, expected {expected}",
            model.state()[0]
        );
    }

    #[test]
    fn crank_nicolson_is_second_order() {
        let a = 1.0;
        let dt = 0.05;
        let mut model = ThetaModel::new(decay_model(a, 1.0), 0.5);
        let mut u = 1.0;
        for _ in 0..4 {
            model.init_step(dt).unwrap();
            let report = correct_fixed_par(&mut model, &settings()).unwrap();
            assert!(report.converged);
            u = model.state()[0];
        }
        let exact = (-a * 0.2_f64).exp();
        assert!((u - exact).abs() < 1e-4, "got {u}, exact {exact}");
    }

    #[test]
    fn theta_is_clamped_with_warning() {
        let model = ThetaModel::new(decay_model(1.0, 1.0), 1.7);
        assert_eq!(model.theta(), 1.0);
        let model = ThetaModel::new(decay_model(1.0, 1.0), -0.3);
        assert_eq!(model.theta(), 0.0);
    }

    #[test]
    fn explicit_scheme_refuses_to_solve() {
        let mut model = ThetaModel::new(decay_model(1.0, 1.0), 0.0);
        model.init_step(0.1).unwrap();
        let rhs = DVector::from_vec(vec![1.0]);
        assert!(matches!(
            model.solve(&rhs),
            Err(Error::LinearSolve { .. })
        ));
    }
}
