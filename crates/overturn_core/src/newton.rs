//! Newton correctors.
//!
//! Two variants: [`correct`] solves the bordered system that pins the
//! iterate to the pseudo-arclength hyperplane, and [`correct_fixed_par`]
//! is a plain Newton iteration at fixed parameter, used to land the
//! initial guess on the branch.
//!
//! The bordered system
//!
//! ```text
//! | J       dF/dpar | |dx  |   |-F|
//! | zeta*xd  pardot | |dpar| = |-n|
//! ```
//!
//! is solved by block elimination through two solves with J, so the model
//! never needs to expose an augmented operator: with `w = J^-1 F` and
//! `v = J^-1 dF/dpar`,
//!
//! ```text
//! dpar = (zeta * xdot.w - n) / (pardot - zeta * xdot.v)
//! dx   = -w - dpar * v
//! ```

use log::{debug, warn};

use crate::config::{ContinuationConfig, ResidualTest};
use crate::error::{Error, Result};
use crate::model::Model;
use crate::vector::Vector;

/// Tuning of a single Newton correction.
#[derive(Debug, Clone)]
pub struct CorrectorSettings {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub residual_test: ResidualTest,
    pub backtracking: bool,
    pub num_backtracking_steps: usize,
    pub backtrack_increase: f64,
    /// Reuse the dF/dpar solve and Jacobian across iterations.
    pub chord_hybrid: bool,
    /// Finite-difference increment for dF/dpar.
    pub epsilon: f64,
}

impl From<&ContinuationConfig> for CorrectorSettings {
    fn from(cfg: &ContinuationConfig) -> Self {
        Self {
            max_iterations: cfg.max_newton_iterations,
            tolerance: cfg.newton_tolerance,
            residual_test: cfg.residual_test,
            backtracking: cfg.backtracking,
            num_backtracking_steps: cfg.num_backtracking_steps,
            backtrack_increase: cfg.backtrack_increase,
            chord_hybrid: cfg.newton_chord_hybrid,
            epsilon: cfg.epsilon,
        }
    }
}

/// Outcome of a Newton correction. Non-convergence is a report, not an
/// error; the continuation decides what to do with a failed correction.
#[derive(Debug, Clone, Copy)]
pub struct NewtonReport {
    pub converged: bool,
    pub iterations: usize,
    pub residual: f64,
}

/// Arclength constraint data for one bordered correction: the tangent and
/// base point the iterate is pinned to.
pub struct Bordered<'a, V: Vector> {
    pub state_dot: &'a V,
    pub par_dot: f64,
    pub zeta: f64,
    pub ds: f64,
    pub base_state: &'a V,
    pub base_par: f64,
    pub par_name: &'a str,
}

impl<V: Vector> Bordered<'_, V> {
    /// `n = zeta * xdot.(x - x0) + pardot * (par - par0) - ds`
    fn constraint(&self, state: &V, par: f64) -> f64 {
        let mut diff = state.clone();
        diff.update(-1.0, self.base_state, 1.0);
        self.zeta * self.state_dot.dot(&diff) + self.par_dot * (par - self.base_par) - self.ds
    }
}

/// Finite-difference derivative of the right-hand side with respect to a
/// parameter. Restores the parameter and recomputes the rhs before
/// returning.
pub fn compute_dfdpar<M: Model>(model: &mut M, name: &str, epsilon: f64) -> Result<M::Vector> {
    let base = model.rhs().clone();
    let par = model.get_par(name)?;
    model.set_par(name, par + epsilon)?;
    model.compute_rhs()?;
    let mut dfdpar = model.rhs().clone();
    dfdpar.update(-1.0 / epsilon, &base, 1.0 / epsilon);
    model.set_par(name, par)?;
    model.compute_rhs()?;
    Ok(dfdpar)
}

enum Solve<V> {
    Ok(V),
    Failed(String),
}

/// Run `model.solve` on a right-hand side, folding a Krylov failure into a
/// recoverable status instead of an error.
fn try_solve<M: Model>(model: &mut M, rhs: &M::Vector) -> Result<Solve<M::Vector>> {
    match model.solve(rhs) {
        Ok(()) => Ok(Solve::Ok(model.solution().clone())),
        Err(Error::LinearSolve { what }) => Ok(Solve::Failed(what)),
        Err(e) => Err(e),
    }
}

/// Bordered Newton correction toward the arclength hyperplane.
///
/// Expects `compute_rhs` to reflect the current (predicted) state on
/// entry. Linear-solve failures and exhausted iterations both yield a
/// non-converged report.
pub fn correct<M: Model>(
    model: &mut M,
    bordered: &Bordered<'_, M::Vector>,
    settings: &CorrectorSettings,
) -> Result<NewtonReport> {
    let mut v_cached: Option<M::Vector> = None;
    let mut residual = f64::INFINITY;

    for iter in 1..=settings.max_iterations {
        if iter == 1 || !settings.chord_hybrid {
            model.compute_jacobian()?;
        }

        let par = model.get_par(bordered.par_name)?;
        let constraint = bordered.constraint(model.state(), par);
        let norm_rhs = (model.rhs().norm().powi(2) + constraint * constraint).sqrt();

        let f = model.rhs().clone();
        let w = match try_solve(model, &f)? {
            Solve::Ok(w) => w,
            Solve::Failed(what) => {
                warn!("Newton iteration {iter}: linear solve failed ({what})");
                return Ok(NewtonReport {
                    converged: false,
                    iterations: iter,
                    residual,
                });
            }
        };

        if v_cached.is_none() || !settings.chord_hybrid {
            let dfdpar = compute_dfdpar(model, bordered.par_name, settings.epsilon)?;
            v_cached = match try_solve(model, &dfdpar)? {
                Solve::Ok(v) => Some(v),
                Solve::Failed(what) => {
                    warn!("Newton iteration {iter}: parameter solve failed ({what})");
                    return Ok(NewtonReport {
                        converged: false,
                        iterations: iter,
                        residual,
                    });
                }
            };
        }
        let Some(v) = v_cached.as_ref() else {
            return Err(Error::Model {
                what: "missing parameter derivative direction".to_string(),
            });
        };

        let denom = bordered.par_dot - bordered.zeta * bordered.state_dot.dot(v);
        if denom.abs() < f64::EPSILON {
            warn!("Newton iteration {iter}: singular bordered system (denominator {denom:e})");
            return Ok(NewtonReport {
                converged: false,
                iterations: iter,
                residual,
            });
        }
        let dpar = (bordered.zeta * bordered.state_dot.dot(&w) - constraint) / denom;
        let mut dx = w;
        dx.scale(-1.0);
        dx.update(-dpar, v, 1.0);

        // Apply the update, backtracking on residual growth.
        let mut frac = 1.0;
        let mut applied = 0.0;
        let mut halvings = 0;
        let norm_new = loop {
            let delta = frac - applied;
            model.state_mut().update(delta, &dx, 1.0);
            let par_now = model.get_par(bordered.par_name)? + delta * dpar;
            model.set_par(bordered.par_name, par_now)?;
            applied = frac;
            model.compute_rhs()?;

            let c = bordered.constraint(model.state(), par_now);
            let norm = (model.rhs().norm().powi(2) + c * c).sqrt();
            if !settings.backtracking
                || norm < norm_rhs
                || halvings >= settings.num_backtracking_steps
            {
                break norm;
            }
            halvings += 1;
            frac /= 2.0;
            debug!("backtracking, fraction {frac} (residual {norm:.3e} vs {norm_rhs:.3e})");
        };

        if settings.backtracking && norm_new > settings.backtrack_increase * norm_rhs {
            warn!(
                "backtracking exhausted, residual grew from {norm_rhs:.3e} to {norm_new:.3e}"
            );
            return Ok(NewtonReport {
                converged: false,
                iterations: iter,
                residual: norm_new,
            });
        }

        residual = match settings.residual_test {
            ResidualTest::AugmentedNorm => norm_new,
            ResidualTest::UpdateInf => (applied * dx.norm_inf()).max((applied * dpar).abs()),
        };
        debug!("Newton iteration {iter}: residual {residual:.3e}");

        if residual < settings.tolerance {
            return Ok(NewtonReport {
                converged: true,
                iterations: iter,
                residual,
            });
        }
    }

    Ok(NewtonReport {
        converged: false,
        iterations: settings.max_iterations,
        residual,
    })
}

/// Plain Newton iteration at fixed parameter, `x <- x - J^-1 F`, until
/// `||F|| < tol`. Used to land an off-branch initial guess on the branch.
pub fn correct_fixed_par<M: Model>(
    model: &mut M,
    settings: &CorrectorSettings,
) -> Result<NewtonReport> {
    model.compute_rhs()?;
    let mut residual = model.rhs().norm();

    for iter in 1..=settings.max_iterations {
        if residual < settings.tolerance {
            return Ok(NewtonReport {
                converged: true,
                iterations: iter - 1,
                residual,
            });
        }
        model.compute_jacobian()?;
        let f = model.rhs().clone();
        let w = match try_solve(model, &f)? {
            Solve::Ok(w) => w,
            Solve::Failed(what) => {
                warn!("fixed-parameter Newton iteration {iter}: linear solve failed ({what})");
                return Ok(NewtonReport {
                    converged: false,
                    iterations: iter,
                    residual,
                });
            }
        };
        model.state_mut().update(-1.0, &w, 1.0);
        model.compute_rhs()?;
        residual = model.rhs().norm();
        debug!("fixed-parameter Newton iteration {iter}: residual {residual:.3e}");
    }

    Ok(NewtonReport {
        converged: residual < settings.tolerance,
        iterations: settings.max_iterations,
        residual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LinearOperator;
    use crate::models::ScalarFold;
    use nalgebra::DVector;

    /// `F(x) = atan(x)`: the full Newton step diverges for |x| > 1.39,
    /// so convergence from x = 2 requires backtracking.
    struct AtanModel {
        state: DVector<f64>,
        rhs: DVector<f64>,
        sol: DVector<f64>,
        lambda: f64,
    }

    impl AtanModel {
        fn new(x0: f64) -> Self {
            let mut m = Self {
                state: DVector::from_vec(vec![x0]),
                rhs: DVector::zeros(1),
                sol: DVector::zeros(1),
                lambda: 0.0,
            };
            m.compute_rhs().unwrap();
            m
        }
    }

    impl LinearOperator for AtanModel {
        type Vector = DVector<f64>;

        fn apply_matrix(&self, v: &Self::Vector, out: &mut Self::Vector) -> crate::Result<()> {
            out[0] = v[0] / (1.0 + self.state[0] * self.state[0]);
            Ok(())
        }
    }

    impl Model for AtanModel {
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

        fn compute_rhs(&mut self) -> crate::Result<()> {
            self.rhs[0] = self.state[0].atan();
            Ok(())
        }

        fn compute_jacobian(&mut self) -> crate::Result<()> {
            Ok(())
        }

        fn solve(&mut self, rhs: &Self::Vector) -> crate::Result<()> {
            self.sol[0] = rhs[0] * (1.0 + self.state[0] * self.state[0]);
            Ok(())
        }

        fn get_par(&self, name: &str) -> crate::Result<f64> {
            match name {
                "lambda" => Ok(self.lambda),
                _ => Err(Error::UnknownParameter {
                    name: name.to_string(),
                }),
            }
        }

        fn set_par(&mut self, name: &str, value: f64) -> crate::Result<()> {
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

    fn settings() -> CorrectorSettings {
        CorrectorSettings {
            max_iterations: 20,
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
    fn fixed_par_newton_finds_sqrt() {
        // x^2 - lambda = 0 at lambda = 4, starting from x = 3.
        let mut model = ScalarFold::new_root(3.0, 4.0);
        let report = correct_fixed_par(&mut model, &settings()).unwrap();
        assert!(report.converged, "residual {}", report.residual);
        assert!((model.state()[0] - 2.0).abs() < 1e-10);
    }

    #[test]
    fn bordered_newton_stays_on_hyperplane() {
        // Base point (1, 1) on x^2 = lambda, tangent along the branch.
        let mut model = ScalarFold::new_root(1.0, 1.0);
        let base_state = model.state().clone();
        // Branch x = sqrt(lambda): dx/dlambda = 1/(2x) = 0.5 at x = 1.
        // Normalized tangent with zeta = 1.
        let scale = 1.0 / (0.25_f64 + 1.0).sqrt();
        let state_dot = nalgebra::DVector::from_vec(vec![0.5 * scale]);
        let ds = 0.1;

        // Euler predictor.
        model.state_mut().update(ds, &state_dot, 1.0);
        let par = model.get_par("lambda").unwrap() + ds * scale;
        model.set_par("lambda", par).unwrap();
        model.compute_rhs().unwrap();

        let bordered = Bordered {
            state_dot: &state_dot,
            par_dot: scale,
            zeta: 1.0,
            ds,
            base_state: &base_state,
            base_par: 1.0,
            par_name: "lambda",
        };
        let report = correct(&mut model, &bordered, &settings()).unwrap();
        assert!(report.converged, "residual {}", report.residual);

        // Converged point is on the branch and on the hyperplane.
        let x = model.state()[0];
        let lam = model.get_par("lambda").unwrap();
        assert!((x * x - lam).abs() < 1e-10, "off branch: {x}, {lam}");
        let n = bordered.constraint(model.state(), lam);
        assert!(n.abs() < 1e-10, "off hyperplane: {n}");
    }

    fn zero_tangent_bordered(base_state: &DVector<f64>) -> Bordered<'_, DVector<f64>> {
        // zeta = 0 drops the state-tangent term, so with ds = 0 the
        // constraint pins the parameter and the bordered correction
        // reduces to a plain Newton iteration on x.
        Bordered {
            state_dot: base_state, // unused when zeta = 0
            par_dot: 1.0,
            zeta: 0.0,
            ds: 0.0,
            base_state,
            base_par: 0.0,
            par_name: "lambda",
        }
    }

    #[test]
    fn backtracking_recovers_overshooting_newton() {
        let mut model = AtanModel::new(2.0);
        model.compute_rhs().unwrap();
        let base = model.state().clone();
        let bordered = zero_tangent_bordered(&base);

        let cfg = CorrectorSettings {
            max_iterations: 30,
            tolerance: 1e-10,
            backtracking: true,
            num_backtracking_steps: 10,
            ..settings()
        };
        let report = correct(&mut model, &bordered, &cfg).unwrap();
        assert!(report.converged, "residual {}", report.residual);
        assert!(model.state()[0].abs() < 1e-8);
    }

    #[test]
    fn full_steps_alone_diverge_on_the_same_problem() {
        let mut model = AtanModel::new(2.0);
        model.compute_rhs().unwrap();
        let base = model.state().clone();
        let bordered = zero_tangent_bordered(&base);

        let cfg = CorrectorSettings {
            max_iterations: 8,
            tolerance: 1e-10,
            backtracking: false,
            ..settings()
        };
        let report = correct(&mut model, &bordered, &cfg).unwrap();
        assert!(!report.converged);
    }

    #[test]
    fn solver_breakdown_reports_non_convergence() {
        // At x = 0 the Jacobian 2x is singular; solve returns a
        // LinearSolve error which must become a non-converged report.
        let mut model = ScalarFold::new_root(0.0, 1.0);
        let report = correct_fixed_par(&mut model, &settings()).unwrap();
        assert!(!report.converged);
    }
}
