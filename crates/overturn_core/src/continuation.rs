//! Pseudo-arclength continuation driver.
//!
//! The engine traces a solution branch of `F(x, par) = 0` through
//! predictor-corrector steps in arclength: a tangent is computed at the
//! last accepted point, an Euler predictor extrapolates along it, and the
//! bordered Newton corrector pulls the prediction back onto the branch.
//! Step sizes adapt to corrector performance, rejected steps roll back to
//! the stored snapshot and retry smaller, and detection logic converges
//! onto parameter destinations or stops at turning points.

use log::{debug, error, info, warn};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::config::{
    ContinuationConfig, DetectMode, EigenAnalysis, InitialTangent, PostProcess, TangentKind,
};
use crate::eigen::{self, EigenConfig};
use crate::error::{Error, Result};
use crate::history::{History, Snapshot};
use crate::model::Model;
use crate::newton::{self, Bordered, CorrectorSettings, NewtonReport};
use crate::vector::Vector;

/// One accepted point on the branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchRecord {
    pub step: usize,
    pub par: f64,
    pub state_norm: f64,
    pub ds: f64,
    pub newton_iterations: usize,
    pub converged: bool,
    /// Tangent components at acceptance; together with `zeta` they
    /// satisfy `zeta * state_dot_norm^2 + par_dot^2 = 1`.
    pub par_dot: f64,
    pub state_dot_norm: f64,
    /// Rightmost eigenvalues, when the analysis ran at this point.
    pub eigenvalues: Vec<Complex<f64>>,
}

/// Aggregate view of a traced branch, see [`Continuation::analyze_hist`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchSummary {
    /// Accepted continuation steps (the initial point not counted).
    pub steps: usize,
    pub par_min: f64,
    pub par_max: f64,
    /// Sign changes of `par_dot` along the branch; each marks a fold.
    pub direction_changes: usize,
    /// Points kept despite a failed correction.
    pub unconverged_points: usize,
    pub mean_newton_iterations: f64,
}

/// Where the engine currently is in its predictor-corrector cycle,
/// mostly for diagnostics and log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    Predicting,
    Correcting,
    Accepted,
    Rejected,
    Detecting,
    Finalizing,
    Aborted,
}

enum RejectOutcome {
    /// Rolled back and step size reduced; try again.
    Retry,
    /// Keep the unconverged point and move on.
    Proceed,
    /// Stop the run.
    Abort,
}

pub struct Continuation<M: Model> {
    model: M,
    config: ContinuationConfig,
    corrector: CorrectorSettings,
    eigen_config: EigenConfig,

    par: f64,
    ds: f64,
    state_dot: M::Vector,
    par_dot: f64,

    step: usize,
    sum_newton_iterations: usize,
    reset_counter: usize,

    history: History<M::Vector>,
    records: Vec<BranchRecord>,
    phase: Phase,

    destinations: Vec<f64>,
    reached_last_destination: bool,
    /// `ds` was set to land on a destination; skip adaptation this step.
    snapped: bool,
    turning_point: Option<(f64, f64)>,
    monitor_prev: Option<f64>,
    monitor_triggered: bool,
}

impl<M: Model> Continuation<M> {
    pub fn new(model: M, mut config: ContinuationConfig) -> Result<Self> {
        config.validate()?;
        let par = model.get_par(&config.par_name)?;
        let state_dot = model.state().zero_like();
        let corrector = CorrectorSettings::from(&config);
        let destinations = config.destinations.clone();
        let ds = config.ds_init;
        Ok(Self {
            model,
            corrector,
            eigen_config: EigenConfig::default(),
            par,
            ds,
            state_dot,
            par_dot: 0.0,
            step: 0,
            sum_newton_iterations: 0,
            reset_counter: 0,
            history: History::new(),
            records: Vec::new(),
            phase: Phase::Initializing,
            destinations,
            reached_last_destination: false,
            snapped: false,
            turning_point: None,
            monitor_prev: None,
            monitor_triggered: false,
            config,
        })
    }

    /// Override the eigenvalue analysis tuning.
    pub fn set_eigen_config(&mut self, cfg: EigenConfig) {
        self.eigen_config = cfg;
    }

    /// Replace the destination list, e.g. for a follow-up run with the
    /// same engine.
    pub fn set_destinations(&mut self, destinations: Vec<f64>) {
        self.destinations = destinations;
        self.reached_last_destination = false;
    }

    /// Restore the destination list given at construction, so a finished
    /// run can be replayed (e.g. after changing a different parameter).
    pub fn reset_destinations(&mut self) {
        self.destinations = self.config.destinations.clone();
        self.reached_last_destination = false;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn records(&self) -> &[BranchRecord] {
        &self.records
    }

    pub fn par_history(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.par).collect()
    }

    pub fn state_norm_history(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.state_norm).collect()
    }

    /// Bracket `(par_before, par_after)` of a detected turning point.
    pub fn turning_point(&self) -> Option<(f64, f64)> {
        self.turning_point
    }

    /// Summarize the recorded branch: parameter range, fold count and
    /// corrector effort.
    pub fn analyze_hist(&self) -> BranchSummary {
        let mut par_min = self.par;
        let mut par_max = self.par;
        let mut direction_changes = 0;
        let mut unconverged_points = 0;
        let mut prev_dot = 0.0;
        for r in &self.records {
            par_min = par_min.min(r.par);
            par_max = par_max.max(r.par);
            if prev_dot * r.par_dot < 0.0 {
                direction_changes += 1;
            }
            prev_dot = r.par_dot;
            if !r.converged {
                unconverged_points += 1;
            }
        }
        BranchSummary {
            steps: self.step,
            par_min,
            par_max,
            direction_changes,
            unconverged_points,
            mean_newton_iterations: if self.step > 0 {
                self.sum_newton_iterations as f64 / self.step as f64
            } else {
                0.0
            },
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    /// Run the continuation until a stopping criterion fires.
    ///
    /// Returns 0 on a regular finish (destinations reached, turning
    /// point found, monitor fired or step budget spent) and 1 when the
    /// run aborted at the minimum step size.
    pub fn run(&mut self) -> Result<i32> {
        self.initialize()?;

        let mut status = 0;
        while !self.finished() {
            if self.step >= self.config.max_steps {
                info!("maximum number of steps ({}) reached", self.config.max_steps);
                break;
            }

            let report = self.attempt_step()?;
            if report.converged {
                self.accept(report)?;
            } else {
                match self.reject(&report)? {
                    RejectOutcome::Retry => continue,
                    RejectOutcome::Proceed => self.accept(report)?,
                    RejectOutcome::Abort => {
                        self.phase = Phase::Aborted;
                        status = 1;
                        break;
                    }
                }
            }
        }

        self.finalize()?;
        Ok(status)
    }

    fn finished(&self) -> bool {
        self.reached_last_destination || self.turning_point.is_some() || self.monitor_triggered
    }

    /// Land the initial guess on the branch, build the first tangent and
    /// record point zero.
    fn initialize(&mut self) -> Result<()> {
        self.model.pre_process()?;
        self.par = self.model.get_par(&self.config.par_name)?;
        self.model.compute_rhs()?;

        let mut initial_iters = 0;
        if self.model.rhs().norm() > self.config.newton_tolerance {
            info!(
                "initial residual {:.3e}, converging onto the branch first",
                self.model.rhs().norm()
            );
            let report = newton::correct_fixed_par(&mut self.model, &self.corrector)?;
            if !report.converged {
                return Err(Error::NonConvergence {
                    iterations: report.iterations,
                    residual: report.residual,
                });
            }
            initial_iters = report.iterations;
        }

        self.create_initial_tangent()?;

        self.history.push(Snapshot {
            state: self.model.state().clone(),
            par: self.par,
            ds: self.ds,
            state_dot: self.state_dot.clone(),
            par_dot: self.par_dot,
        });
        self.push_record(initial_iters, true)?;
        if self.config.post_process == PostProcess::EveryPoint {
            self.model.post_process()?;
        }
        self.monitor_prev = self.model.monitor();
        self.snapped = self.detect()?;
        Ok(())
    }

    fn create_initial_tangent(&mut self) -> Result<()> {
        self.model.compute_jacobian()?;
        let dfdpar =
            newton::compute_dfdpar(&mut self.model, &self.config.par_name, self.config.epsilon)?;
        self.state_dot = match self.config.initial_tangent {
            InitialTangent::Solve => {
                self.model.solve(&dfdpar)?;
                let mut xd = self.model.solution().clone();
                xd.scale(-1.0);
                xd
            }
            InitialTangent::Assign => {
                let mut xd = dfdpar;
                xd.scale(-1.0);
                xd
            }
        };
        self.par_dot = 1.0;
        self.normalize_tangent();
        debug!(
            "initial tangent: |xdot| = {:.3e}, pardot = {:.3e}",
            self.state_dot.norm(),
            self.par_dot
        );
        Ok(())
    }

    /// Scale the tangent so that `zeta*||xdot||^2 + pardot^2 = 1`.
    fn normalize_tangent(&mut self) {
        let factor = (self.config.zeta * self.state_dot.dot(&self.state_dot)
            + self.par_dot * self.par_dot)
            .sqrt();
        if factor > 0.0 {
            self.state_dot.scale(1.0 / factor);
            self.par_dot /= factor;
        }
    }

    /// Tangent at the current accepted point, oriented to keep moving
    /// the same way along the branch.
    fn create_tangent(&mut self) -> Result<()> {
        let prev_state_dot = self.state_dot.clone();
        let prev_par_dot = self.par_dot;

        match self.config.tangent {
            TangentKind::Euler => {
                if !self.euler_tangent()? {
                    // Singular Jacobian near a fold; keep the previous
                    // tangent and carry on.
                    warn!("tangent solve failed, reusing previous tangent");
                    self.state_dot = prev_state_dot;
                    self.par_dot = prev_par_dot;
                    return Ok(());
                }
            }
            TangentKind::Secant => {
                if let (Some(newest), Some(previous)) =
                    (self.history.newest(), self.history.previous())
                {
                    let mut xd = newest.state.clone();
                    xd.update(-1.0, &previous.state, 1.0);
                    self.state_dot = xd;
                    self.par_dot = newest.par - previous.par;
                } else if !self.euler_tangent()? {
                    warn!("tangent solve failed, reusing previous tangent");
                    self.state_dot = prev_state_dot;
                    self.par_dot = prev_par_dot;
                    return Ok(());
                }
            }
        }
        self.normalize_tangent();

        // Orientation continuity along the branch.
        let orient = self.config.zeta * self.state_dot.dot(&prev_state_dot)
            + self.par_dot * prev_par_dot;
        if orient < 0.0 {
            self.state_dot.scale(-1.0);
            self.par_dot = -self.par_dot;
        }
        Ok(())
    }

    /// `J xdot = -dF/dpar`, `pardot = 1` before normalization. Returns
    /// false when the solve fails.
    fn euler_tangent(&mut self) -> Result<bool> {
        self.model.compute_jacobian()?;
        let dfdpar =
            newton::compute_dfdpar(&mut self.model, &self.config.par_name, self.config.epsilon)?;
        match self.model.solve(&dfdpar) {
            Ok(()) => {
                self.state_dot = self.model.solution().clone();
                self.state_dot.scale(-1.0);
                self.par_dot = 1.0;
                Ok(true)
            }
            Err(Error::LinearSolve { what }) => {
                debug!("tangent solve failed: {what}");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Predict along the tangent and correct back onto the branch.
    fn attempt_step(&mut self) -> Result<NewtonReport> {
        self.phase = Phase::Predicting;
        self.create_tangent()?;
        self.predict()?;
        self.phase = Phase::Correcting;

        let base = self.history.newest().ok_or_else(|| Error::FatalAbort {
            what: "no stored point to continue from".to_string(),
        })?;
        let bordered = Bordered {
            state_dot: &self.state_dot,
            par_dot: self.par_dot,
            zeta: self.config.zeta,
            ds: self.ds,
            base_state: &base.state,
            base_par: base.par,
            par_name: &self.config.par_name,
        };
        let report = newton::correct(&mut self.model, &bordered, &self.corrector)?;
        self.par = self.model.get_par(&self.config.par_name)?;
        Ok(report)
    }

    /// Euler predictor `x += ds * xdot`, `par += ds * pardot`, halving
    /// `ds` while the predicted residual exceeds the predictor bound.
    fn predict(&mut self) -> Result<()> {
        let (base_state, base_par) = {
            let base = self.history.newest().ok_or_else(|| Error::FatalAbort {
                what: "no stored point to predict from".to_string(),
            })?;
            (base.state.clone(), base.par)
        };

        let mut halvings = 0;
        loop {
            let state = self.model.state_mut();
            state.update(1.0, &base_state, 0.0);
            state.update(self.ds, &self.state_dot, 1.0);
            self.par = base_par + self.ds * self.par_dot;
            self.model.set_par(&self.config.par_name, self.par)?;
            self.model.compute_rhs()?;

            if self.config.predictor_bound <= 0.0
                || self.model.rhs().norm() <= self.config.predictor_bound
                || (self.ds / 2.0).abs() < self.config.ds_min
                || halvings >= 16
            {
                break;
            }
            halvings += 1;
            self.ds /= 2.0;
            debug!(
                "predicted residual {:.3e} above bound, halving ds to {:.3e}",
                self.model.rhs().norm(),
                self.ds
            );
        }
        Ok(())
    }

    fn accept(&mut self, report: NewtonReport) -> Result<()> {
        self.phase = Phase::Accepted;
        self.step += 1;
        self.sum_newton_iterations += report.iterations;
        self.reset_counter = 0;

        self.history.push(Snapshot {
            state: self.model.state().clone(),
            par: self.par,
            ds: self.ds,
            state_dot: self.state_dot.clone(),
            par_dot: self.par_dot,
        });
        self.push_record(report.iterations, report.converged)?;

        info!(
            "step {:4}  par = {:+.6e}  |x| = {:.6e}  ds = {:+.3e}  newton = {}{}",
            self.step,
            self.par,
            self.model.state().norm(),
            self.ds,
            report.iterations,
            if report.converged { "" } else { "  (not converged)" }
        );

        if self.config.post_process == PostProcess::EveryPoint {
            self.model.post_process()?;
        }

        self.phase = Phase::Detecting;
        let snapped = self.detect()?;
        if !snapped && !self.snapped && !self.config.fix_step_size {
            self.adapt_step_size(&report);
        }
        self.snapped = snapped;
        Ok(())
    }

    /// Grow the step after easy corrections, shrink it after laborious
    /// ones, keeping the magnitude inside [ds_min, ds_max].
    fn adapt_step_size(&mut self, report: &NewtonReport) {
        let factor = if report.iterations < self.config.min_newton_iterations {
            self.config.scale1
        } else if report.iterations > self.config.opt_newton_iterations {
            1.0 / self.config.scale1
        } else {
            return;
        };
        let mag = (self.ds * factor)
            .abs()
            .clamp(self.config.ds_min, self.config.ds_max);
        self.ds = mag.copysign(self.ds);
        debug!("step size adapted to {:+.3e}", self.ds);
    }

    /// Detection at the freshly accepted point. Returns true when `ds`
    /// was set to land exactly on a destination.
    fn detect(&mut self) -> Result<bool> {
        if self.config.user_detect {
            let value = self.model.monitor();
            if let (Some(prev), Some(now)) = (self.monitor_prev, value) {
                if prev * now < 0.0 {
                    info!(
                        "monitor changed sign ({prev:+.3e} -> {now:+.3e}), stopping"
                    );
                    self.monitor_triggered = true;
                }
            }
            self.monitor_prev = value;
        }

        match self.config.detect {
            DetectMode::Destination => {
                let Some(&dest) = self.destinations.first() else {
                    self.reached_last_destination = true;
                    return Ok(false);
                };
                if (self.par - dest).abs() < self.config.destination_tolerance {
                    info!("destination par = {dest:+.6e} reached at step {}", self.step);
                    self.destinations.remove(0);
                    if self.destinations.is_empty() {
                        self.reached_last_destination = true;
                    } else if self.par_dot != 0.0 {
                        // Fresh step toward the next destination; the
                        // snapped ds would be needlessly small.
                        let toward = (self.destinations[0] - self.par) / self.par_dot;
                        self.ds = self.config.ds_init.abs().copysign(toward);
                    }
                    return Ok(false);
                }
                if self.par_dot != 0.0 {
                    let ds_to_dest = (dest - self.par) / self.par_dot;
                    if ds_to_dest.abs() < self.ds.abs() {
                        debug!("snapping ds to {ds_to_dest:+.3e} to land on {dest:+.6e}");
                        self.ds = ds_to_dest;
                        return Ok(true);
                    }
                }
            }
            DetectMode::TurningPoint => {
                if let (Some(newest), Some(previous)) =
                    (self.history.newest(), self.history.previous())
                {
                    if newest.par_dot * previous.par_dot < 0.0 {
                        info!(
                            "turning point bracketed between par = {:+.6e} and {:+.6e}",
                            previous.par, newest.par
                        );
                        self.turning_point = Some((previous.par, newest.par));
                    }
                }
            }
        }
        Ok(false)
    }

    /// Decide the fate of a failed correction: roll back and retry with
    /// a smaller step, push on unconverged, or give up.
    fn reject(&mut self, report: &NewtonReport) -> Result<RejectOutcome> {
        self.phase = Phase::Rejected;
        warn!(
            "step {} rejected after {} Newton iterations (residual {:.3e})",
            self.step + 1,
            report.iterations,
            report.residual
        );

        if !self.config.reject_failed_newton {
            warn!("proceeding with unconverged step");
            return Ok(RejectOutcome::Proceed);
        }

        if self.ds.abs() <= self.config.ds_min * (1.0 + 1.0e-12) {
            if self.config.give_up_at_ds_min {
                self.restore()?;
                error!("-----------------------------------------------------");
                error!("no convergence at the minimum step size, aborting run");
                error!("-----------------------------------------------------");
                return Ok(RejectOutcome::Abort);
            }
            warn!("at the minimum step size, accepting unconverged step");
            return Ok(RejectOutcome::Proceed);
        }

        self.restore()?;
        self.reset_counter += 1;
        let factor = if self.reset_counter > 1 {
            self.config.scale2
        } else {
            self.config.scale1
        };
        let mag = (self.ds / factor).abs().max(self.config.ds_min);
        self.ds = mag.copysign(self.ds);
        info!("retrying with ds = {:+.3e}", self.ds);
        Ok(RejectOutcome::Retry)
    }

    /// Roll the model back to the last accepted point.
    fn restore(&mut self) -> Result<()> {
        let snap = self.history.newest().ok_or_else(|| Error::FatalAbort {
            what: "no stored point to restore".to_string(),
        })?;
        self.model.state_mut().update(1.0, &snap.state, 0.0);
        self.par = snap.par;
        self.state_dot = snap.state_dot.clone();
        self.par_dot = snap.par_dot;
        self.model.set_par(&self.config.par_name, self.par)?;
        self.model.compute_rhs()?;
        Ok(())
    }

    fn push_record(&mut self, newton_iterations: usize, converged: bool) -> Result<()> {
        let eigenvalues = if self.config.eigen_analysis == EigenAnalysis::EveryPoint {
            self.model.compute_jacobian()?;
            eigen::solve(&self.model, &self.eigen_config)?.values
        } else {
            Vec::new()
        };
        self.records.push(BranchRecord {
            step: self.step,
            par: self.par,
            state_norm: self.model.state().norm(),
            ds: self.ds,
            newton_iterations,
            converged,
            par_dot: self.par_dot,
            state_dot_norm: self.state_dot.norm(),
            eigenvalues,
        });
        Ok(())
    }

    /// Closing bookkeeping: final eigenvalue analysis, post-processing
    /// and a run summary.
    fn finalize(&mut self) -> Result<()> {
        if self.phase != Phase::Aborted {
            self.phase = Phase::Finalizing;
        }
        if self.config.eigen_analysis == EigenAnalysis::AtEnd {
            self.model.compute_jacobian()?;
            let report = eigen::solve(&self.model, &self.eigen_config)?;
            info!(
                "final eigenvalue analysis: {}/{} converged",
                report.converged,
                report.values.len()
            );
            if let Some(last) = self.records.last_mut() {
                last.eigenvalues = report.values;
            }
        }
        // EveryPoint already processed the final point in accept().
        if self.config.post_process == PostProcess::FinalPoint {
            self.model.post_process()?;
        }

        let summary = self.analyze_hist();
        info!(
            "continuation finished: {} steps, par in [{:+.6e}, {:+.6e}], {:.1} Newton iterations per step",
            summary.steps, summary.par_min, summary.par_max, summary.mean_newton_iterations
        );
        if summary.direction_changes > 0 {
            info!(
                "branch changed parameter direction {} time(s)",
                summary.direction_changes
            );
        }
        if summary.unconverged_points > 0 {
            warn!("{} point(s) kept without a converged correction", summary.unconverged_points);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScalarFold;

    fn quiet_config(par: &str) -> ContinuationConfig {
        let mut cfg = ContinuationConfig::new(par);
        cfg.ds_init = 0.1;
        cfg.ds_max = 0.5;
        cfg
    }

    #[test]
    fn reaches_single_destination() {
        let mut cfg = quiet_config("lambda");
        cfg.destinations = vec![4.0];
        let model = ScalarFold::new_root(1.0, 1.0);
        let mut cont = Continuation::new(model, cfg).unwrap();
        let status = cont.run().unwrap();

        assert_eq!(status, 0);
        let last = cont.records().last().unwrap();
        assert!((last.par - 4.0).abs() < 1e-6, "par = {}", last.par);
        assert!(
            (cont.model().state()[0] - 2.0).abs() < 1e-6,
            "x = {}",
            cont.model().state()[0]
        );
    }

    #[test]
    fn tangent_normalization_holds_along_branch() {
        let mut cfg = quiet_config("lambda");
        cfg.destinations = vec![3.0];
        let model = ScalarFold::new_root(1.0, 1.0);
        let mut cont = Continuation::new(model, cfg).unwrap();
        cont.run().unwrap();

        for r in cont.records() {
            let norm = r.state_dot_norm * r.state_dot_norm + r.par_dot * r.par_dot;
            assert!((norm - 1.0).abs() < 1e-10, "step {}: {}", r.step, norm);
        }
    }

    #[test]
    fn step_sizes_stay_within_bounds() {
        let mut cfg = quiet_config("lambda");
        cfg.destinations = vec![5.0];
        cfg.ds_max = 0.3;
        let model = ScalarFold::new_root(1.0, 1.0);
        let mut cont = Continuation::new(model, cfg).unwrap();
        cont.run().unwrap();

        // Snapped destination steps may undershoot ds_min, never
        // overshoot ds_max.
        for r in cont.records() {
            assert!(r.ds.abs() <= 0.3 + 1e-12, "step {}: ds = {}", r.step, r.ds);
        }
    }

    #[test]
    fn finds_turning_point_of_fold() {
        // lambda = -x^2 folds at lambda = 0; start on the lower branch.
        let mut cfg = quiet_config("lambda");
        cfg.detect = DetectMode::TurningPoint;
        cfg.max_steps = 200;
        let model = ScalarFold::new_fold(-1.0, -1.0);
        let mut cont = Continuation::new(model, cfg).unwrap();
        let status = cont.run().unwrap();

        assert_eq!(status, 0);
        let (a, b) = cont.turning_point().expect("no turning point found");
        assert!(a.max(b) > -0.2, "bracket ({a}, {b}) far from fold");
    }

    #[test]
    fn monitor_sign_change_stops_run() {
        let mut cfg = quiet_config("lambda");
        cfg.destinations = vec![9.0];
        cfg.user_detect = true;
        // x crosses 1.5 well before lambda reaches 9.
        let model = ScalarFold::new_root(1.0, 1.0).with_monitor(1.5);
        let mut cont = Continuation::new(model, cfg).unwrap();
        cont.run().unwrap();

        let last = cont.records().last().unwrap();
        assert!(last.par < 9.0 - 1e-3, "ran past the monitor: {}", last.par);
        assert!((cont.model().state()[0] - 1.5).abs() < 0.5);
    }

    #[test]
    fn hopeless_initial_guess_is_a_hard_error() {
        let mut cfg = quiet_config("lambda");
        cfg.destinations = vec![2.0];
        // From x = 1e6 the fixed-parameter Newton roughly halves x per
        // iteration; ten iterations cannot reach the branch.
        let model = ScalarFold::new_root(1.0e6, 1.0);
        let mut cont = Continuation::new(model, cfg).unwrap();
        let err = cont.run().unwrap_err();
        assert!(matches!(err, Error::NonConvergence { .. }), "got {err}");
    }

    #[test]
    fn branch_summary_reflects_the_run() {
        let mut cfg = quiet_config("lambda");
        cfg.destinations = vec![4.0];
        let model = ScalarFold::new_root(1.0, 1.0);
        let mut cont = Continuation::new(model, cfg).unwrap();
        cont.run().unwrap();

        let summary = cont.analyze_hist();
        assert_eq!(summary.steps + 1, cont.records().len());
        assert!((summary.par_min - 1.0).abs() < 1e-12, "{}", summary.par_min);
        assert!((summary.par_max - 4.0).abs() < 1e-6, "{}", summary.par_max);
        assert_eq!(summary.direction_changes, 0);
        assert_eq!(summary.unconverged_points, 0);
        assert!(summary.mean_newton_iterations >= 1.0);
    }

    #[test]
    fn branch_summary_counts_the_fold() {
        let mut cfg = quiet_config("lambda");
        cfg.detect = DetectMode::TurningPoint;
        cfg.max_steps = 200;
        let model = ScalarFold::new_fold(-1.0, -1.0);
        let mut cont = Continuation::new(model, cfg).unwrap();
        cont.run().unwrap();

        let summary = cont.analyze_hist();
        assert_eq!(summary.direction_changes, 1);
        assert!(summary.par_max < 0.1, "{}", summary.par_max);
    }

    #[test]
    fn max_steps_bounds_the_run() {
        let mut cfg = quiet_config("lambda");
        cfg.destinations = vec![1.0e6];
        cfg.max_steps = 7;
        let model = ScalarFold::new_root(1.0, 1.0);
        let mut cont = Continuation::new(model, cfg).unwrap();
        cont.run().unwrap();
        // Initial point plus at most seven accepted steps.
        assert!(cont.records().len() <= 8);
    }
}
