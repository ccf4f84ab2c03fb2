//! Continuation configuration.
//!
//! All numerical policy of the engine lives here: step-size bounds and
//! scalings, Newton iteration bands and tolerances, tangent and detection
//! modes, backtracking and give-up behavior. The struct can be filled
//! directly or through the flat key/value option surface (`set_option`),
//! which accepts spelled-out parameter-list names.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tangent used in the body of the continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TangentKind {
    /// Solve the linearized system for a fresh tangent every step.
    Euler,
    /// Finite difference of the last two accepted points.
    Secant,
}

/// How the very first tangent is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitialTangent {
    /// Solve `J * xdot = -dF/dpar`.
    Solve,
    /// Assign `xdot = -dF/dpar` directly (valid when J is close to I).
    Assign,
}

/// Convergence test applied in the Newton corrector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResidualTest {
    /// 2-norm of the full augmented residual (F and arclength row).
    AugmentedNorm,
    /// Infinity norm of the update (dx, dpar).
    UpdateInf,
}

/// Special-point detection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectMode {
    /// Converge onto the parameter destinations in order.
    Destination,
    /// Stop at a turning point (sign change of pardot).
    TurningPoint,
}

/// When to run the generalized eigenvalue analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EigenAnalysis {
    Never,
    AtEnd,
    EveryPoint,
}

/// When to call the model's `post_process` hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostProcess {
    EveryPoint,
    FinalPoint,
}

/// Maximum number of parameter destinations kept in the list.
pub const MAX_DESTINATIONS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuationConfig {
    /// Name of the continuation parameter in the model.
    pub par_name: String,

    /// Initial arclength step size; its sign sets the run direction.
    pub ds_init: f64,
    /// Minimum step-size magnitude.
    pub ds_min: f64,
    /// Maximum step-size magnitude.
    pub ds_max: f64,
    /// Conservative scaling for adaptive step-size changes.
    pub scale1: f64,
    /// Drastic scaling applied on repeated rejections.
    pub scale2: f64,

    /// Additional weighting of the state tangent in the arclength
    /// normalization `zeta*||xdot||^2 + pardot^2 = 1`.
    pub zeta: f64,
    /// Finite-difference perturbation for dF/dpar.
    pub epsilon: f64,

    /// Maximum number of continuation steps.
    pub max_steps: usize,

    /// Below this Newton iteration count the step size grows.
    pub min_newton_iterations: usize,
    /// Above this Newton iteration count the step size shrinks.
    pub opt_newton_iterations: usize,
    /// Hard cap on Newton iterations per correction.
    pub max_newton_iterations: usize,
    /// Corrector convergence tolerance.
    pub newton_tolerance: f64,

    /// Tolerance for convergence onto a destination.
    pub destination_tolerance: f64,
    /// Ordered parameter destinations; at most [`MAX_DESTINATIONS`].
    pub destinations: Vec<f64>,

    /// Bound on ||F|| of the predicted state; 0 disables the check.
    pub predictor_bound: f64,

    /// Enable backtracking inside the Newton corrector.
    pub backtracking: bool,
    /// Number of halvings tried during backtracking.
    pub num_backtracking_steps: usize,
    /// Allowed residual growth ratio before backtracking gives up early.
    pub backtrack_increase: f64,

    /// Reject steps whose Newton correction failed. Set to false if you
    /// feel lucky.
    pub reject_failed_newton: bool,
    /// Abort the run when the minimum step size is reached without
    /// convergence.
    pub give_up_at_ds_min: bool,
    /// Disable adaptive step sizing.
    pub fix_step_size: bool,

    /// Reuse the dF/dpar solve across Newton iterations (partial
    /// Newton-chord iteration). Valid when the parameter dependence of
    /// the right-hand side is constant.
    pub newton_chord_hybrid: bool,

    /// Let the model's monitor define an extra stopping criterion.
    pub user_detect: bool,

    pub tangent: TangentKind,
    pub initial_tangent: InitialTangent,
    pub residual_test: ResidualTest,
    pub detect: DetectMode,
    pub eigen_analysis: EigenAnalysis,
    pub post_process: PostProcess,
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            par_name: String::new(),
            ds_init: 1.0e-2,
            ds_min: 1.0e-8,
            ds_max: 1.0,
            scale1: 1.3,
            scale2: 2.0,
            zeta: 1.0,
            epsilon: 1.0e-6,
            max_steps: 200,
            min_newton_iterations: 3,
            opt_newton_iterations: 5,
            max_newton_iterations: 10,
            newton_tolerance: 1.0e-8,
            destination_tolerance: 1.0e-6,
            destinations: Vec::new(),
            predictor_bound: 0.0,
            backtracking: false,
            num_backtracking_steps: 5,
            backtrack_increase: 10.0,
            reject_failed_newton: true,
            give_up_at_ds_min: true,
            fix_step_size: false,
            newton_chord_hybrid: false,
            user_detect: false,
            tangent: TangentKind::Euler,
            initial_tangent: InitialTangent::Solve,
            residual_test: ResidualTest::AugmentedNorm,
            detect: DetectMode::Destination,
            eigen_analysis: EigenAnalysis::Never,
            post_process: PostProcess::FinalPoint,
        }
    }
}

impl ContinuationConfig {
    pub fn new(par_name: impl Into<String>) -> Self {
        Self {
            par_name: par_name.into(),
            ..Self::default()
        }
    }

    /// Set a single option through the flat key/value surface, e.g. from
    /// a parsed parameter file.
    pub fn set_option(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "continuation parameter" => self.par_name = value.to_string(),
            "initial step size" => self.ds_init = parse_f64(key, value)?,
            "minimum step size" => self.ds_min = parse_f64(key, value)?,
            "maximum step size" => self.ds_max = parse_f64(key, value)?,
            "scaling factor" => self.scale1 = parse_f64(key, value)?,
            "reset scaling factor" => self.scale2 = parse_f64(key, value)?,
            "state tangent scaling" => self.zeta = parse_f64(key, value)?,
            "epsilon increment" => self.epsilon = parse_f64(key, value)?,
            "maximum number of steps" => self.max_steps = parse_usize(key, value)?,
            "minimum desired Newton iterations" => {
                self.min_newton_iterations = parse_usize(key, value)?
            }
            "optimal Newton iterations" => self.opt_newton_iterations = parse_usize(key, value)?,
            "maximum Newton iterations" => self.max_newton_iterations = parse_usize(key, value)?,
            "Newton tolerance" => self.newton_tolerance = parse_f64(key, value)?,
            "destination tolerance" => self.destination_tolerance = parse_f64(key, value)?,
            "destinations" => {
                self.destinations = value
                    .split(',')
                    .map(|s| parse_f64(key, s.trim()))
                    .collect::<Result<Vec<f64>>>()?
            }
            "predictor bound" => self.predictor_bound = parse_f64(key, value)?,
            "enable backtracking" => self.backtracking = parse_bool(key, value)?,
            "backtracking steps" => self.num_backtracking_steps = parse_usize(key, value)?,
            "backtracking increase" => self.backtrack_increase = parse_f64(key, value)?,
            "reject failed Newton" => self.reject_failed_newton = parse_bool(key, value)?,
            "give up at minimum step size" => self.give_up_at_ds_min = parse_bool(key, value)?,
            "fixed step size" => self.fix_step_size = parse_bool(key, value)?,
            "Newton chord hybrid" => self.newton_chord_hybrid = parse_bool(key, value)?,
            "user detection" => self.user_detect = parse_bool(key, value)?,
            "tangent type" => {
                self.tangent = match value {
                    "E" | "Euler" => TangentKind::Euler,
                    "S" | "Secant" => TangentKind::Secant,
                    _ => return Err(bad_value(key, value)),
                }
            }
            "initial tangent" => {
                self.initial_tangent = match value {
                    "E" | "Solve" => InitialTangent::Solve,
                    "A" | "Assign" => InitialTangent::Assign,
                    _ => return Err(bad_value(key, value)),
                }
            }
            "residual test" => {
                self.residual_test = match value {
                    "R" => ResidualTest::AugmentedNorm,
                    "D" => ResidualTest::UpdateInf,
                    _ => return Err(bad_value(key, value)),
                }
            }
            "detection mode" => {
                self.detect = match value {
                    "D" => DetectMode::Destination,
                    "P" => DetectMode::TurningPoint,
                    _ => return Err(bad_value(key, value)),
                }
            }
            "eigenvalue analysis" => {
                self.eigen_analysis = match value {
                    "N" | "Never" => EigenAnalysis::Never,
                    "E" | "End" => EigenAnalysis::AtEnd,
                    "P" | "Every" => EigenAnalysis::EveryPoint,
                    _ => return Err(bad_value(key, value)),
                }
            }
            "post processing" => {
                self.post_process = match value {
                    "at every point" => PostProcess::EveryPoint,
                    "at final point" => PostProcess::FinalPoint,
                    _ => return Err(bad_value(key, value)),
                }
            }
            _ => {
                return Err(Error::Configuration {
                    what: format!("unrecognized option '{key}'"),
                })
            }
        }
        Ok(())
    }

    /// Check the option set, clamping recoverable problems with a warning.
    /// Only an unusable combination (empty parameter name) is an error.
    pub fn validate(&mut self) -> Result<()> {
        if self.par_name.is_empty() {
            return Err(Error::Configuration {
                what: "continuation parameter name is empty".to_string(),
            });
        }
        if self.ds_min <= 0.0 {
            warn!("minimum step size {} <= 0, using 1e-8", self.ds_min);
            self.ds_min = 1.0e-8;
        }
        if self.ds_max < self.ds_min {
            warn!(
                "maximum step size {} below minimum {}, swapping",
                self.ds_max, self.ds_min
            );
            std::mem::swap(&mut self.ds_max, &mut self.ds_min);
        }
        if self.ds_init == 0.0 {
            warn!("initial step size is zero, using minimum step size");
            self.ds_init = self.ds_min;
        }
        let mag = self.ds_init.abs().clamp(self.ds_min, self.ds_max);
        if mag != self.ds_init.abs() {
            warn!(
                "initial step size {} outside [{}, {}], clamping",
                self.ds_init, self.ds_min, self.ds_max
            );
            self.ds_init = mag.copysign(self.ds_init);
        }
        if self.scale1 <= 1.0 {
            warn!("scaling factor {} <= 1, using 1.1", self.scale1);
            self.scale1 = 1.1;
        }
        if self.scale2 <= 1.0 {
            warn!("reset scaling factor {} <= 1, using 2.0", self.scale2);
            self.scale2 = 2.0;
        }
        if self.zeta <= 0.0 {
            warn!("state tangent scaling {} <= 0, using 1.0", self.zeta);
            self.zeta = 1.0;
        }
        if self.epsilon <= 0.0 {
            warn!("epsilon increment {} <= 0, using 1e-6", self.epsilon);
            self.epsilon = 1.0e-6;
        }
        if self.max_newton_iterations == 0 {
            warn!("maximum Newton iterations is zero, using 1");
            self.max_newton_iterations = 1;
        }
        if self.opt_newton_iterations > self.max_newton_iterations {
            warn!(
                "optimal Newton iterations {} above maximum {}, clamping",
                self.opt_newton_iterations, self.max_newton_iterations
            );
            self.opt_newton_iterations = self.max_newton_iterations;
        }
        if self.min_newton_iterations > self.opt_newton_iterations {
            warn!(
                "minimum desired Newton iterations {} above optimal {}, clamping",
                self.min_newton_iterations, self.opt_newton_iterations
            );
            self.min_newton_iterations = self.opt_newton_iterations;
        }
        if self.destinations.len() > MAX_DESTINATIONS {
            warn!(
                "{} destinations given, keeping the first {}",
                self.destinations.len(),
                MAX_DESTINATIONS
            );
            self.destinations.truncate(MAX_DESTINATIONS);
        }
        if self.backtrack_increase <= 1.0 {
            warn!(
                "backtracking increase {} <= 1, using 10.0",
                self.backtrack_increase
            );
            self.backtrack_increase = 10.0;
        }
        Ok(())
    }
}

fn parse_f64(key: &str, value: &str) -> Result<f64> {
    value.parse::<f64>().map_err(|_| bad_value(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize> {
    value.parse::<usize>().map_err(|_| bad_value(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(bad_value(key, value)),
    }
}

fn bad_value(key: &str, value: &str) -> Error {
    Error::Configuration {
        what: format!("invalid value '{value}' for option '{key}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_surface_round_trips() {
        let mut cfg = ContinuationConfig::default();
        cfg.set_option("continuation parameter", "lambda").unwrap();
        cfg.set_option("initial step size", "0.1").unwrap();
        cfg.set_option("destinations", "2.0, 4.0").unwrap();
        cfg.set_option("tangent type", "S").unwrap();
        cfg.set_option("detection mode", "P").unwrap();
        cfg.set_option("eigenvalue analysis", "E").unwrap();
        cfg.set_option("enable backtracking", "true").unwrap();

        assert_eq!(cfg.par_name, "lambda");
        assert_eq!(cfg.ds_init, 0.1);
        assert_eq!(cfg.destinations, vec![2.0, 4.0]);
        assert_eq!(cfg.tangent, TangentKind::Secant);
        assert_eq!(cfg.detect, DetectMode::TurningPoint);
        assert_eq!(cfg.eigen_analysis, EigenAnalysis::AtEnd);
        assert!(cfg.backtracking);
    }

    #[test]
    fn unknown_option_is_rejected() {
        let mut cfg = ContinuationConfig::default();
        assert!(cfg.set_option("no such knob", "1").is_err());
        assert!(cfg.set_option("initial step size", "abc").is_err());
    }

    #[test]
    fn validate_clamps_bad_values() {
        let mut cfg = ContinuationConfig::new("lambda");
        cfg.zeta = -1.0;
        cfg.scale1 = 0.5;
        cfg.ds_init = 100.0;
        cfg.ds_max = 1.0;
        cfg.destinations = (0..20).map(|i| i as f64).collect();
        cfg.validate().unwrap();

        assert_eq!(cfg.zeta, 1.0);
        assert_eq!(cfg.scale1, 1.1);
        assert_eq!(cfg.ds_init, 1.0);
        assert_eq!(cfg.destinations.len(), MAX_DESTINATIONS);
    }

    #[test]
    fn validate_requires_parameter_name() {
        let mut cfg = ContinuationConfig::default();
        assert!(cfg.validate().is_err());
    }
}
