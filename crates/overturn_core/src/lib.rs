//! Pseudo-arclength continuation of large nonlinear systems.
//!
//! The crate traces solution branches of `F(x, par) = 0` for models that
//! expose their state, residual and Jacobian action through the
//! [`model::Model`] trait. A bordered Newton corrector keeps iterates on
//! the arclength hyperplane, matrix-free Krylov solvers (restarted GMRES
//! and IDR(s)) handle the inner linear systems, and a Jacobi-Davidson
//! style eigensolver tracks the rightmost spectrum along the branch. A
//! theta-scheme wrapper turns any steady model into an implicit
//! time stepper built from the same pieces.
//!
//! ```no_run
//! use overturn_core::config::ContinuationConfig;
//! use overturn_core::continuation::Continuation;
//! use overturn_core::models::ScalarFold;
//!
//! let mut cfg = ContinuationConfig::new("lambda");
//! cfg.destinations = vec![4.0];
//! let model = ScalarFold::new_root(1.0, 1.0);
//! let mut cont = Continuation::new(model, cfg)?;
//! let status = cont.run()?;
//! assert_eq!(status, 0);
//! # Ok::<(), overturn_core::error::Error>(())
//! ```

pub mod complex;
pub mod config;
pub mod continuation;
pub mod eigen;
pub mod error;
pub mod history;
pub mod krylov;
pub mod model;
pub mod models;
pub mod newton;
pub mod theta;
pub mod vector;

pub use config::ContinuationConfig;
pub use continuation::{BranchRecord, BranchSummary, Continuation, Phase};
pub use error::{Error, Result};
pub use model::{LinearOperator, Model};
pub use vector::Vector;
