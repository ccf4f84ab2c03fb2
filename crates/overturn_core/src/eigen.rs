//! Rightmost eigenvalues of the generalized problem `A u = theta * B u`.
//!
//! A Jacobi-Davidson style subspace iteration: a real orthonormal search
//! space is expanded with preconditioned residuals, the pencil is
//! projected onto it and the small projected problem is solved densely.
//! Complex Ritz pairs are recovered from the real space as
//! [`ComplexVector`] pairs, so the model only ever provides real
//! matrix-vector products. Rightmost eigenvalues govern the stability of
//! the steady states the continuation traces; a real part crossing zero
//! signals a bifurcation.

use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::complex::ComplexVector;
use crate::error::{Error, Result};
use crate::model::Model;
use crate::vector::Vector;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EigenConfig {
    /// Number of rightmost eigenvalues to converge.
    pub num_values: usize,
    /// Relative residual tolerance for a Ritz pair.
    pub tolerance: f64,
    /// Outer iteration budget.
    pub max_iterations: usize,
    /// Search-space dimension triggering a restart.
    pub max_subspace: usize,
    /// Seed for the initial search direction.
    pub seed: u64,
}

impl Default for EigenConfig {
    fn default() -> Self {
        Self {
            num_values: 6,
            tolerance: 1.0e-7,
            max_iterations: 100,
            max_subspace: 30,
            seed: 77,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EigenReport {
    /// Rightmost eigenvalues, locked ones first.
    pub values: Vec<Complex<f64>>,
    /// How many of `values` met the residual tolerance.
    pub converged: usize,
    pub iterations: usize,
}

struct Subspace<V: Vector> {
    basis: Vec<V>,
    /// Images A v_j and B v_j, kept aligned with the basis.
    avs: Vec<V>,
    bvs: Vec<V>,
}

impl<V: Vector> Subspace<V> {
    fn len(&self) -> usize {
        self.basis.len()
    }

    /// Orthonormalize `w` against the basis and append it together with
    /// its operator images. Returns false when `w` is numerically in the
    /// span already.
    fn expand<M: Model<Vector = V>>(&mut self, model: &M, mut w: V) -> Result<bool> {
        let norm0 = w.norm();
        if norm0 == 0.0 {
            return Ok(false);
        }
        // Two Gram-Schmidt passes keep the basis orthonormal to working
        // precision.
        for _ in 0..2 {
            for v in &self.basis {
                let h = w.dot(v);
                w.update(-h, v, 1.0);
            }
        }
        let norm = w.norm();
        if norm < 1.0e-10 * norm0.max(1.0) {
            return Ok(false);
        }
        w.scale(1.0 / norm);

        let mut av = w.zero_like();
        model.apply_matrix(&w, &mut av)?;
        let mut bv = w.zero_like();
        model.apply_mass(&w, &mut bv)?;
        self.basis.push(w);
        self.avs.push(av);
        self.bvs.push(bv);
        Ok(true)
    }

    /// Real linear combination of the basis with complex coefficients.
    fn combine(&self, vectors: &[V], y: &DVector<Complex<f64>>) -> ComplexVector<V> {
        let mut re = vectors[0].zero_like();
        let mut im = vectors[0].zero_like();
        for (vj, yj) in vectors.iter().zip(y.iter()) {
            re.update(yj.re, vj, 1.0);
            im.update(yj.im, vj, 1.0);
        }
        ComplexVector { re, im }
    }
}

/// Compute the rightmost eigenvalues of `A u = theta * B u` at the
/// model's current linearization.
pub fn solve<M: Model>(model: &M, cfg: &EigenConfig) -> Result<EigenReport> {
    let mut space = Subspace {
        basis: Vec::new(),
        avs: Vec::new(),
        bvs: Vec::new(),
    };

    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let mut seed_vec = model.state().zero_like();
    seed_vec.randomize(&mut rng);
    if !space.expand(model, seed_vec)? {
        return Err(Error::Model {
            what: "could not seed eigenvalue search space".to_string(),
        });
    }

    let mut locked: Vec<Complex<f64>> = Vec::new();
    let mut last_ritz: Vec<Complex<f64>> = Vec::new();

    for iter in 1..=cfg.max_iterations {
        let k = space.len();

        // Projected pencil Ha y = theta Hb y.
        let mut ha = DMatrix::zeros(k, k);
        let mut hb = DMatrix::zeros(k, k);
        for j in 0..k {
            for i in 0..k {
                ha[(i, j)] = space.basis[i].dot(&space.avs[j]);
                hb[(i, j)] = space.basis[i].dot(&space.bvs[j]);
            }
        }
        let kmat = hb
            .lu()
            .solve(&ha)
            .ok_or_else(|| Error::LinearSolve {
                what: "singular projected mass matrix in eigenvalue analysis".to_string(),
            })?;

        // Rightmost-first ordering of the Ritz values.
        let eigs = kmat.complex_eigenvalues();
        let mut order: Vec<usize> = (0..k).collect();
        order.sort_by(|&a, &b| {
            eigs[b]
                .re
                .partial_cmp(&eigs[a].re)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    eigs[b]
                        .im
                        .partial_cmp(&eigs[a].im)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });
        last_ritz = order.iter().map(|&i| eigs[i]).collect();

        // Test Ritz pairs from the first unconverged one onward; lock
        // every pair that already meets the tolerance.
        let mut expanded = false;
        while locked.len() < cfg.num_values {
            let idx = locked.len();
            if idx >= k {
                break;
            }
            let theta = last_ritz[idx];
            let y = small_eigenvector(&kmat, theta);

            let u = space.combine(&space.basis, &y);
            let au = space.combine(&space.avs, &y);
            let mut r = au;
            let bu = space.combine(&space.bvs, &y);
            r.axpy(-theta, &bu);
            let res = r.norm() / u.norm().max(f64::MIN_POSITIVE);

            debug!(
                "eigen iteration {iter}: ritz {:.6e}{:+.6e}i residual {res:.3e}",
                theta.re, theta.im
            );

            if res < cfg.tolerance {
                locked.push(theta);
                continue;
            }

            // Restart by compression when the space is full: keep the
            // leading Ritz directions.
            if space.len() + 2 > cfg.max_subspace {
                let keep = (2 * cfg.num_values).min(k);
                let mut fresh = Subspace {
                    basis: Vec::new(),
                    avs: Vec::new(),
                    bvs: Vec::new(),
                };
                for &oi in order.iter().take(keep) {
                    let yk = small_eigenvector(&kmat, eigs[oi]);
                    let ritz = space.combine(&space.basis, &yk);
                    fresh.expand(model, ritz.re)?;
                    fresh.expand(model, ritz.im)?;
                }
                if fresh.len() == 0 {
                    warn!("eigenvalue restart produced an empty space, giving up");
                    break;
                }
                space = fresh;
                expanded = true;
                break;
            }

            // Expand with the preconditioned residual.
            let mut t = r.re.zero_like();
            model.apply_precon(&r.re, &mut t)?;
            let grew_re = space.expand(model, t)?;
            let mut grew_im = false;
            if theta.im != 0.0 {
                let mut ti = r.im.zero_like();
                model.apply_precon(&r.im, &mut ti)?;
                grew_im = space.expand(model, ti)?;
            }
            if !grew_re && !grew_im {
                warn!("eigenvalue search space stagnated at dimension {}", space.len());
            } else {
                expanded = true;
            }
            break;
        }

        if locked.len() >= cfg.num_values {
            info!(
                "eigenvalue analysis converged {} values in {iter} iterations",
                locked.len()
            );
            return Ok(EigenReport {
                values: locked,
                converged: cfg.num_values,
                iterations: iter,
            });
        }
        if !expanded && locked.len() < cfg.num_values && space.len() >= cfg.max_subspace {
            break;
        }
    }

    // Budget exhausted: report what we have, padding with the latest
    // unconverged Ritz values.
    let converged = locked.len();
    let mut values = locked;
    for v in last_ritz.into_iter().skip(converged) {
        if values.len() >= cfg.num_values {
            break;
        }
        values.push(v);
    }
    warn!(
        "eigenvalue analysis stopped with {converged}/{} values converged",
        cfg.num_values
    );
    Ok(EigenReport {
        values,
        converged,
        iterations: cfg.max_iterations,
    })
}

/// Eigenvector of the small projected matrix for a known eigenvalue, by
/// two steps of inverse iteration in complex arithmetic.
fn small_eigenvector(kmat: &DMatrix<f64>, theta: Complex<f64>) -> DVector<Complex<f64>> {
    let k = kmat.nrows();
    let shift = theta + Complex::new(1.0e-12 * (1.0 + theta.norm()), 0.0);
    let mut m = kmat.map(|x| Complex::new(x, 0.0));
    for i in 0..k {
        m[(i, i)] -= shift;
    }
    let lu = m.lu();
    let mut y = DVector::from_element(k, Complex::new(1.0, 0.0));
    y /= Complex::new(y.norm(), 0.0);
    for _ in 0..2 {
        match lu.solve(&y) {
            Some(z) => {
                let n = z.norm();
                if n == 0.0 {
                    break;
                }
                y = z / Complex::new(n, 0.0);
            }
            None => break,
        }
    }
    y
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DenseLinearModel;
    use nalgebra::DMatrix;

    fn diag_model(diag: &[f64]) -> DenseLinearModel {
        let n = diag.len();
        let a = DMatrix::from_fn(n, n, |i, j| if i == j { diag[i] } else { 0.0 });
        let b = DVector::from_element(n, 1.0);
        DenseLinearModel::new(a, b)
    }

    #[test]
    fn finds_rightmost_eigenvalues_of_diagonal_matrix() {
        let model = diag_model(&[-5.0, -4.0, -3.0, -2.0, -1.0, 3.0, 7.0]);
        let cfg = EigenConfig {
            num_values: 2,
            max_subspace: 10,
            ..EigenConfig::default()
        };
        let report = solve(&model, &cfg).unwrap();
        assert_eq!(report.converged, 2, "values {:?}", report.values);
        assert!((report.values[0].re - 7.0).abs() < 1e-5);
        assert!((report.values[1].re - 3.0).abs() < 1e-5);
        assert!(report.values[0].im.abs() < 1e-8);
    }

    #[test]
    fn generalized_problem_scales_by_mass() {
        // A = diag(2, -1), B = diag(2, 1): eigenvalues 1 and -1.
        let model =
            diag_model(&[2.0, -1.0]).with_mass(DVector::from_vec(vec![2.0, 1.0]));
        let cfg = EigenConfig {
            num_values: 2,
            max_subspace: 4,
            ..EigenConfig::default()
        };
        let report = solve(&model, &cfg).unwrap();
        assert_eq!(report.converged, 2);
        assert!((report.values[0].re - 1.0).abs() < 1e-6);
        assert!((report.values[1].re + 1.0).abs() < 1e-6);
    }
}
