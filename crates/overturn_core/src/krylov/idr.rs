//! IDR(s) with bi-orthogonalization.
//!
//! Short-recurrence induced-dimension-reduction solver after van Gijzen
//! and Sonneveld. Memory stays at O(s) vectors independent of the
//! iteration count, which makes it the solver of choice for the large
//! coupled systems where a long GMRES basis is unaffordable. The shadow
//! space is seeded deterministically so runs are reproducible.

use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::krylov::KrylovReport;
use crate::model::LinearOperator;
use crate::vector::Vector;

/// Threshold of the "maintaining convergence" omega strategy.
const KAPPA: f64 = 0.7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdrConfig {
    /// Relative residual tolerance.
    pub tol: f64,
    /// Matrix-vector product budget.
    pub max_iters: usize,
    /// Shadow-space dimension.
    pub s: usize,
    /// Seed for the random shadow space.
    pub seed: u64,
}

impl Default for IdrConfig {
    fn default() -> Self {
        Self {
            tol: 1.0e-8,
            max_iters: 500,
            s: 4,
            seed: 31,
        }
    }
}

pub struct Idr {
    pub config: IdrConfig,
}

impl Idr {
    pub fn new(config: IdrConfig) -> Self {
        Self { config }
    }

    /// Solve `A x = b` starting from the initial guess in `x`.
    pub fn solve<L: LinearOperator>(
        &self,
        op: &L,
        b: &L::Vector,
        x: &mut L::Vector,
    ) -> Result<KrylovReport> {
        let cfg = &self.config;
        let s = cfg.s.max(1);

        let norm_b = b.norm();
        if norm_b == 0.0 {
            x.put_scalar(0.0);
            return Ok(KrylovReport {
                converged: true,
                iterations: 0,
                residual: 0.0,
            });
        }
        let tol_abs = cfg.tol * norm_b;

        let mut scratch = b.zero_like();
        op.apply_matrix(x, &mut scratch)?;
        let mut r = b.clone();
        r.update(-1.0, &scratch, 1.0);
        let mut norm_r = r.norm();
        if norm_r < tol_abs {
            return Ok(KrylovReport {
                converged: true,
                iterations: 0,
                residual: norm_r / norm_b,
            });
        }

        // Random orthonormal shadow space P.
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let mut p: Vec<L::Vector> = Vec::with_capacity(s);
        for _ in 0..s {
            let mut q = b.zero_like();
            q.randomize(&mut rng);
            for pi in &p {
                let h = q.dot(pi);
                q.update(-h, pi, 1.0);
            }
            q.scale(1.0 / q.norm());
            p.push(q);
        }

        let mut g: Vec<L::Vector> = (0..s).map(|_| b.zero_like()).collect();
        let mut u: Vec<L::Vector> = (0..s).map(|_| b.zero_like()).collect();
        // Lower-triangular interaction matrix M[i][k] = p_i . g_k.
        let mut m = vec![vec![0.0; s]; s];
        for (i, row) in m.iter_mut().enumerate() {
            row[i] = 1.0;
        }

        let mut om = 1.0;
        let mut iters = 0;

        while norm_r >= tol_abs && iters < cfg.max_iters {
            let mut f: Vec<f64> = p.iter().map(|pi| pi.dot(&r)).collect();

            for k in 0..s {
                if norm_r < tol_abs || iters >= cfg.max_iters {
                    break;
                }

                // Forward substitution on the trailing block of M.
                let mut c = vec![0.0; s];
                for i in k..s {
                    let mut sum = f[i];
                    for j in k..i {
                        sum -= m[i][j] * c[j];
                    }
                    if m[i][i] == 0.0 {
                        return Ok(KrylovReport {
                            converged: false,
                            iterations: iters,
                            residual: norm_r / norm_b,
                        });
                    }
                    c[i] = sum / m[i][i];
                }

                // v = r - sum c_i g_i, then preconditioned.
                let mut v = r.clone();
                for i in k..s {
                    v.update(-c[i], &g[i], 1.0);
                }
                op.apply_precon(&v, &mut scratch)?;

                // New direction u_k and image g_k = A u_k.
                let mut uk = scratch.clone();
                uk.scale(om);
                for i in k..s {
                    uk.update(c[i], &u[i], 1.0);
                }
                let mut gk = b.zero_like();
                op.apply_matrix(&uk, &mut gk)?;
                iters += 1;

                // Bi-orthogonalize against the first k shadow vectors.
                for i in 0..k {
                    let alpha = p[i].dot(&gk) / m[i][i];
                    gk.update(-alpha, &g[i], 1.0);
                    uk.update(-alpha, &u[i], 1.0);
                }
                for i in k..s {
                    m[i][k] = p[i].dot(&gk);
                }
                if m[k][k] == 0.0 {
                    return Ok(KrylovReport {
                        converged: false,
                        iterations: iters,
                        residual: norm_r / norm_b,
                    });
                }

                let beta = f[k] / m[k][k];
                r.update(-beta, &gk, 1.0);
                x.update(beta, &uk, 1.0);
                norm_r = r.norm();
                debug!("idr iteration {iters}: residual {:.3e}", norm_r / norm_b);

                g[k] = gk;
                u[k] = uk;
                for i in (k + 1)..s {
                    f[i] -= beta * m[i][k];
                }
            }

            if norm_r < tol_abs || iters >= cfg.max_iters {
                break;
            }

            // Enter the next Sonneveld space G_{j+1}.
            op.apply_precon(&r, &mut scratch)?;
            let v = scratch.clone();
            let mut t = b.zero_like();
            op.apply_matrix(&v, &mut t)?;
            iters += 1;

            om = omega(&t, &r);
            if om == 0.0 {
                break;
            }
            r.update(-om, &t, 1.0);
            x.update(om, &v, 1.0);
            norm_r = r.norm();
            debug!("idr iteration {iters}: residual {:.3e}", norm_r / norm_b);
        }

        Ok(KrylovReport {
            converged: norm_r < tol_abs,
            iterations: iters,
            residual: norm_r / norm_b,
        })
    }
}

/// Minimal-residual omega with the maintaining-convergence correction: a
/// too-small angle between t and r would stall the recursion, so omega is
/// enlarged toward kappa.
fn omega<V: Vector>(t: &V, r: &V) -> f64 {
    let norm_t = t.norm();
    let norm_r = r.norm();
    if norm_t == 0.0 {
        return 0.0;
    }
    let tr = t.dot(r);
    let rho = tr.abs() / (norm_t * norm_r);
    let mut om = tr / (norm_t * norm_t);
    if rho < KAPPA && rho > 0.0 {
        om *= KAPPA / rho;
    }
    om
}
