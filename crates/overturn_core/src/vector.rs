//! State-vector abstraction.
//!
//! The engine never touches vector entries directly; everything goes
//! through scale/update/dot/norm so that a distributed backend can drop in
//! behind the same trait. The reference implementation is a dense
//! `nalgebra::DVector<f64>`.

use nalgebra::DVector;
use rand::Rng;

/// Minimal vector contract consumed by the continuation, Newton and Krylov
/// components.
///
/// `update` follows the `this = a*x + b*this` convention used throughout
/// the engine.
pub trait Vector: Clone {
    /// Global length of the vector.
    fn length(&self) -> usize;

    /// `self = a*x + b*self`
    fn update(&mut self, a: f64, x: &Self, b: f64);

    /// Inner product with `other`.
    fn dot(&self, other: &Self) -> f64;

    /// 2-norm.
    fn norm(&self) -> f64;

    /// Infinity norm.
    fn norm_inf(&self) -> f64;

    /// `self = a*self`
    fn scale(&mut self, a: f64);

    /// Set every entry to `a`.
    fn put_scalar(&mut self, a: f64);

    /// Fill with uniform random entries in [-1, 1).
    fn randomize(&mut self, rng: &mut dyn rand::RngCore);

    /// A zero vector with the same layout as `self`.
    fn zero_like(&self) -> Self {
        let mut v = self.clone();
        v.put_scalar(0.0);
        v
    }
}

impl Vector for DVector<f64> {
    fn length(&self) -> usize {
        self.len()
    }

    fn update(&mut self, a: f64, x: &Self, b: f64) {
        self.axpy(a, x, b);
    }

    fn dot(&self, other: &Self) -> f64 {
        DVector::dot(self, other)
    }

    fn norm(&self) -> f64 {
        DVector::norm(self)
    }

    fn norm_inf(&self) -> f64 {
        self.iter().fold(0.0_f64, |m, v| m.max(v.abs()))
    }

    fn scale(&mut self, a: f64) {
        *self *= a;
    }

    fn put_scalar(&mut self, a: f64) {
        self.fill(a);
    }

    fn randomize(&mut self, rng: &mut dyn rand::RngCore) {
        for e in self.iter_mut() {
            *e = rng.random::<f64>() * 2.0 - 1.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_follows_axpby_convention() {
        let x = DVector::from_vec(vec![1.0, 2.0]);
        let mut y = DVector::from_vec(vec![10.0, 20.0]);
        y.update(2.0, &x, 0.5);
        assert_eq!(y[0], 7.0);
        assert_eq!(y[1], 14.0);
    }

    #[test]
    fn norms_and_dot() {
        let v = DVector::from_vec(vec![3.0, -4.0]);
        assert!((Vector::norm(&v) - 5.0).abs() < 1e-14);
        assert_eq!(v.norm_inf(), 4.0);
        let w = DVector::from_vec(vec![1.0, 1.0]);
        assert_eq!(Vector::dot(&v, &w), -1.0);
    }

    #[test]
    fn zero_like_preserves_layout() {
        let v = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let z = v.zero_like();
        assert_eq!(z.length(), 3);
        assert_eq!(Vector::norm(&z), 0.0);
    }
}
