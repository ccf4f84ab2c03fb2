//! Complex vectors built from pairs of ordinary vectors.
//!
//! The eigenvalue analysis works on complex-valued vectors while the model
//! only provides real vector storage, so a complex vector is maintained as
//! a (real, imaginary) pair with dot/axpy/scale defined via standard
//! complex arithmetic over the pair.

use num_complex::Complex;

use crate::error::{Error, Result};
use crate::vector::Vector;

#[derive(Clone)]
pub struct ComplexVector<V: Vector> {
    pub re: V,
    pub im: V,
}

impl<V: Vector> ComplexVector<V> {
    /// Build from a real part; the imaginary part is zeroed.
    pub fn from_real(re: V) -> Self {
        let im = re.zero_like();
        Self { re, im }
    }

    /// Build from separately computed parts; they must agree in length.
    pub fn new(re: V, im: V) -> Result<Self> {
        if re.length() != im.length() {
            return Err(Error::Dimension {
                expected: re.length(),
                got: im.length(),
            });
        }
        Ok(Self { re, im })
    }

    pub fn length(&self) -> usize {
        self.re.length()
    }

    /// 2-norm, `sqrt(re(self . self))`.
    pub fn norm(&self) -> f64 {
        self.dot(self).re.max(0.0).sqrt()
    }

    /// Complex inner product `conj(self) . other`.
    pub fn dot(&self, other: &Self) -> Complex<f64> {
        let re = self.re.dot(&other.re) + self.im.dot(&other.im);
        let im = self.re.dot(&other.im) - self.im.dot(&other.re);
        Complex::new(re, im)
    }

    /// `self += a * x`
    pub fn axpy(&mut self, a: Complex<f64>, x: &Self) {
        assert_eq!(self.length(), x.length());
        self.re.update(a.re, &x.re, 1.0);
        self.re.update(-a.im, &x.im, 1.0);
        self.im.update(a.im, &x.re, 1.0);
        self.im.update(a.re, &x.im, 1.0);
    }

    /// `self = a*x + b*self`
    pub fn axpby(&mut self, a: Complex<f64>, x: &Self, b: Complex<f64>) {
        self.scale(b);
        self.axpy(a, x);
    }

    /// `self = a*self`
    pub fn scale(&mut self, a: Complex<f64>) {
        let tmp = self.re.clone();
        self.re.update(-a.im, &self.im, a.re);
        self.im.update(a.im, &tmp, a.re);
    }

    pub fn zero(&mut self) {
        self.re.put_scalar(0.0);
        self.im.put_scalar(0.0);
    }

    /// Randomize the real part, zero the imaginary part.
    pub fn randomize(&mut self, rng: &mut dyn rand::RngCore) {
        self.re.randomize(rng);
        self.im.put_scalar(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    fn cvec(re: Vec<f64>, im: Vec<f64>) -> ComplexVector<DVector<f64>> {
        ComplexVector::new(DVector::from_vec(re), DVector::from_vec(im)).unwrap()
    }

    #[test]
    fn mismatched_parts_are_rejected() {
        let r = ComplexVector::new(DVector::<f64>::zeros(2), DVector::zeros(3));
        assert!(matches!(r, Err(Error::Dimension { expected: 2, got: 3 })));
    }

    #[test]
    fn dot_is_conjugate_linear() {
        // (1 + i) . (1 - i) with conjugation of the first argument:
        // conj(1+i) * (1-i) = (1-i)(1-i) = -2i
        let a = cvec(vec![1.0], vec![1.0]);
        let b = cvec(vec![1.0], vec![-1.0]);
        let d = a.dot(&b);
        assert!((d.re).abs() < 1e-14);
        assert!((d.im + 2.0).abs() < 1e-14);
    }

    #[test]
    fn scale_rotates() {
        // i * (1 + 0i) = i
        let mut v = cvec(vec![1.0], vec![0.0]);
        v.scale(Complex::new(0.0, 1.0));
        assert!((v.re[0]).abs() < 1e-14);
        assert!((v.im[0] - 1.0).abs() < 1e-14);
    }

    #[test]
    fn axpy_matches_complex_arithmetic() {
        // y = (2 - i)*(1 + i) + (1 + i) = (3+1i) + (1+1i) = 4 + 2i
        let x = cvec(vec![1.0], vec![1.0]);
        let mut y = cvec(vec![1.0], vec![1.0]);
        y.axpy(Complex::new(2.0, -1.0), &x);
        assert!((y.re[0] - 4.0).abs() < 1e-14);
        assert!((y.im[0] - 2.0).abs() < 1e-14);
    }

    #[test]
    fn norm_of_unit_pair() {
        let v = cvec(vec![3.0], vec![4.0]);
        assert!((v.norm() - 5.0).abs() < 1e-14);
    }
}
