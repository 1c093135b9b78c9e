//! Fixed-size dense linear algebra for the filters.
//!
//! Dimensions are const generics so a 3-state filter and a 2-state filter
//! are distinct types with stack-allocated storage.

use std::ops::{Add, Mul, Sub};

/// Column vector.
pub type Vector<const N: usize> = [f64; N];

/// Row-major `R x C` matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix<const R: usize, const C: usize>(pub [[f64; C]; R]);

impl<const R: usize, const C: usize> Matrix<R, C> {
    pub const fn zeros() -> Self {
        Self([[0.0; C]; R])
    }

    pub const fn from_rows(rows: [[f64; C]; R]) -> Self {
        Self(rows)
    }

    #[inline]
    pub fn get(&self, r: usize, c: usize) -> f64 {
        self.0[r][c]
    }

    pub fn transpose(&self) -> Matrix<C, R> {
        let mut out = Matrix::<C, R>::zeros();
        for r in 0..R {
            for c in 0..C {
                out.0[c][r] = self.0[r][c];
            }
        }
        out
    }

    pub fn scale(&self, s: f64) -> Self {
        let mut out = *self;
        out.0.iter_mut().flatten().for_each(|v| *v *= s);
        out
    }

    pub fn mul_vec(&self, v: &Vector<C>) -> Vector<R> {
        let mut out = [0.0; R];
        for (o, row) in out.iter_mut().zip(self.0.iter()) {
            *o = row.iter().zip(v.iter()).map(|(a, b)| a * b).sum();
        }
        out
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().flatten().all(|v| v.is_finite())
    }

    /// Row-major copy of all entries.
    pub fn to_vec(&self) -> Vec<f64> {
        self.0.iter().flatten().copied().collect()
    }
}

impl<const N: usize> Matrix<N, N> {
    pub fn identity() -> Self {
        let mut out = Self::zeros();
        for i in 0..N {
            out.0[i][i] = 1.0;
        }
        out
    }

    pub fn from_diagonal(d: &Vector<N>) -> Self {
        let mut out = Self::zeros();
        for i in 0..N {
            out.0[i][i] = d[i];
        }
        out
    }

    pub fn diagonal(&self) -> Vector<N> {
        let mut out = [0.0; N];
        for (i, o) in out.iter_mut().enumerate() {
            *o = self.0[i][i];
        }
        out
    }

    /// `(A + Aᵀ) / 2`.
    pub fn symmetrize(&self) -> Self {
        let mut out = *self;
        for r in 0..N {
            for c in (r + 1)..N {
                let m = 0.5 * (self.0[r][c] + self.0[c][r]);
                out.0[r][c] = m;
                out.0[c][r] = m;
            }
        }
        out
    }
}

impl<const R: usize, const C: usize> Default for Matrix<R, C> {
    fn default() -> Self {
        Self::zeros()
    }
}

impl<const R: usize, const C: usize> Add for Matrix<R, C> {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        for (a, b) in self.0.iter_mut().flatten().zip(rhs.0.iter().flatten()) {
            *a += b;
        }
        self
    }
}

impl<const R: usize, const C: usize> Sub for Matrix<R, C> {
    type Output = Self;

    fn sub(mut self, rhs: Self) -> Self {
        for (a, b) in self.0.iter_mut().flatten().zip(rhs.0.iter().flatten()) {
            *a -= b;
        }
        self
    }
}

impl<const R: usize, const K: usize, const C: usize> Mul<Matrix<K, C>> for Matrix<R, K> {
    type Output = Matrix<R, C>;

    fn mul(self, rhs: Matrix<K, C>) -> Matrix<R, C> {
        let mut out = Matrix::<R, C>::zeros();
        for r in 0..R {
            for c in 0..C {
                out.0[r][c] = (0..K).map(|k| self.0[r][k] * rhs.0[k][c]).sum();
            }
        }
        out
    }
}

/// `a bᵀ`.
pub fn outer<const N: usize>(a: &Vector<N>, b: &Vector<N>) -> Matrix<N, N> {
    let mut out = Matrix::<N, N>::zeros();
    for r in 0..N {
        for c in 0..N {
            out.0[r][c] = a[r] * b[c];
        }
    }
    out
}

pub fn add<const N: usize>(a: &Vector<N>, b: &Vector<N>) -> Vector<N> {
    std::array::from_fn(|i| a[i] + b[i])
}

pub fn sub<const N: usize>(a: &Vector<N>, b: &Vector<N>) -> Vector<N> {
    std::array::from_fn(|i| a[i] - b[i])
}

pub fn dot<const N: usize>(a: &Vector<N>, b: &Vector<N>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Relative determinant threshold below which a matrix counts as singular.
pub const SINGULARITY_TOLERANCE: f64 = 1e-12;

/// Inversion for the small symmetric matrices used as innovation covariances.
pub trait Invert: Sized {
    fn determinant(&self) -> f64;

    /// Inverse, or `None` if the matrix is singular, ill-conditioned, or
    /// not finite.
    fn try_inverse(&self) -> Option<Self>;
}

impl Invert for Matrix<1, 1> {
    fn determinant(&self) -> f64 {
        self.0[0][0]
    }

    fn try_inverse(&self) -> Option<Self> {
        let a = self.0[0][0];
        if !a.is_finite() || a <= 0.0 {
            return None;
        }
        Some(Self([[1.0 / a]]))
    }
}

impl Invert for Matrix<2, 2> {
    fn determinant(&self) -> f64 {
        self.0[0][0] * self.0[1][1] - self.0[0][1] * self.0[1][0]
    }

    fn try_inverse(&self) -> Option<Self> {
        let [[a, b], [c, d]] = self.0;
        let det = self.determinant();
        let scale = (a * d).abs();
        if !self.is_finite() || !det.is_finite() || det <= SINGULARITY_TOLERANCE * scale {
            return None;
        }
        Some(Self([[d / det, -b / det], [-c / det, a / det]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_matrix_multiply() {
        let a = Matrix::from_rows([[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
        let b = Matrix::from_rows([[1.0, 0.0, 2.0], [0.0, 1.0, 3.0]]);
        let c = a * b;
        assert_eq!(c.0, [[1.0, 2.0, 8.0], [3.0, 4.0, 18.0], [5.0, 6.0, 28.0]]);
    }

    #[test]
    fn test_transpose_and_mul_vec() {
        let a = Matrix::from_rows([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        assert_eq!(a.transpose().0, [[1.0, 4.0], [2.0, 5.0], [3.0, 6.0]]);
        assert_eq!(a.mul_vec(&[1.0, 1.0, 1.0]), [6.0, 15.0]);
    }

    #[test]
    fn test_symmetrize() {
        let a = Matrix::from_rows([[1.0, 2.0], [4.0, 3.0]]).symmetrize();
        assert_eq!(a.0, [[1.0, 3.0], [3.0, 3.0]]);
    }

    #[test]
    fn test_inverse_2x2() {
        let s = Matrix::from_rows([[4.0, 1.0], [1.0, 3.0]]);
        let inv = s.try_inverse().unwrap();
        let id = s * inv;
        assert_relative_eq!(id.0[0][0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(id.0[0][1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(id.0[1][1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_inverse_rejects_singular() {
        let s = Matrix::from_rows([[1.0, 2.0], [2.0, 4.0]]);
        assert!(s.try_inverse().is_none());
        let nearly = Matrix::from_rows([[1.0, 1.0], [1.0, 1.0 + 1e-15]]);
        assert!(nearly.try_inverse().is_none());
        let nan = Matrix::from_rows([[f64::NAN, 0.0], [0.0, 1.0]]);
        assert!(nan.try_inverse().is_none());
    }

    #[test]
    fn test_inverse_1x1() {
        assert_eq!(Matrix([[4.0]]).try_inverse(), Some(Matrix([[0.25]])));
        assert!(Matrix([[0.0]]).try_inverse().is_none());
    }

    #[test]
    fn test_outer_and_vector_ops() {
        let o = outer(&[1.0, 2.0], &[3.0, 4.0]);
        assert_eq!(o.0, [[3.0, 4.0], [6.0, 8.0]]);
        assert_eq!(add(&[1.0, 2.0], &[3.0, 4.0]), [4.0, 6.0]);
        assert_eq!(sub(&[1.0, 2.0], &[3.0, 4.0]), [-2.0, -2.0]);
        assert_eq!(dot(&[1.0, 2.0], &[3.0, 4.0]), 11.0);
    }
}
