//! Polynomial reference curves y = f(x) in the vehicle frame
//!
//! Fitting uses a Householder QR factorization of the Vandermonde design
//! matrix instead of the normal equations, so near-degenerate waypoint
//! layouts are reported as rank deficient rather than silently amplified.

use nalgebra::{DMatrix, DVector};
use crate::common::{MpcError, MpcResult, Path2D, Point2D};

/// Relative threshold on the diagonal of R below which a column is
/// considered linearly dependent.
const RANK_TOLERANCE: f64 = 1e-10;

/// Polynomial with coefficients stored lowest order first
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial {
    coeffs: Vec<f64>,
}

impl Polynomial {
    pub fn new(coeffs: Vec<f64>) -> Self {
        Polynomial { coeffs }
    }

    /// Least-squares fit of the given degree through `(xs[i], ys[i])`.
    pub fn fit(xs: &[f64], ys: &[f64], degree: usize) -> MpcResult<Self> {
        if xs.len() != ys.len() {
            return Err(MpcError::InvalidParameter(format!(
                "x/y length mismatch: {} vs {}",
                xs.len(),
                ys.len()
            )));
        }
        let cols = degree + 1;
        if xs.len() < cols {
            return Err(MpcError::InsufficientWaypoints { required: cols, got: xs.len() });
        }
        if xs.iter().chain(ys.iter()).any(|v| !v.is_finite()) {
            return Err(MpcError::InvalidParameter("non-finite fit input".to_string()));
        }

        let mut a = DMatrix::zeros(xs.len(), cols);
        for (i, &x) in xs.iter().enumerate() {
            a[(i, 0)] = 1.0;
            for j in 1..cols {
                a[(i, j)] = a[(i, j - 1)] * x;
            }
        }
        let b = DVector::from_column_slice(ys);

        let (q, r) = a.qr().unpack();

        let max_diag = r.diagonal().iter().fold(0.0_f64, |m, d| m.max(d.abs()));
        if max_diag == 0.0 || r.diagonal().iter().any(|d| d.abs() <= RANK_TOLERANCE * max_diag) {
            return Err(MpcError::RankDeficient { required: cols });
        }

        let qtb = q.transpose() * b;
        let solution = r
            .solve_upper_triangular(&qtb)
            .ok_or(MpcError::RankDeficient { required: cols })?;

        Ok(Polynomial::new(solution.iter().copied().collect()))
    }

    /// Fit against the points of a path
    pub fn fit_path(path: &Path2D, degree: usize) -> MpcResult<Self> {
        Self::fit(&path.x_coords(), &path.y_coords(), degree)
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coeffs
    }

    /// Coefficient of x^i, zero beyond the stored degree
    pub fn coefficient(&self, i: usize) -> f64 {
        self.coeffs.get(i).copied().unwrap_or(0.0)
    }

    pub fn degree(&self) -> usize {
        self.coeffs.len().saturating_sub(1)
    }

    /// f(x), Horner's scheme
    pub fn eval(&self, x: f64) -> f64 {
        self.coeffs.iter().rev().fold(0.0, |acc, &c| acc * x + c)
    }

    /// f'(x)
    pub fn derivative(&self, x: f64) -> f64 {
        self.coeffs
            .iter()
            .enumerate()
            .skip(1)
            .rev()
            .fold(0.0, |acc, (i, &c)| acc * x + i as f64 * c)
    }

    /// f''(x)
    pub fn second_derivative(&self, x: f64) -> f64 {
        self.coeffs
            .iter()
            .enumerate()
            .skip(2)
            .rev()
            .fold(0.0, |acc, (i, &c)| acc * x + (i * (i - 1)) as f64 * c)
    }

    /// Heading of the curve tangent at x
    pub fn desired_heading(&self, x: f64) -> f64 {
        self.derivative(x).atan()
    }

    /// Lateral offset of the curve at the vehicle position (x = 0).
    pub fn cross_track_error(&self) -> f64 {
        self.coefficient(0)
    }

    /// Heading error at x = 0, expressed as the correction -atan(f'(0)).
    pub fn heading_error(&self) -> f64 {
        -self.coefficient(1).atan()
    }

    /// Evaluate the curve at the given abscissae
    pub fn sample(&self, xs: &[f64]) -> Path2D {
        xs.iter().map(|&x| Point2D::new(x, self.eval(x))).collect()
    }
}
