//! Sequential quadratic programming backend
//!
//! Each iteration linearizes the equality constraints around the current
//! iterate and solves
//!
//! ```text
//! minimize    1/2 d^T H d + g^T d
//! subject to  J d = -c
//!             lower - z <= d <= upper - z
//! ```
//!
//! with H the objective Hessian (a Gauss-Newton model of the Lagrangian
//! Hessian, so every subproblem stays convex). The QP is handed to Clarabel,
//! a pure Rust interior-point solver. Steps are globalized with a
//! backtracking line search on the l1 merit function `f + rho * |c|_1`.

use std::time::Instant;

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT::{self, NonnegativeConeT, ZeroConeT},
};
use log::{debug, trace};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::common::{NlpProblem, NlpSolution, NlpSolver, SolverError};

/// Tuning for [`SqpSolver`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqpOptions {
    /// Maximum number of SQP iterations
    pub max_iterations: usize,
    /// Wall-clock budget for one solve [s]
    pub max_cpu_time: f64,
    /// Convergence threshold on the max-norm of the step, relative to
    /// `1 + |z|_inf`
    pub step_tolerance: f64,
    /// Convergence threshold on the max-norm of the constraint residual
    pub constraint_tolerance: f64,
    /// Sufficient-decrease constant of the Armijo condition
    pub armijo: f64,
    /// Smallest line-search step before giving up
    pub min_step: f64,
    /// Diagonal added to the Hessian
    pub regularization: f64,
    /// Iteration cap handed to the QP solver
    pub qp_max_iterations: u32,
}

impl Default for SqpOptions {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_cpu_time: 0.5,
            step_tolerance: 1e-6,
            constraint_tolerance: 1e-6,
            armijo: 1e-4,
            min_step: 1e-8,
            regularization: 1e-8,
            qp_max_iterations: 200,
        }
    }
}

/// QP step and the multipliers of the linearized equality constraints
struct QpStep {
    step: DVector<f64>,
    multipliers: DVector<f64>,
}

/// SQP solver with Clarabel QP subproblems
#[derive(Debug, Clone, Default)]
pub struct SqpSolver {
    options: SqpOptions,
}

impl SqpSolver {
    pub fn new(options: SqpOptions) -> Self {
        SqpSolver { options }
    }

    pub fn options(&self) -> &SqpOptions {
        &self.options
    }

    fn merit(&self, problem: &dyn NlpProblem, z: &DVector<f64>, penalty: f64) -> f64 {
        problem.objective(z) + penalty * l1_norm(&problem.constraints(z))
    }

    #[allow(clippy::too_many_arguments)]
    fn solve_qp(
        &self,
        hessian: &DMatrix<f64>,
        gradient: &DVector<f64>,
        jacobian: &DMatrix<f64>,
        residual: &DVector<f64>,
        z: &DVector<f64>,
        lower: &DVector<f64>,
        upper: &DVector<f64>,
        time_left: f64,
    ) -> Result<QpStep, SolverError> {
        let n = z.len();
        let m = residual.len();

        // rows: m equalities, then one row per finite bound
        let mut bound_rows: Vec<(usize, f64, f64)> = Vec::new();
        for i in 0..n {
            if upper[i].is_finite() {
                bound_rows.push((i, 1.0, upper[i] - z[i]));
            }
            if lower[i].is_finite() {
                bound_rows.push((i, -1.0, z[i] - lower[i]));
            }
        }

        let rows = m + bound_rows.len();
        let mut a = DMatrix::zeros(rows, n);
        let mut b = Vec::with_capacity(rows);
        a.rows_mut(0, m).copy_from(jacobian);
        b.extend(residual.iter().map(|c| -c));
        for (r, &(i, sign, rhs)) in bound_rows.iter().enumerate() {
            a[(m + r, i)] = sign;
            b.push(rhs);
        }

        let mut cones: Vec<SupportedConeT<f64>> = Vec::new();
        if m > 0 {
            cones.push(ZeroConeT(m));
        }
        if !bound_rows.is_empty() {
            cones.push(NonnegativeConeT(bound_rows.len()));
        }

        let settings = DefaultSettingsBuilder::default()
            .max_iter(self.options.qp_max_iterations)
            .time_limit(time_left.max(1e-3))
            .verbose(false)
            .build()
            .map_err(|e| SolverError::Subproblem(format!("{:?}", e)))?;

        let p = dense_to_csc_upper(hessian);
        let a = dense_to_csc(&a);
        let q: Vec<f64> = gradient.iter().copied().collect();

        let mut solver = DefaultSolver::new(&p, &q, &a, &b, &cones, settings)
            .map_err(|e| SolverError::Subproblem(format!("{:?}", e)))?;
        solver.solve();

        let solution = &solver.solution;
        match solution.status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => Ok(QpStep {
                step: DVector::from_column_slice(&solution.x),
                multipliers: DVector::from_iterator(m, solution.z.iter().take(m).copied()),
            }),
            status => Err(SolverError::Subproblem(format!("{:?}", status))),
        }
    }
}

impl NlpSolver for SqpSolver {
    fn solve(
        &self,
        problem: &dyn NlpProblem,
        initial_guess: &DVector<f64>,
    ) -> Result<NlpSolution, SolverError> {
        let start = Instant::now();
        let opts = &self.options;
        let n = problem.num_variables();

        if initial_guess.len() != n {
            return Err(SolverError::DimensionMismatch {
                expected: n,
                got: initial_guess.len(),
            });
        }
        let (lower, upper) = problem.bounds();
        for got in [lower.len(), upper.len()] {
            if got != n {
                return Err(SolverError::DimensionMismatch { expected: n, got });
            }
        }
        for i in 0..n {
            if lower[i] > upper[i] {
                return Err(SolverError::InfeasibleBounds {
                    index: i,
                    lower: lower[i],
                    upper: upper[i],
                });
            }
        }

        let mut z = project(initial_guess, &lower, &upper);
        let mut penalty = 1.0;
        let mut violation = f64::INFINITY;

        for iteration in 0..opts.max_iterations {
            let elapsed = start.elapsed().as_secs_f64();
            if elapsed >= opts.max_cpu_time {
                return Err(SolverError::Timeout {
                    budget_s: opts.max_cpu_time,
                    iterations: iteration,
                });
            }

            let residual = problem.constraints(&z);
            let gradient = problem.gradient(&z);
            if !all_finite(&residual) || !all_finite(&gradient) {
                return Err(SolverError::NonFinite { iteration });
            }
            violation = max_abs(&residual);

            let jacobian = problem.jacobian(&z);
            let mut hessian = problem.hessian(&z);
            for i in 0..n {
                hessian[(i, i)] += opts.regularization;
            }

            let qp = self.solve_qp(
                &hessian,
                &gradient,
                &jacobian,
                &residual,
                &z,
                &lower,
                &upper,
                opts.max_cpu_time - elapsed,
            )?;
            let step_norm = max_abs(&qp.step);

            trace!(
                "sqp iter {}: f = {:.6e}, |c| = {:.3e}, |d| = {:.3e}",
                iteration,
                problem.objective(&z),
                violation,
                step_norm
            );

            let small_step = step_norm <= opts.step_tolerance * (1.0 + max_abs(&z));
            if small_step && violation <= opts.constraint_tolerance {
                debug!("sqp converged after {} iterations", iteration);
                return Ok(NlpSolution {
                    objective: problem.objective(&z),
                    z,
                    iterations: iteration,
                    constraint_violation: violation,
                });
            }

            // l1 merit needs rho above the largest multiplier
            let needed = max_abs(&qp.multipliers);
            if penalty <= needed {
                penalty = 1.5 * needed + 1.0;
            }

            let merit0 = self.merit(problem, &z, penalty);
            let slope = gradient.dot(&qp.step) - penalty * l1_norm(&residual);

            let mut alpha = 1.0;
            loop {
                let trial = project(&(&z + &qp.step * alpha), &lower, &upper);
                let merit = self.merit(problem, &trial, penalty);
                if merit.is_finite() && merit <= merit0 + opts.armijo * alpha * slope.min(0.0) {
                    z = trial;
                    break;
                }
                alpha *= 0.5;
                if alpha < opts.min_step {
                    return Err(SolverError::LineSearch { iteration });
                }
            }
        }

        Err(SolverError::NotConverged { iterations: opts.max_iterations, violation })
    }
}

fn project(z: &DVector<f64>, lower: &DVector<f64>, upper: &DVector<f64>) -> DVector<f64> {
    DVector::from_iterator(
        z.len(),
        z.iter().zip(lower.iter().zip(upper.iter())).map(|(&v, (&lo, &hi))| v.max(lo).min(hi)),
    )
}

fn max_abs(v: &DVector<f64>) -> f64 {
    v.iter().fold(0.0, |m, x| m.max(x.abs()))
}

fn l1_norm(v: &DVector<f64>) -> f64 {
    v.iter().map(|x| x.abs()).sum()
}

fn all_finite(v: &DVector<f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}

/// Column-compressed copy of a dense matrix, dropping exact zeros
fn dense_to_csc(m: &DMatrix<f64>) -> CscMatrix<f64> {
    csc_from_entries(m, |_, _| true)
}

/// Upper triangle of a symmetric dense matrix in column-compressed form
fn dense_to_csc_upper(m: &DMatrix<f64>) -> CscMatrix<f64> {
    csc_from_entries(m, |i, j| i <= j)
}

fn csc_from_entries(m: &DMatrix<f64>, keep: impl Fn(usize, usize) -> bool) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = Vec::with_capacity(ncols + 1);
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    colptr.push(0);
    for j in 0..ncols {
        for i in 0..nrows {
            let v = m[(i, j)];
            if v != 0.0 && keep(i, j) {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr.push(rowval.len());
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// minimize (x - 1)^2 + (y - 2)^2  s.t.  x + y = 1, x <= x_max
    struct LinearlyConstrained {
        x_max: f64,
    }

    impl NlpProblem for LinearlyConstrained {
        fn num_variables(&self) -> usize {
            2
        }
        fn num_constraints(&self) -> usize {
            1
        }
        fn bounds(&self) -> (DVector<f64>, DVector<f64>) {
            (
                DVector::from_vec(vec![f64::NEG_INFINITY, f64::NEG_INFINITY]),
                DVector::from_vec(vec![self.x_max, f64::INFINITY]),
            )
        }
        fn objective(&self, z: &DVector<f64>) -> f64 {
            (z[0] - 1.0).powi(2) + (z[1] - 2.0).powi(2)
        }
        fn gradient(&self, z: &DVector<f64>) -> DVector<f64> {
            DVector::from_vec(vec![2.0 * (z[0] - 1.0), 2.0 * (z[1] - 2.0)])
        }
        fn hessian(&self, _z: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::identity(2, 2) * 2.0
        }
        fn constraints(&self, z: &DVector<f64>) -> DVector<f64> {
            DVector::from_vec(vec![z[0] + z[1] - 1.0])
        }
        fn jacobian(&self, _z: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::from_row_slice(1, 2, &[1.0, 1.0])
        }
    }

    /// minimize x^2 + y^2  s.t.  y = x^2 - 1
    struct Parabola;

    impl NlpProblem for Parabola {
        fn num_variables(&self) -> usize {
            2
        }
        fn num_constraints(&self) -> usize {
            1
        }
        fn bounds(&self) -> (DVector<f64>, DVector<f64>) {
            (DVector::from_element(2, f64::NEG_INFINITY), DVector::from_element(2, f64::INFINITY))
        }
        fn objective(&self, z: &DVector<f64>) -> f64 {
            z[0] * z[0] + z[1] * z[1]
        }
        fn gradient(&self, z: &DVector<f64>) -> DVector<f64> {
            z * 2.0
        }
        fn hessian(&self, _z: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::identity(2, 2) * 2.0
        }
        fn constraints(&self, z: &DVector<f64>) -> DVector<f64> {
            DVector::from_vec(vec![z[1] - z[0] * z[0] + 1.0])
        }
        fn jacobian(&self, z: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::from_row_slice(1, 2, &[-2.0 * z[0], 1.0])
        }
    }

    #[test]
    fn test_linear_equality() {
        let solver = SqpSolver::default();
        let problem = LinearlyConstrained { x_max: f64::INFINITY };
        let sol = solver.solve(&problem, &DVector::from_vec(vec![5.0, 5.0])).unwrap();
        assert_relative_eq!(sol.z[0], 0.0, epsilon = 1e-5);
        assert_relative_eq!(sol.z[1], 1.0, epsilon = 1e-5);
        assert!(sol.constraint_violation <= 1e-6);
    }

    #[test]
    fn test_active_bound() {
        let solver = SqpSolver::default();
        let problem = LinearlyConstrained { x_max: -1.0 };
        let sol = solver.solve(&problem, &DVector::zeros(2)).unwrap();
        assert_relative_eq!(sol.z[0], -1.0, epsilon = 1e-5);
        assert_relative_eq!(sol.z[1], 2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_nonlinear_equality() {
        let solver = SqpSolver::default();
        let sol = solver.solve(&Parabola, &DVector::from_vec(vec![1.0, 0.0])).unwrap();
        assert_relative_eq!(sol.z[0], 0.5_f64.sqrt(), epsilon = 1e-4);
        assert_relative_eq!(sol.z[1], -0.5, epsilon = 1e-4);
        assert_relative_eq!(sol.objective, 0.75, epsilon = 1e-4);
    }

    #[test]
    fn test_infeasible_bounds() {
        struct Crossed;
        impl NlpProblem for Crossed {
            fn num_variables(&self) -> usize {
                1
            }
            fn num_constraints(&self) -> usize {
                0
            }
            fn bounds(&self) -> (DVector<f64>, DVector<f64>) {
                (DVector::from_element(1, 1.0), DVector::from_element(1, -1.0))
            }
            fn objective(&self, z: &DVector<f64>) -> f64 {
                z[0] * z[0]
            }
            fn gradient(&self, z: &DVector<f64>) -> DVector<f64> {
                z * 2.0
            }
            fn hessian(&self, _z: &DVector<f64>) -> DMatrix<f64> {
                DMatrix::identity(1, 1) * 2.0
            }
            fn constraints(&self, _z: &DVector<f64>) -> DVector<f64> {
                DVector::zeros(0)
            }
            fn jacobian(&self, _z: &DVector<f64>) -> DMatrix<f64> {
                DMatrix::zeros(0, 1)
            }
        }

        let err = SqpSolver::default().solve(&Crossed, &DVector::zeros(1)).unwrap_err();
        assert!(matches!(err, SolverError::InfeasibleBounds { index: 0, .. }));
    }

    #[test]
    fn test_iteration_cap() {
        let solver = SqpSolver::new(SqpOptions { max_iterations: 1, ..SqpOptions::default() });
        let err = solver.solve(&Parabola, &DVector::from_vec(vec![3.0, 0.0])).unwrap_err();
        assert!(matches!(err, SolverError::NotConverged { iterations: 1, .. }));
    }

    #[test]
    fn test_exhausted_time_budget() {
        let solver = SqpSolver::new(SqpOptions { max_cpu_time: 0.0, ..SqpOptions::default() });
        let err = solver.solve(&Parabola, &DVector::from_vec(vec![1.0, 0.0])).unwrap_err();
        assert!(matches!(err, SolverError::Timeout { iterations: 0, .. }));
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = SqpSolver::default().solve(&Parabola, &DVector::zeros(3)).unwrap_err();
        assert_eq!(err, SolverError::DimensionMismatch { expected: 2, got: 3 });
    }

    #[test]
    fn test_csc_upper_triangle() {
        let m = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let csc = dense_to_csc_upper(&m);
        assert_eq!(csc.colptr, vec![0, 1, 3]);
        assert_eq!(csc.rowval, vec![0, 0, 1]);
        assert_eq!(csc.nzval, vec![4.0, 1.0, 3.0]);
    }
}
