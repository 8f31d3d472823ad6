//! Common traits defining the seams of the control pipeline

use nalgebra::{DMatrix, DVector};
use crate::common::error::SolverError;

/// Trait for vehicle motion models
pub trait MotionModel {
    /// State type
    type State;
    /// Control type
    type Control;

    /// Propagate state forward in time
    fn propagate(&self, state: &Self::State, control: &Self::Control, dt: f64) -> Self::State;

    /// Jacobian of `propagate` with respect to state
    fn jacobian_state(&self, state: &Self::State, control: &Self::Control, dt: f64)
        -> DMatrix<f64>;

    /// Jacobian of `propagate` with respect to control
    fn jacobian_control(&self, state: &Self::State, control: &Self::Control, dt: f64)
        -> DMatrix<f64>;
}

/// A smooth nonlinear program
///
/// ```text
/// minimize    f(z)
/// subject to  c(z) = 0
///             lower <= z <= upper
/// ```
///
/// Infinite bounds mean the variable is free on that side.
pub trait NlpProblem {
    /// Number of decision variables
    fn num_variables(&self) -> usize;

    /// Number of equality constraints
    fn num_constraints(&self) -> usize;

    /// Variable bounds `(lower, upper)`
    fn bounds(&self) -> (DVector<f64>, DVector<f64>);

    /// Objective value f(z)
    fn objective(&self, z: &DVector<f64>) -> f64;

    /// Objective gradient
    fn gradient(&self, z: &DVector<f64>) -> DVector<f64>;

    /// Objective Hessian (symmetric, positive semi-definite)
    fn hessian(&self, z: &DVector<f64>) -> DMatrix<f64>;

    /// Equality constraint residuals c(z)
    fn constraints(&self, z: &DVector<f64>) -> DVector<f64>;

    /// Constraint Jacobian, `num_constraints x num_variables`
    fn jacobian(&self, z: &DVector<f64>) -> DMatrix<f64>;
}

/// Locally optimal, feasible point returned by an [`NlpSolver`]
#[derive(Debug, Clone)]
pub struct NlpSolution {
    pub z: DVector<f64>,
    pub objective: f64,
    pub iterations: usize,
    /// max-norm of the constraint residual at `z`
    pub constraint_violation: f64,
}

/// Backend able to solve an [`NlpProblem`]
pub trait NlpSolver {
    /// Solve starting from `initial_guess`. Failure to reach a feasible local
    /// optimum is an error, never a partial result.
    fn solve(
        &self,
        problem: &dyn NlpProblem,
        initial_guess: &DVector<f64>,
    ) -> Result<NlpSolution, SolverError>;
}
