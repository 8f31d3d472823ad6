//! Error types for mpc_bridge

use thiserror::Error;

/// Main error type for the control pipeline
#[derive(Debug, Error)]
pub enum MpcError {
    /// Telemetry record is malformed or incomplete
    #[error("Invalid telemetry: {0}")]
    InvalidTelemetry(String),
    /// Too few waypoints for the requested polynomial degree
    #[error("Insufficient waypoints: need at least {required}, got {got}")]
    InsufficientWaypoints { required: usize, got: usize },
    /// Least-squares design matrix does not have full column rank
    #[error("Rank-deficient fit: design matrix has rank below {required}")]
    RankDeficient { required: usize },
    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    /// The nonlinear program could not be solved
    #[error("Solve failed: {0}")]
    Solve(#[from] SolverError),
    /// Configuration could not be parsed
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Plot could not be rendered or saved
    #[error("Visualization error: {0}")]
    Visualization(String),
}

impl MpcError {
    /// Input-side failures: the cycle emits the safe-default command.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MpcError::InvalidTelemetry(_)
                | MpcError::InsufficientWaypoints { .. }
                | MpcError::RankDeficient { .. }
        )
    }
}

/// Failures reported by a nonlinear-programming backend
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("variable {index} has lower bound {lower} above upper bound {upper}")]
    InfeasibleBounds { index: usize, lower: f64, upper: f64 },
    #[error("no convergence within {iterations} iterations (constraint violation {violation:.3e})")]
    NotConverged { iterations: usize, violation: f64 },
    #[error("wall-clock budget of {budget_s:.3} s exhausted after {iterations} iterations")]
    Timeout { budget_s: f64, iterations: usize },
    #[error("line search failed at iteration {iteration}")]
    LineSearch { iteration: usize },
    #[error("QP subproblem failed: {0}")]
    Subproblem(String),
    #[error("non-finite value in iterate {iteration}")]
    NonFinite { iteration: usize },
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Result type alias for pipeline operations
pub type MpcResult<T> = Result<T, MpcError>;
