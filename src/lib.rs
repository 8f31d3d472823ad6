//! mpc_bridge - Model predictive steering and throttle control
//!
//! This crate turns a stream of vehicle telemetry (pose, speed, last
//! actuation and a few waypoints ahead) into steering/throttle commands by
//! fitting a reference polynomial in the vehicle frame and solving a
//! nonlinear MPC problem over a short horizon every cycle.

// Core modules
pub mod common;
pub mod utils;

// Algorithm modules
pub mod geometry;
pub mod optimization;
pub mod path_tracking;
pub mod bridge;

// Re-export common types for convenience
pub use common::{Point2D, Pose2D, State2D, Path2D, TrackingState, Actuation};
pub use common::{MotionModel, NlpProblem, NlpSolver, NlpSolution};
pub use common::{MpcError, MpcResult, SolverError};
pub use bridge::{ControllerConfig, MpcController, Telemetry, CommandSource, CycleOutput};
pub use path_tracking::SteerCommand;
