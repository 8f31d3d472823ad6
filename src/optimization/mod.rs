//! Nonlinear-programming backends
//!
//! Backends implement [`crate::common::NlpSolver`], so the MPC formulation
//! never depends on a particular solver.

pub mod sqp;

pub use sqp::{SqpOptions, SqpSolver};
