// Path tracking module: vehicle model, MPC and command conversion

pub mod kinematic_bicycle;
pub mod mpc;
pub mod actuation;

pub use kinematic_bicycle::*;
pub use mpc::*;
pub use actuation::*;
