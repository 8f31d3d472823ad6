//! Telemetry-to-command bridge: decoding, configuration and the control cycle

pub mod config;
pub mod controller;
pub mod telemetry;

pub use config::*;
pub use controller::*;
pub use telemetry::*;
