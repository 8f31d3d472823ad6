//! Geometry helpers: rigid frame transforms and polynomial reference curves

pub mod frame;
pub mod polynomial;

pub use frame::*;
pub use polynomial::*;
