//! Common types, traits, and error definitions for mpc_bridge
//!
//! This module provides the foundational building blocks shared by the
//! geometry, fitting, optimization and control modules.

pub mod types;
pub mod traits;
pub mod error;

pub use types::*;
pub use traits::*;
pub use error::*;
