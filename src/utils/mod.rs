//! Utility modules for mpc_bridge

pub mod logging;
pub mod visualization;

pub use logging::{init_logger, LevelFilter, LoggerInitError};
pub use visualization::{colors, save_history_svg, PathStyle, TrackPlot};
