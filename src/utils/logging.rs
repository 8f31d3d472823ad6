//! Logger setup for the binaries
//!
//! The library only emits through the `log` facade; executables call
//! [`init_logger`] once at startup.

use std::path::Path;

use log::info;
use thiserror::Error;

pub use log::LevelFilter;

#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error("Error opening the log file: {0}")]
    LogFile(std::io::Error),

    #[error("Error installing the logger: {0}")]
    Install(log::SetLoggerError),
}

/// Install a stdout logger, optionally mirrored to `log_file`.
///
/// Must only be called once per process.
pub fn init_logger(min_level: LevelFilter, log_file: Option<&Path>) -> Result<(), LoggerInitError> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            if record.level() > log::Level::Info {
                out.finish(format_args!(
                    "[{} {:5}] {}: {}",
                    chrono::Local::now().format("%H:%M:%S%.3f"),
                    record.level(),
                    record.target(),
                    message
                ))
            } else {
                out.finish(format_args!(
                    "[{} {:5}] {}",
                    chrono::Local::now().format("%H:%M:%S%.3f"),
                    record.level(),
                    message
                ))
            }
        })
        .level(min_level)
        .chain(std::io::stdout());

    if let Some(path) = log_file {
        dispatch = dispatch.chain(fern::log_file(path).map_err(LoggerInitError::LogFile)?);
    }
    dispatch.apply().map_err(LoggerInitError::Install)?;

    info!("Logging initialised at {:?}", min_level);
    if let Some(path) = log_file {
        info!("    Log file: {}", path.display());
    }
    Ok(())
}
