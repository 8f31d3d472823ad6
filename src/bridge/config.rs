//! Controller configuration
//!
//! All tuning lives in one immutable [`ControllerConfig`] handed to the
//! controller at construction. It can be loaded from TOML; absent keys take
//! the defaults below.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::{MpcError, MpcResult};
use crate::optimization::SqpOptions;
use crate::path_tracking::{MpcConfig, PostProcessorConfig};

/// mph to m/s
pub const MPH_TO_MPS: f64 = 0.44704;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Degree of the reference polynomial
    pub fit_degree: usize,
    /// Actuation latency compensated before solving [s]
    pub latency: f64,
    /// Telemetry speed to m/s
    pub speed_scale: f64,
    /// Simulator steering = steering_sign * model steering
    pub steering_sign: f64,
    /// Spacing of the displayed reference samples [m]
    pub reference_spacing: f64,
    /// Number of displayed reference samples
    pub reference_points: usize,
    /// Delay injected between solve and emission [ms]; 0 disables it
    pub emulated_delay_ms: u64,
    /// Seed each solve with the previous plan
    pub warm_start: bool,
    pub mpc: MpcConfig,
    pub sqp: SqpOptions,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            fit_degree: 3,
            latency: 0.1,
            speed_scale: MPH_TO_MPS,
            steering_sign: -1.0,
            reference_spacing: 2.0,
            reference_points: 50,
            emulated_delay_ms: 0,
            warm_start: false,
            mpc: MpcConfig::default(),
            sqp: SqpOptions::default(),
        }
    }
}

impl ControllerConfig {
    pub fn from_toml_str(text: &str) -> MpcResult<Self> {
        let config: ControllerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> MpcResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> MpcResult<String> {
        toml::to_string(self).map_err(|e| MpcError::InvalidParameter(e.to_string()))
    }

    pub fn validate(&self) -> MpcResult<()> {
        self.mpc.validate()?;
        if self.fit_degree == 0 {
            return Err(MpcError::InvalidParameter("fit_degree must be at least 1".to_string()));
        }
        if !(self.latency >= 0.0 && self.latency.is_finite()) {
            return Err(MpcError::InvalidParameter(format!(
                "latency must be finite and non-negative, got {}",
                self.latency
            )));
        }
        if !(self.speed_scale > 0.0 && self.speed_scale.is_finite()) {
            return Err(MpcError::InvalidParameter(format!(
                "speed_scale must be positive, got {}",
                self.speed_scale
            )));
        }
        if self.steering_sign.abs() != 1.0 {
            return Err(MpcError::InvalidParameter(format!(
                "steering_sign must be 1 or -1, got {}",
                self.steering_sign
            )));
        }
        if !(self.reference_spacing > 0.0) {
            return Err(MpcError::InvalidParameter(format!(
                "reference_spacing must be positive, got {}",
                self.reference_spacing
            )));
        }
        if self.sqp.max_iterations == 0 || !(self.sqp.max_cpu_time > 0.0) {
            return Err(MpcError::InvalidParameter(
                "sqp needs a positive iteration cap and time budget".to_string(),
            ));
        }
        Ok(())
    }

    pub fn post_processor(&self) -> PostProcessorConfig {
        PostProcessorConfig {
            max_steer: self.mpc.max_steer,
            steering_sign: self.steering_sign,
            reference_spacing: self.reference_spacing,
            reference_points: self.reference_points,
            min_throttle: self.mpc.min_throttle,
            max_throttle: self.mpc.max_throttle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ControllerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mpc.horizon, 10);
        assert_eq!(config.emulated_delay_ms, 0);
        assert!(!config.warm_start);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ControllerConfig::from_toml_str(
            r#"
            emulated_delay_ms = 100

            [mpc]
            horizon = 12
            dt = 0.05

            [mpc.weights]
            cte = 3000.0
            "#,
        )
        .unwrap();
        assert_eq!(config.emulated_delay_ms, 100);
        assert_eq!(config.mpc.horizon, 12);
        assert_eq!(config.mpc.dt, 0.05);
        assert_eq!(config.mpc.weights.cte, 3000.0);
        assert_eq!(config.mpc.weights.epsi, 2000.0);
        assert_eq!(config.fit_degree, 3);
        assert_eq!(config.sqp, SqpOptions::default());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = ControllerConfig::default();
        config.warm_start = true;
        config.mpc.ref_speed = 35.0;
        let text = config.to_toml_string().unwrap();
        assert_eq!(ControllerConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ControllerConfig::from_toml_str("fit_degree = 0").is_err());
        assert!(ControllerConfig::from_toml_str("steering_sign = 0.5").is_err());
        assert!(ControllerConfig::from_toml_str("[mpc]\nhorizon = 1").is_err());
        assert!(matches!(
            ControllerConfig::from_toml_str("latency = \"fast\""),
            Err(MpcError::Config(_))
        ));
    }

    #[test]
    fn test_crossed_throttle_bounds_pass_validation() {
        // left for the solver to report as infeasible
        let text = "[mpc]\nmin_throttle = 1.0\nmax_throttle = -1.0";
        let config = ControllerConfig::from_toml_str(text).unwrap();
        assert!(config.mpc.min_throttle > config.mpc.max_throttle);
    }

    #[test]
    fn test_shipped_config_parses() {
        let text = include_str!("../../config/controller.toml");
        let config = ControllerConfig::from_toml_str(text).unwrap();
        assert_eq!(config.emulated_delay_ms, 100);
        assert_eq!(config.mpc.horizon, 10);
        assert_eq!(config.sqp.max_cpu_time, 0.5);
    }

    #[test]
    fn test_post_processor_carries_throttle_bounds() {
        let config = ControllerConfig::from_toml_str("[mpc]\nmax_throttle = 0.5").unwrap();
        let post = config.post_processor();
        assert_eq!(post.max_throttle, 0.5);
        assert_eq!(post.min_throttle, config.mpc.min_throttle);
        assert_eq!(post.max_steer, config.mpc.max_steer);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ControllerConfig::from_file("/nonexistent/controller.toml"),
            Err(MpcError::Io(_))
        ));
    }
}
