//! Conversion of the optimizer output into the simulator command record
//!
//! The simulator uses a normalized steering command in [-1, 1] whose sign is
//! mirrored with respect to the model convention (positive model steering
//! turns left).

use log::warn;
use serde::{Deserialize, Serialize};

use crate::common::{Actuation, Path2D};
use crate::geometry::Polynomial;
use crate::path_tracking::mpc::MpcSolution;

/// Command record sent back to the simulator
///
/// `mpc_*` is the predicted trajectory and `next_*` the sampled reference
/// polynomial, both in the vehicle frame and for display only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SteerCommand {
    pub steering_angle: f64,
    pub throttle: f64,
    pub mpc_x: Vec<f64>,
    pub mpc_y: Vec<f64>,
    pub next_x: Vec<f64>,
    pub next_y: Vec<f64>,
}

impl SteerCommand {
    /// Zero steering and zero throttle with no display payload
    pub fn neutral() -> Self {
        Self::from_values(0.0, 0.0)
    }

    pub fn from_values(steering_angle: f64, throttle: f64) -> Self {
        SteerCommand {
            steering_angle,
            throttle,
            mpc_x: Vec::new(),
            mpc_y: Vec::new(),
            next_x: Vec::new(),
            next_y: Vec::new(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// Parameters of [`ActuationPostProcessor`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostProcessorConfig {
    /// Steering angle mapped to a full command [rad]
    pub max_steer: f64,
    /// Simulator steering = sign * model steering
    pub steering_sign: f64,
    /// Spacing of the displayed reference samples [m]
    pub reference_spacing: f64,
    /// Number of displayed reference samples
    pub reference_points: usize,
    /// Throttle bounds the emitted command is held to
    pub min_throttle: f64,
    pub max_throttle: f64,
}

impl Default for PostProcessorConfig {
    fn default() -> Self {
        Self {
            max_steer: 25.0_f64.to_radians(),
            steering_sign: -1.0,
            reference_spacing: 2.0,
            reference_points: 50,
            min_throttle: -1.0,
            max_throttle: 1.0,
        }
    }
}

pub struct ActuationPostProcessor {
    config: PostProcessorConfig,
}

impl ActuationPostProcessor {
    pub fn new(config: PostProcessorConfig) -> Self {
        ActuationPostProcessor { config }
    }

    pub fn config(&self) -> &PostProcessorConfig {
        &self.config
    }

    /// Simulator steering angle [rad] to model convention
    pub fn to_model_steering(&self, simulator_steering: f64) -> f64 {
        self.config.steering_sign * simulator_steering
    }

    /// Model steering [rad] to the normalized simulator command, unclamped
    pub fn steering_command(&self, steer: f64) -> f64 {
        self.config.steering_sign * steer / self.config.max_steer
    }

    /// Build the command for one solved cycle.
    pub fn process(&self, solution: &MpcSolution, reference: &Polynomial) -> SteerCommand {
        let (steering_angle, throttle) = self.normalize(&solution.actuation);
        let predicted = solution.predicted_path();
        let display = self.reference_samples(reference);

        SteerCommand {
            steering_angle,
            throttle,
            mpc_x: predicted.x_coords(),
            mpc_y: predicted.y_coords(),
            next_x: display.x_coords(),
            next_y: display.y_coords(),
        }
    }

    /// Normalized (steering, throttle)
    ///
    /// Steering is clamped to [-1, 1] and throttle to the configured bounds.
    pub fn normalize(&self, actuation: &Actuation) -> (f64, f64) {
        let steering = self.steering_command(actuation.steer);
        let throttle = actuation.accel;
        let clamped = (
            steering.max(-1.0).min(1.0),
            throttle.max(self.config.min_throttle).min(self.config.max_throttle),
        );
        if clamped != (steering, throttle) {
            warn!(
                "solver actuation out of range, clamped: steering {:.4} -> {:.4}, \
                 throttle {:.4} -> {:.4}",
                steering, clamped.0, throttle, clamped.1
            );
        }
        clamped
    }

    /// Reference polynomial at x = 0, spacing, 2 * spacing, ...
    pub fn reference_samples(&self, reference: &Polynomial) -> Path2D {
        let xs: Vec<f64> = (0..self.config.reference_points)
            .map(|i| i as f64 * self.config.reference_spacing)
            .collect();
        reference.sample(&xs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{MotionModel, State2D, TrackingState};
    use crate::path_tracking::kinematic_bicycle::KinematicBicycle;
    use approx::assert_relative_eq;

    fn solution_with(actuation: Actuation) -> MpcSolution {
        MpcSolution {
            actuation,
            states: vec![
                TrackingState::at_origin(10.0, 0.0, 0.0),
                TrackingState::new(1.0, 0.1, 0.0, 10.0, 0.0, 0.0),
            ],
            actuations: vec![actuation],
            cost: 0.0,
            iterations: 1,
        }
    }

    #[test]
    fn test_positive_model_steering_turns_left_and_maps_to_negative_command() {
        let post = ActuationPostProcessor::new(PostProcessorConfig::default());
        let steer = 0.1;

        let model = KinematicBicycle::default();
        let start = State2D::new(0.0, 0.0, 0.0, 5.0);
        let moved = model.propagate(&start, &Actuation::new(steer, 0.0), 0.5);
        assert!(moved.yaw > 0.0);

        let command = post.steering_command(steer);
        assert!(command < 0.0);
        assert_relative_eq!(command, -steer / 25.0_f64.to_radians());
        assert_relative_eq!(post.to_model_steering(-0.2), 0.2);
    }

    #[test]
    fn test_full_lock_is_unit_command() {
        let post = ActuationPostProcessor::new(PostProcessorConfig::default());
        assert_relative_eq!(post.steering_command(-25.0_f64.to_radians()), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        let post = ActuationPostProcessor::new(PostProcessorConfig::default());
        let reference = Polynomial::new(vec![0.0]);
        let command = post.process(&solution_with(Actuation::new(-1.0, 3.0)), &reference);
        assert_eq!(command.steering_angle, 1.0);
        assert_eq!(command.throttle, 1.0);
    }

    #[test]
    fn test_throttle_is_clamped_to_configured_bounds() {
        let post = ActuationPostProcessor::new(PostProcessorConfig {
            min_throttle: -0.3,
            max_throttle: 0.5,
            ..PostProcessorConfig::default()
        });
        assert_eq!(post.normalize(&Actuation::new(0.0, 0.8)).1, 0.5);
        assert_eq!(post.normalize(&Actuation::new(0.0, -0.9)).1, -0.3);
        assert_eq!(post.normalize(&Actuation::new(0.0, 0.4)).1, 0.4);
    }

    #[test]
    fn test_display_payload() {
        let post = ActuationPostProcessor::new(PostProcessorConfig::default());
        let reference = Polynomial::new(vec![1.0, 0.5]);
        let command = post.process(&solution_with(Actuation::new(0.0, 0.2)), &reference);

        assert_eq!(command.mpc_x, vec![0.0, 1.0]);
        assert_eq!(command.mpc_y, vec![0.0, 0.1]);
        assert_eq!(command.next_x.len(), 50);
        assert_eq!(command.next_x[1], 2.0);
        assert_relative_eq!(command.next_y[49], 1.0 + 0.5 * 98.0);
        assert_relative_eq!(command.throttle, 0.2);
    }

    #[test]
    fn test_command_json_field_names() {
        let json = SteerCommand::neutral().to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        for key in ["steering_angle", "throttle", "mpc_x", "mpc_y", "next_x", "next_y"] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
    }
}
