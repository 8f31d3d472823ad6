//! Decoded telemetry record

use itertools::izip;
use serde::{Deserialize, Serialize};

use crate::common::{MpcError, MpcResult, Path2D, Point2D, Pose2D};

/// One telemetry sample as sent by the simulator
///
/// Positions are global [m], `psi` in radians, `speed` in simulator units
/// and `steering_angle` in radians with the simulator sign convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub ptsx: Vec<f64>,
    pub ptsy: Vec<f64>,
    pub x: f64,
    pub y: f64,
    pub psi: f64,
    pub speed: f64,
    pub steering_angle: f64,
    pub throttle: f64,
}

impl Telemetry {
    /// Decode a telemetry JSON object. Missing or mistyped fields are
    /// reported as [`MpcError::InvalidTelemetry`].
    pub fn from_json(text: &str) -> MpcResult<Self> {
        serde_json::from_str(text).map_err(|e| MpcError::InvalidTelemetry(e.to_string()))
    }

    pub fn validate(&self) -> MpcResult<()> {
        if self.ptsx.len() != self.ptsy.len() {
            return Err(MpcError::InvalidTelemetry(format!(
                "waypoint lists differ in length: {} x vs {} y",
                self.ptsx.len(),
                self.ptsy.len()
            )));
        }
        let scalars = [
            ("x", self.x),
            ("y", self.y),
            ("psi", self.psi),
            ("speed", self.speed),
            ("steering_angle", self.steering_angle),
            ("throttle", self.throttle),
        ];
        if let Some((name, value)) = scalars.iter().find(|(_, v)| !v.is_finite()) {
            return Err(MpcError::InvalidTelemetry(format!("{} is not finite: {}", name, value)));
        }
        if self.ptsx.iter().chain(self.ptsy.iter()).any(|v| !v.is_finite()) {
            return Err(MpcError::InvalidTelemetry("non-finite waypoint".to_string()));
        }
        Ok(())
    }

    pub fn pose(&self) -> Pose2D {
        Pose2D::new(self.x, self.y, self.psi)
    }

    /// Waypoints in the global frame
    pub fn waypoints(&self) -> Path2D {
        izip!(&self.ptsx, &self.ptsy)
            .map(|(&x, &y)| Point2D::new(x, y))
            .collect()
    }
}
