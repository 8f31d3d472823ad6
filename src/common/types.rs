//! Common types used throughout mpc_bridge

use nalgebra::{Vector4, Vector6};
use serde::{Deserialize, Serialize};

/// 2D point representation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn origin() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    pub fn distance(&self, other: &Point2D) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// 2D pose (position + heading)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose2D {
    pub x: f64,
    pub y: f64,
    pub yaw: f64,
}

impl Pose2D {
    pub fn new(x: f64, y: f64, yaw: f64) -> Self {
        Self { x, y, yaw }
    }

    pub fn position(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }
}

/// Kinematic vehicle state: pose plus forward speed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct State2D {
    pub x: f64,
    pub y: f64,
    pub yaw: f64,
    pub v: f64,
}

impl State2D {
    pub fn new(x: f64, y: f64, yaw: f64, v: f64) -> Self {
        Self { x, y, yaw, v }
    }

    pub fn pose(&self) -> Pose2D {
        Pose2D::new(self.x, self.y, self.yaw)
    }

    pub fn to_vector(&self) -> Vector4<f64> {
        Vector4::new(self.x, self.y, self.yaw, self.v)
    }
}

impl From<Vector4<f64>> for State2D {
    fn from(v: Vector4<f64>) -> Self {
        Self { x: v[0], y: v[1], yaw: v[2], v: v[3] }
    }
}

/// Full optimizer state: kinematic state plus the two reference-tracking errors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackingState {
    pub x: f64,
    pub y: f64,
    pub yaw: f64,
    pub v: f64,
    /// cross-track error
    pub cte: f64,
    /// heading error
    pub epsi: f64,
}

impl TrackingState {
    pub fn new(x: f64, y: f64, yaw: f64, v: f64, cte: f64, epsi: f64) -> Self {
        Self { x, y, yaw, v, cte, epsi }
    }

    /// State at the local-frame origin with the given speed and errors
    pub fn at_origin(v: f64, cte: f64, epsi: f64) -> Self {
        Self::new(0.0, 0.0, 0.0, v, cte, epsi)
    }

    pub fn kinematic(&self) -> State2D {
        State2D::new(self.x, self.y, self.yaw, self.v)
    }

    pub fn position(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }

    pub fn to_vector(&self) -> Vector6<f64> {
        Vector6::new(self.x, self.y, self.yaw, self.v, self.cte, self.epsi)
    }

    pub fn is_finite(&self) -> bool {
        self.to_vector().iter().all(|c| c.is_finite())
    }
}

impl From<Vector6<f64>> for TrackingState {
    fn from(v: Vector6<f64>) -> Self {
        Self::new(v[0], v[1], v[2], v[3], v[4], v[5])
    }
}

/// Actuation pair in model units: steering angle [rad] and acceleration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Actuation {
    pub steer: f64,
    pub accel: f64,
}

impl Actuation {
    pub fn new(steer: f64, accel: f64) -> Self {
        Self { steer, accel }
    }

    pub fn zero() -> Self {
        Self { steer: 0.0, accel: 0.0 }
    }

    pub fn is_finite(&self) -> bool {
        self.steer.is_finite() && self.accel.is_finite()
    }
}

/// Path represented as a sequence of 2D points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path2D {
    pub points: Vec<Point2D>,
}

impl Path2D {
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Zip coordinate lists; the shorter list decides the length.
    pub fn from_xy(x: &[f64], y: &[f64]) -> Self {
        let points = x.iter().zip(y.iter())
            .map(|(&x, &y)| Point2D::new(x, y))
            .collect();
        Self { points }
    }

    pub fn push(&mut self, point: Point2D) {
        self.points.push(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn x_coords(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.x).collect()
    }

    pub fn y_coords(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.y).collect()
    }
}

impl Default for Path2D {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<Point2D> for Path2D {
    fn from_iter<I: IntoIterator<Item = Point2D>>(iter: I) -> Self {
        Self { points: iter.into_iter().collect() }
    }
}
