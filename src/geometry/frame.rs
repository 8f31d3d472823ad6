//! Global <-> vehicle-local frame transforms
//!
//! The local frame has its origin at the vehicle position, the x axis along
//! the vehicle heading and the y axis to the left of it.

use std::f64::consts::PI;
use crate::common::{Path2D, Point2D, Pose2D};

/// Express a global point in the frame of `pose`.
pub fn global_to_local(pose: &Pose2D, point: Point2D) -> Point2D {
    let dx = point.x - pose.x;
    let dy = point.y - pose.y;
    let (sin_yaw, cos_yaw) = pose.yaw.sin_cos();

    Point2D::new(dx * cos_yaw + dy * sin_yaw, -dx * sin_yaw + dy * cos_yaw)
}

/// Inverse of [`global_to_local`].
pub fn local_to_global(pose: &Pose2D, point: Point2D) -> Point2D {
    let (sin_yaw, cos_yaw) = pose.yaw.sin_cos();

    Point2D::new(
        pose.x + point.x * cos_yaw - point.y * sin_yaw,
        pose.y + point.x * sin_yaw + point.y * cos_yaw,
    )
}

/// Transform a whole path into the frame of `pose`, preserving order.
pub fn path_to_local(pose: &Pose2D, path: &Path2D) -> Path2D {
    path.points.iter().map(|&p| global_to_local(pose, p)).collect()
}

/// Transform a local-frame path back to the global frame.
pub fn path_to_global(pose: &Pose2D, path: &Path2D) -> Path2D {
    path.points.iter().map(|&p| local_to_global(pose, p)).collect()
}

/// Normalize angle to [-PI, PI]
pub fn normalize_angle(mut angle: f64) -> f64 {
    if !angle.is_finite() {
        return angle;
    }
    while angle > PI {
        angle -= 2.0 * PI;
    }
    while angle < -PI {
        angle += 2.0 * PI;
    }
    angle
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};
    use rand::rngs::StdRng;

    #[test]
    fn test_vehicle_position_maps_to_origin() {
        let pose = Pose2D::new(12.5, -3.0, 0.7);
        let local = global_to_local(&pose, pose.position());
        assert_relative_eq!(local.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(local.y, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_transform_preserves_distance() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let pose = Pose2D::new(
                rng.gen_range(-100.0..100.0),
                rng.gen_range(-100.0..100.0),
                rng.gen_range(-PI..PI),
            );
            let p = Point2D::new(rng.gen_range(-200.0..200.0), rng.gen_range(-200.0..200.0));
            let local = global_to_local(&pose, p);
            let d_global = pose.position().distance(&p);
            let d_local = Point2D::origin().distance(&local);
            assert_relative_eq!(d_global, d_local, epsilon = 1e-9, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_point_ahead_and_left() {
        // facing +y: a point further along +y is straight ahead,
        // a point at -x is on the left
        let pose = Pose2D::new(1.0, 1.0, PI / 2.0);
        let ahead = global_to_local(&pose, Point2D::new(1.0, 3.0));
        assert_relative_eq!(ahead.x, 2.0, epsilon = 1e-12);
        assert_relative_eq!(ahead.y, 0.0, epsilon = 1e-12);

        let left = global_to_local(&pose, Point2D::new(0.0, 1.0));
        assert_relative_eq!(left.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(left.y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_round_trip() {
        let pose = Pose2D::new(-4.0, 9.0, -2.3);
        let path = Path2D::from_xy(&[0.0, 5.0, -7.5], &[1.0, 2.0, 3.0]);
        let back = path_to_global(&pose, &path_to_local(&pose, &path));
        for (a, b) in path.points.iter().zip(back.points.iter()) {
            assert_relative_eq!(a.x, b.x, epsilon = 1e-9);
            assert_relative_eq!(a.y, b.y, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_normalize_angle() {
        assert!((normalize_angle(3.0 * PI) - PI).abs() < 0.01);
        assert!((normalize_angle(-3.0 * PI) + PI).abs() < 0.01);
    }
}
