//! Kinematic bicycle model and actuation-latency compensation
//!
//! The model treats the vehicle as a rear-axle reference point with a
//! steerable effective front wheel at distance `lf`:
//!
//! ```text
//! x'   = x + v cos(yaw) dt
//! y'   = y + v sin(yaw) dt
//! yaw' = yaw + v / lf * steer * dt
//! v'   = v + accel * dt
//! ```
//!
//! Steering is in model convention: positive steer turns left
//! (counter-clockwise yaw rate).

use nalgebra::DMatrix;
use crate::common::{Actuation, MotionModel, State2D};

/// Distance between the front axle and the centre of gravity of the
/// simulator vehicle [m].
pub const DEFAULT_LF: f64 = 2.67;

/// Kinematic bicycle with effective wheelbase `lf`
#[derive(Debug, Clone, Copy)]
pub struct KinematicBicycle {
    pub lf: f64,
}

impl KinematicBicycle {
    pub fn new(lf: f64) -> Self {
        KinematicBicycle { lf }
    }

    /// Yaw rate produced by `steer` at speed `v`
    pub fn yaw_rate(&self, v: f64, steer: f64) -> f64 {
        v / self.lf * steer
    }
}

impl Default for KinematicBicycle {
    fn default() -> Self {
        Self::new(DEFAULT_LF)
    }
}

impl MotionModel for KinematicBicycle {
    type State = State2D;
    type Control = Actuation;

    fn propagate(&self, state: &State2D, control: &Actuation, dt: f64) -> State2D {
        let (sin_yaw, cos_yaw) = state.yaw.sin_cos();
        State2D::new(
            state.x + state.v * cos_yaw * dt,
            state.y + state.v * sin_yaw * dt,
            state.yaw + self.yaw_rate(state.v, control.steer) * dt,
            state.v + control.accel * dt,
        )
    }

    fn jacobian_state(&self, state: &State2D, control: &Actuation, dt: f64) -> DMatrix<f64> {
        let (sin_yaw, cos_yaw) = state.yaw.sin_cos();
        DMatrix::from_row_slice(4, 4, &[
            1.0, 0.0, -state.v * sin_yaw * dt, cos_yaw * dt,
            0.0, 1.0, state.v * cos_yaw * dt, sin_yaw * dt,
            0.0, 0.0, 1.0, control.steer * dt / self.lf,
            0.0, 0.0, 0.0, 1.0,
        ])
    }

    fn jacobian_control(&self, state: &State2D, _control: &Actuation, dt: f64) -> DMatrix<f64> {
        DMatrix::from_row_slice(4, 2, &[
            0.0, 0.0,
            0.0, 0.0,
            state.v * dt / self.lf, 0.0,
            0.0, dt,
        ])
    }
}

/// Projects the measured state forward by the actuation latency, giving the
/// state at the moment the next command takes effect.
#[derive(Debug, Clone, Copy)]
pub struct LatencyCompensator {
    model: KinematicBicycle,
    latency: f64,
}

impl LatencyCompensator {
    pub fn new(model: KinematicBicycle, latency: f64) -> Self {
        LatencyCompensator { model, latency }
    }

    pub fn latency(&self) -> f64 {
        self.latency
    }

    /// `last` must already be in model steering convention.
    pub fn compensate(&self, state: &State2D, last: &Actuation) -> State2D {
        if self.latency <= 0.0 {
            return *state;
        }
        self.model.propagate(state, last, self.latency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_propagate_straight() {
        let model = KinematicBicycle::default();
        let s = model.propagate(&State2D::new(0.0, 0.0, 0.0, 10.0), &Actuation::new(0.0, 1.0), 0.1);
        assert_relative_eq!(s.x, 1.0);
        assert_relative_eq!(s.y, 0.0);
        assert_relative_eq!(s.yaw, 0.0);
        assert_relative_eq!(s.v, 10.1);
    }

    #[test]
    fn test_positive_steer_turns_left() {
        let model = KinematicBicycle::default();
        let mut s = State2D::new(0.0, 0.0, 0.0, 5.0);
        for _ in 0..10 {
            s = model.propagate(&s, &Actuation::new(0.2, 0.0), 0.1);
        }
        assert!(s.yaw > 0.0);
        assert!(s.y > 0.0);
    }

    #[test]
    fn test_zero_speed_compensation_keeps_pose() {
        let comp = LatencyCompensator::new(KinematicBicycle::default(), 0.1);
        let raw = State2D::new(3.0, -2.0, 1.1, 0.0);
        let out = comp.compensate(&raw, &Actuation::new(0.3, 0.8));
        assert_eq!(out.x, raw.x);
        assert_eq!(out.y, raw.y);
        assert_eq!(out.yaw, raw.yaw);
        assert_relative_eq!(out.v, 0.08);
    }

    #[test]
    fn test_compensation_matches_formula() {
        let comp = LatencyCompensator::new(KinematicBicycle::new(2.0), 0.1);
        let raw = State2D::new(1.0, 2.0, 0.5, 4.0);
        let out = comp.compensate(&raw, &Actuation::new(0.1, -0.5));
        assert_relative_eq!(out.x, 1.0 + 4.0 * 0.5_f64.cos() * 0.1);
        assert_relative_eq!(out.y, 2.0 + 4.0 * 0.5_f64.sin() * 0.1);
        assert_relative_eq!(out.yaw, 0.5 + 4.0 / 2.0 * 0.1 * 0.1);
        assert_relative_eq!(out.v, 4.0 - 0.05);
    }

    #[test]
    fn test_jacobian_matches_finite_difference() {
        let model = KinematicBicycle::new(2.5);
        let s = State2D::new(1.0, -1.0, 0.4, 6.0);
        let u = Actuation::new(0.05, 0.3);
        let dt = 0.1;
        let jac = model.jacobian_state(&s, &u, dt);
        let h = 1e-6;
        let base = model.propagate(&s, &u, dt).to_vector();
        for j in 0..4 {
            let mut pert = s.to_vector();
            pert[j] += h;
            let moved = model.propagate(&State2D::from(pert), &u, dt).to_vector();
            for i in 0..4 {
                assert_relative_eq!((moved[i] - base[i]) / h, jac[(i, j)], epsilon = 1e-5);
            }
        }
        let jac_u = model.jacobian_control(&s, &u, dt);
        assert_relative_eq!(jac_u[(2, 0)], 6.0 * dt / 2.5);
        assert_relative_eq!(jac_u[(3, 1)], dt);
    }
}
