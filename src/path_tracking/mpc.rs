//! Model Predictive Control (MPC) for reference-polynomial tracking
//!
//! Every cycle a fresh nonlinear program is built over a horizon of N states
//! `(x, y, yaw, v, cte, epsi)` and N-1 actuations `(steer, accel)` spaced
//! `dt` apart. The first state is pinned to the measured (latency
//! compensated) state and consecutive states are tied together by the
//! kinematic bicycle model extended with the propagation of the two tracking
//! errors:
//!
//! ```text
//! cte[k+1]  = (f(x[k]) - y[k]) + v[k] sin(epsi[k]) dt
//! epsi[k+1] = (yaw[k] - atan(f'(x[k]))) + v[k] / lf * steer[k] dt
//! ```
//!
//! The cost adds tracking, speed, actuator magnitude and actuator smoothness
//! terms. The NLP is handed to any [`NlpSolver`] backend.

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::common::{
    Actuation, MotionModel, MpcError, MpcResult, NlpProblem, NlpSolver, Path2D, SolverError,
    TrackingState,
};
use crate::geometry::Polynomial;
use crate::optimization::SqpSolver;
use crate::path_tracking::kinematic_bicycle::{KinematicBicycle, DEFAULT_LF};

/// Number of state components per horizon step
pub const NX: usize = 6;
/// Number of actuation components per horizon step
pub const NU: usize = 2;

/// Tolerance on the anchoring of the first predicted state
const ANCHOR_TOLERANCE: f64 = 1e-4;

/// Cost weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostWeights {
    pub cte: f64,
    pub epsi: f64,
    pub speed: f64,
    pub steer: f64,
    pub accel: f64,
    pub steer_rate: f64,
    pub accel_rate: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            cte: 2000.0,
            epsi: 2000.0,
            speed: 1.0,
            steer: 5.0,
            accel: 5.0,
            steer_rate: 200.0,
            accel_rate: 10.0,
        }
    }
}

/// Horizon, vehicle and actuation limits of the MPC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MpcConfig {
    /// Number of predicted states N
    pub horizon: usize,
    /// Time between predicted states [s]
    pub dt: f64,
    /// Reference speed [m/s]
    pub ref_speed: f64,
    /// Effective wheelbase [m]
    pub lf: f64,
    /// Steering limit [rad]; the model steering is bounded to +-max_steer
    pub max_steer: f64,
    /// Lower throttle bound
    pub min_throttle: f64,
    /// Upper throttle bound
    pub max_throttle: f64,
    pub weights: CostWeights,
}

impl Default for MpcConfig {
    fn default() -> Self {
        Self {
            horizon: 10,
            dt: 0.1,
            ref_speed: 20.0,
            lf: DEFAULT_LF,
            max_steer: 25.0_f64.to_radians(),
            min_throttle: -1.0,
            max_throttle: 1.0,
            weights: CostWeights::default(),
        }
    }
}

impl MpcConfig {
    /// Reject tunings the formulation cannot represent. Crossed actuation
    /// bounds are left to the solver, which reports them as infeasible.
    pub fn validate(&self) -> MpcResult<()> {
        if self.horizon < 2 {
            return Err(MpcError::InvalidParameter(format!(
                "horizon must be at least 2, got {}",
                self.horizon
            )));
        }
        if !(self.dt > 0.0) {
            return Err(MpcError::InvalidParameter(format!("dt must be positive, got {}", self.dt)));
        }
        if !(self.lf > 0.0) {
            return Err(MpcError::InvalidParameter(format!("lf must be positive, got {}", self.lf)));
        }
        if !(self.max_steer > 0.0) {
            return Err(MpcError::InvalidParameter(format!(
                "max_steer must be positive, got {}",
                self.max_steer
            )));
        }
        Ok(())
    }
}

/// Index map of the decision vector
///
/// States are stored component-major (all x, then all y, ...), followed by
/// all steering values and all accelerations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableLayout {
    horizon: usize,
}

impl VariableLayout {
    pub fn new(horizon: usize) -> Self {
        VariableLayout { horizon }
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn num_actuations(&self) -> usize {
        self.horizon - 1
    }

    pub fn num_variables(&self) -> usize {
        NX * self.horizon + NU * self.num_actuations()
    }

    pub fn num_constraints(&self) -> usize {
        NX * self.horizon
    }

    /// Index of state component `component` (0..NX) at step k
    pub fn state(&self, component: usize, k: usize) -> usize {
        component * self.horizon + k
    }

    pub fn x(&self, k: usize) -> usize {
        self.state(0, k)
    }

    pub fn y(&self, k: usize) -> usize {
        self.state(1, k)
    }

    pub fn yaw(&self, k: usize) -> usize {
        self.state(2, k)
    }

    pub fn v(&self, k: usize) -> usize {
        self.state(3, k)
    }

    pub fn cte(&self, k: usize) -> usize {
        self.state(4, k)
    }

    pub fn epsi(&self, k: usize) -> usize {
        self.state(5, k)
    }

    pub fn steer(&self, k: usize) -> usize {
        NX * self.horizon + k
    }

    pub fn accel(&self, k: usize) -> usize {
        NX * self.horizon + self.num_actuations() + k
    }

    pub fn read_state(&self, z: &DVector<f64>, k: usize) -> TrackingState {
        TrackingState::new(
            z[self.x(k)],
            z[self.y(k)],
            z[self.yaw(k)],
            z[self.v(k)],
            z[self.cte(k)],
            z[self.epsi(k)],
        )
    }

    pub fn write_state(&self, z: &mut DVector<f64>, k: usize, s: &TrackingState) {
        for (component, value) in s.to_vector().iter().enumerate() {
            z[self.state(component, k)] = *value;
        }
    }

    pub fn read_actuation(&self, z: &DVector<f64>, k: usize) -> Actuation {
        Actuation::new(z[self.steer(k)], z[self.accel(k)])
    }

    pub fn write_actuation(&self, z: &mut DVector<f64>, k: usize, u: &Actuation) {
        z[self.steer(k)] = u.steer;
        z[self.accel(k)] = u.accel;
    }
}

/// The per-cycle nonlinear program
pub struct MpcProblem<'a> {
    config: &'a MpcConfig,
    model: KinematicBicycle,
    reference: &'a Polynomial,
    initial: TrackingState,
    layout: VariableLayout,
}

impl<'a> MpcProblem<'a> {
    pub fn new(config: &'a MpcConfig, reference: &'a Polynomial, initial: TrackingState) -> Self {
        MpcProblem {
            config,
            model: KinematicBicycle::new(config.lf),
            reference,
            initial,
            layout: VariableLayout::new(config.horizon),
        }
    }

    pub fn layout(&self) -> VariableLayout {
        self.layout
    }

    /// One step of the prediction model
    pub fn transition(&self, s: &TrackingState, u: &Actuation) -> TrackingState {
        let dt = self.config.dt;
        let next = self.model.propagate(&s.kinematic(), u, dt);
        let yaw_step = self.model.yaw_rate(s.v, u.steer) * dt;

        TrackingState::new(
            next.x,
            next.y,
            next.yaw,
            next.v,
            (self.reference.eval(s.x) - s.y) + s.v * s.epsi.sin() * dt,
            (s.yaw - self.reference.desired_heading(s.x)) + yaw_step,
        )
    }

    /// Roll the model out with a constant actuation; the result satisfies
    /// every equality constraint.
    pub fn rollout(&self, actuation: &Actuation) -> DVector<f64> {
        let layout = self.layout;
        let mut z = DVector::zeros(layout.num_variables());
        let mut state = self.initial;
        layout.write_state(&mut z, 0, &state);
        for k in 0..layout.num_actuations() {
            layout.write_actuation(&mut z, k, actuation);
            state = self.transition(&state, actuation);
            layout.write_state(&mut z, k + 1, &state);
        }
        z
    }

    /// Initial guess from a previous solution, shifted one step forward.
    /// The shifted plan is re-simulated from the current state so the guess
    /// stays dynamically consistent.
    pub fn shifted_guess(&self, previous: &MpcSolution) -> DVector<f64> {
        let layout = self.layout;
        let mut z = DVector::zeros(layout.num_variables());
        let mut state = self.initial;
        layout.write_state(&mut z, 0, &state);
        for k in 0..layout.num_actuations() {
            let u = previous
                .actuations
                .get(k + 1)
                .or_else(|| previous.actuations.last())
                .copied()
                .unwrap_or_else(Actuation::zero);
            layout.write_actuation(&mut z, k, &u);
            state = self.transition(&state, &u);
            layout.write_state(&mut z, k + 1, &state);
        }
        z
    }

    fn smoothness_pairs(&self) -> impl Iterator<Item = (usize, usize, usize, usize)> + '_ {
        let layout = self.layout;
        (0..layout.num_actuations().saturating_sub(1)).map(move |k| {
            (layout.steer(k), layout.steer(k + 1), layout.accel(k), layout.accel(k + 1))
        })
    }
}

impl<'a> NlpProblem for MpcProblem<'a> {
    fn num_variables(&self) -> usize {
        self.layout.num_variables()
    }

    fn num_constraints(&self) -> usize {
        self.layout.num_constraints()
    }

    fn bounds(&self) -> (DVector<f64>, DVector<f64>) {
        let layout = self.layout;
        let n = layout.num_variables();
        let mut lower = DVector::from_element(n, f64::NEG_INFINITY);
        let mut upper = DVector::from_element(n, f64::INFINITY);
        for k in 0..layout.num_actuations() {
            lower[layout.steer(k)] = -self.config.max_steer;
            upper[layout.steer(k)] = self.config.max_steer;
            lower[layout.accel(k)] = self.config.min_throttle;
            upper[layout.accel(k)] = self.config.max_throttle;
        }
        (lower, upper)
    }

    fn objective(&self, z: &DVector<f64>) -> f64 {
        let w = &self.config.weights;
        let layout = self.layout;
        let mut cost = 0.0;

        for k in 0..layout.horizon() {
            cost += w.cte * z[layout.cte(k)].powi(2);
            cost += w.epsi * z[layout.epsi(k)].powi(2);
            cost += w.speed * (z[layout.v(k)] - self.config.ref_speed).powi(2);
        }
        for k in 0..layout.num_actuations() {
            cost += w.steer * z[layout.steer(k)].powi(2);
            cost += w.accel * z[layout.accel(k)].powi(2);
        }
        for (s0, s1, a0, a1) in self.smoothness_pairs() {
            cost += w.steer_rate * (z[s1] - z[s0]).powi(2);
            cost += w.accel_rate * (z[a1] - z[a0]).powi(2);
        }
        cost
    }

    fn gradient(&self, z: &DVector<f64>) -> DVector<f64> {
        let w = &self.config.weights;
        let layout = self.layout;
        let mut g = DVector::zeros(layout.num_variables());

        for k in 0..layout.horizon() {
            g[layout.cte(k)] = 2.0 * w.cte * z[layout.cte(k)];
            g[layout.epsi(k)] = 2.0 * w.epsi * z[layout.epsi(k)];
            g[layout.v(k)] = 2.0 * w.speed * (z[layout.v(k)] - self.config.ref_speed);
        }
        for k in 0..layout.num_actuations() {
            g[layout.steer(k)] = 2.0 * w.steer * z[layout.steer(k)];
            g[layout.accel(k)] = 2.0 * w.accel * z[layout.accel(k)];
        }
        for (s0, s1, a0, a1) in self.smoothness_pairs() {
            let ds = 2.0 * w.steer_rate * (z[s1] - z[s0]);
            g[s1] += ds;
            g[s0] -= ds;
            let da = 2.0 * w.accel_rate * (z[a1] - z[a0]);
            g[a1] += da;
            g[a0] -= da;
        }
        g
    }

    fn hessian(&self, _z: &DVector<f64>) -> DMatrix<f64> {
        // every cost term is quadratic, so the Hessian is constant
        let w = &self.config.weights;
        let layout = self.layout;
        let n = layout.num_variables();
        let mut h = DMatrix::zeros(n, n);

        for k in 0..layout.horizon() {
            h[(layout.cte(k), layout.cte(k))] = 2.0 * w.cte;
            h[(layout.epsi(k), layout.epsi(k))] = 2.0 * w.epsi;
            h[(layout.v(k), layout.v(k))] = 2.0 * w.speed;
        }
        for k in 0..layout.num_actuations() {
            h[(layout.steer(k), layout.steer(k))] = 2.0 * w.steer;
            h[(layout.accel(k), layout.accel(k))] = 2.0 * w.accel;
        }
        for (s0, s1, a0, a1) in self.smoothness_pairs() {
            for (i, j, weight) in [(s0, s1, w.steer_rate), (a0, a1, w.accel_rate)] {
                h[(i, i)] += 2.0 * weight;
                h[(j, j)] += 2.0 * weight;
                h[(i, j)] -= 2.0 * weight;
                h[(j, i)] -= 2.0 * weight;
            }
        }
        h
    }

    fn constraints(&self, z: &DVector<f64>) -> DVector<f64> {
        let layout = self.layout;
        let mut c = DVector::zeros(layout.num_constraints());

        let anchor = layout.read_state(z, 0).to_vector() - self.initial.to_vector();
        c.rows_mut(0, NX).copy_from(&anchor);

        for k in 0..layout.num_actuations() {
            let predicted = self.transition(&layout.read_state(z, k), &layout.read_actuation(z, k));
            let residual = layout.read_state(z, k + 1).to_vector() - predicted.to_vector();
            c.rows_mut(NX * (k + 1), NX).copy_from(&residual);
        }
        c
    }

    fn jacobian(&self, z: &DVector<f64>) -> DMatrix<f64> {
        let layout = self.layout;
        let dt = self.config.dt;
        let lf = self.config.lf;
        let mut jac = DMatrix::zeros(layout.num_constraints(), layout.num_variables());

        for component in 0..NX {
            jac[(component, layout.state(component, 0))] = 1.0;
        }

        for k in 0..layout.num_actuations() {
            let row = NX * (k + 1);
            let s = layout.read_state(z, k);
            let u = layout.read_actuation(z, k);

            for component in 0..NX {
                jac[(row + component, layout.state(component, k + 1))] = 1.0;
            }

            // kinematic rows come straight from the motion model
            let kin = s.kinematic();
            let fx = self.model.jacobian_state(&kin, &u, dt);
            let fu = self.model.jacobian_control(&kin, &u, dt);
            for i in 0..4 {
                for j in 0..4 {
                    jac[(row + i, layout.state(j, k))] -= fx[(i, j)];
                }
                jac[(row + i, layout.steer(k))] -= fu[(i, 0)];
                jac[(row + i, layout.accel(k))] -= fu[(i, 1)];
            }

            let slope = self.reference.derivative(s.x);
            let curvature = self.reference.second_derivative(s.x);

            // cte row
            jac[(row + 4, layout.x(k))] -= slope;
            jac[(row + 4, layout.y(k))] -= -1.0;
            jac[(row + 4, layout.v(k))] -= s.epsi.sin() * dt;
            jac[(row + 4, layout.epsi(k))] -= s.v * s.epsi.cos() * dt;

            // epsi row
            jac[(row + 5, layout.x(k))] -= -curvature / (1.0 + slope * slope);
            jac[(row + 5, layout.yaw(k))] -= 1.0;
            jac[(row + 5, layout.v(k))] -= u.steer * dt / lf;
            jac[(row + 5, layout.steer(k))] -= s.v * dt / lf;
        }
        jac
    }
}

/// Result of one MPC solve
#[derive(Debug, Clone)]
pub struct MpcSolution {
    /// First actuation of the plan, in model units
    pub actuation: Actuation,
    /// Predicted states, `states[0]` is the anchored initial state
    pub states: Vec<TrackingState>,
    /// Planned actuations, one fewer than states
    pub actuations: Vec<Actuation>,
    pub cost: f64,
    pub iterations: usize,
}

impl MpcSolution {
    /// Predicted (x, y) positions in the vehicle frame
    pub fn predicted_path(&self) -> Path2D {
        self.states.iter().map(|s| s.position()).collect()
    }
}

/// MPC solver: owns the immutable tuning and a NLP backend
pub struct MpcSolver<S: NlpSolver = SqpSolver> {
    config: MpcConfig,
    backend: S,
}

impl MpcSolver<SqpSolver> {
    /// Create with the default SQP backend
    pub fn with_defaults() -> Self {
        Self::new(MpcConfig::default(), SqpSolver::default())
    }
}

impl<S: NlpSolver> MpcSolver<S> {
    pub fn new(config: MpcConfig, backend: S) -> Self {
        MpcSolver { config, backend }
    }

    pub fn config(&self) -> &MpcConfig {
        &self.config
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    /// Solve for the optimal plan from `initial` along `reference`.
    ///
    /// `warm_start` seeds the NLP with a previous plan; without it the
    /// initial guess is a zero-actuation rollout.
    pub fn solve(
        &self,
        initial: &TrackingState,
        reference: &Polynomial,
        warm_start: Option<&MpcSolution>,
    ) -> MpcResult<MpcSolution> {
        if !initial.is_finite() {
            return Err(MpcError::InvalidParameter(format!(
                "non-finite initial state {:?}",
                initial
            )));
        }

        let problem = MpcProblem::new(&self.config, reference, *initial);
        let layout = problem.layout();
        let guess = match warm_start {
            Some(previous) if previous.actuations.len() == layout.num_actuations() => {
                problem.shifted_guess(previous)
            }
            _ => problem.rollout(&Actuation::zero()),
        };

        let nlp = self.backend.solve(&problem, &guess)?;
        if nlp.z.len() != layout.num_variables() {
            return Err(SolverError::DimensionMismatch {
                expected: layout.num_variables(),
                got: nlp.z.len(),
            }
            .into());
        }

        let states: Vec<TrackingState> = (0..layout.horizon())
            .map(|k| layout.read_state(&nlp.z, k))
            .collect();
        let actuations: Vec<Actuation> = (0..layout.num_actuations())
            .map(|k| layout.read_actuation(&nlp.z, k))
            .collect();

        let finite = states.iter().all(TrackingState::is_finite)
            && actuations.iter().all(Actuation::is_finite);
        if !finite {
            return Err(SolverError::NonFinite { iteration: nlp.iterations }.into());
        }

        let anchor_error = (states[0].to_vector() - initial.to_vector()).amax();
        if anchor_error > ANCHOR_TOLERANCE {
            warn!("first predicted state is {:.3e} away from the measured state", anchor_error);
        }

        debug!(
            "mpc solved in {} iterations: cost {:.4}, steer {:.4}, accel {:.4}",
            nlp.iterations, nlp.objective, actuations[0].steer, actuations[0].accel
        );

        Ok(MpcSolution {
            actuation: actuations[0],
            states,
            actuations,
            cost: nlp.objective,
            iterations: nlp.iterations,
        })
    }
}
