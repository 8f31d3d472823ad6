//! Per-cycle control pipeline
//!
//! telemetry -> validation -> latency compensation -> frame transform ->
//! polynomial fit -> MPC solve -> command conversion
//!
//! The latency compensation is applied to the global pose first and the
//! waypoints are then expressed in the frame of the compensated pose, so the
//! optimizer always starts at the local origin.

use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::bridge::config::ControllerConfig;
use crate::bridge::telemetry::Telemetry;
use crate::common::{Actuation, MpcError, MpcResult, NlpSolver, Path2D, State2D, TrackingState};
use crate::geometry::{path_to_local, Polynomial};
use crate::optimization::SqpSolver;
use crate::path_tracking::{
    ActuationPostProcessor, KinematicBicycle, LatencyCompensator, MpcSolution, MpcSolver,
    SteerCommand,
};

/// Where the emitted command came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSource {
    /// Converged solve
    Optimized,
    /// Input was rejected, zero steering and zero throttle
    SafeDefault,
    /// Solve failed, previous command repeated (zero if none yet)
    Held,
}

/// Command emitted for one telemetry record
#[derive(Debug, Clone)]
pub struct CycleOutput {
    pub command: SteerCommand,
    pub source: CommandSource,
}

/// Intermediate results of a successful cycle
#[derive(Debug, Clone)]
pub struct ControlCycle {
    /// Global state after latency compensation, speed in m/s
    pub compensated: State2D,
    /// Waypoints in the frame of the compensated pose
    pub local_waypoints: Path2D,
    pub reference: Polynomial,
    /// Optimizer start state (local origin)
    pub initial: TrackingState,
    pub solution: MpcSolution,
}

pub struct MpcController<S: NlpSolver = SqpSolver> {
    config: ControllerConfig,
    compensator: LatencyCompensator,
    solver: MpcSolver<S>,
    post: ActuationPostProcessor,
    last_command: Option<(f64, f64)>,
    last_solution: Option<MpcSolution>,
    cycles: u64,
}

impl MpcController<SqpSolver> {
    pub fn new(config: ControllerConfig) -> MpcResult<Self> {
        let backend = SqpSolver::new(config.sqp.clone());
        Self::with_backend(config, backend)
    }
}

impl<S: NlpSolver> MpcController<S> {
    /// Controller with a custom NLP backend; the `sqp` section of the
    /// configuration is ignored.
    pub fn with_backend(config: ControllerConfig, backend: S) -> MpcResult<Self> {
        config.validate()?;
        let model = KinematicBicycle::new(config.mpc.lf);
        info!(
            "mpc controller: N = {}, dt = {} s, latency = {} s, fit degree {}",
            config.mpc.horizon, config.mpc.dt, config.latency, config.fit_degree
        );
        Ok(MpcController {
            compensator: LatencyCompensator::new(model, config.latency),
            solver: MpcSolver::new(config.mpc.clone(), backend),
            post: ActuationPostProcessor::new(config.post_processor()),
            config,
            last_command: None,
            last_solution: None,
            cycles: 0,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Forget everything carried over from previous cycles.
    pub fn reset(&mut self) {
        info!("controller reset after {} cycles", self.cycles);
        self.last_command = None;
        self.last_solution = None;
        self.cycles = 0;
    }

    /// Run the pipeline up to the solve, without touching controller state.
    pub fn compute(&self, telemetry: &Telemetry) -> MpcResult<ControlCycle> {
        telemetry.validate()?;

        let waypoints = telemetry.waypoints();
        let required = self.config.fit_degree + 1;
        if waypoints.len() < required {
            return Err(MpcError::InsufficientWaypoints { required, got: waypoints.len() });
        }

        let pose = telemetry.pose();
        let speed = telemetry.speed * self.config.speed_scale;
        let measured = State2D::new(pose.x, pose.y, pose.yaw, speed);
        let applied = Actuation::new(
            self.post.to_model_steering(telemetry.steering_angle),
            telemetry.throttle,
        );
        let compensated = self.compensator.compensate(&measured, &applied);

        let local_waypoints = path_to_local(&compensated.pose(), &waypoints);
        let reference = Polynomial::fit_path(&local_waypoints, self.config.fit_degree)?;
        let initial = TrackingState::at_origin(
            compensated.v,
            reference.cross_track_error(),
            reference.heading_error(),
        );

        let warm = if self.config.warm_start { self.last_solution.as_ref() } else { None };
        let solution = self.solver.solve(&initial, &reference, warm)?;

        Ok(ControlCycle { compensated, local_waypoints, reference, initial, solution })
    }

    /// Process one telemetry record and produce the command to emit.
    pub fn step(&mut self, telemetry: &Telemetry) -> CycleOutput {
        self.cycles += 1;
        let output = match self.compute(telemetry) {
            Ok(cycle) => {
                let command = self.post.process(&cycle.solution, &cycle.reference);
                debug!(
                    "cycle {}: cte {:.3}, epsi {:.3}, steering {:.3}, throttle {:.3}, \
                     {} sqp iterations",
                    self.cycles,
                    cycle.initial.cte,
                    cycle.initial.epsi,
                    command.steering_angle,
                    command.throttle,
                    cycle.solution.iterations
                );
                self.last_solution = Some(cycle.solution);
                CycleOutput {
                    command,
                    source: CommandSource::Optimized,
                }
            }
            Err(err) => self.fallback(err),
        };
        self.emit(output)
    }

    /// Decode a telemetry JSON object and process it; undecodable input is
    /// answered with the safe default.
    pub fn step_json(&mut self, text: &str) -> CycleOutput {
        match Telemetry::from_json(text) {
            Ok(telemetry) => self.step(&telemetry),
            Err(err) => {
                self.cycles += 1;
                let output = self.fallback(err);
                self.emit(output)
            }
        }
    }

    /// Record the command as the one to hold and apply the emulated delay.
    fn emit(&mut self, output: CycleOutput) -> CycleOutput {
        self.last_command = Some((output.command.steering_angle, output.command.throttle));
        if self.config.emulated_delay_ms > 0 {
            thread::sleep(Duration::from_millis(self.config.emulated_delay_ms));
        }
        output
    }

    fn fallback(&mut self, err: MpcError) -> CycleOutput {
        self.last_solution = None;
        if err.is_validation() {
            warn!("cycle {}: rejected input ({}), sending safe default", self.cycles, err);
            return CycleOutput {
                command: SteerCommand::neutral(),
                source: CommandSource::SafeDefault,
            };
        }

        warn!("cycle {}: {}, holding previous command", self.cycles, err);
        let (steering, throttle) = self.last_command.unwrap_or((0.0, 0.0));
        CycleOutput {
            command: SteerCommand::from_values(steering, throttle),
            source: CommandSource::Held,
        }
    }
}
