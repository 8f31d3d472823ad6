// Closed-loop MPC path tracking against a kinematic bicycle plant.
//
// The plant produces telemetry the way the driving simulator does (speed in
// mph, mirrored steering, a handful of waypoints ahead of the car) and
// applies every command only after the configured actuation latency.
//
// usage: mpc_simulation [config.toml] [--plot]

use std::collections::VecDeque;
use std::env;
use std::fs;

use log::{error, info, LevelFilter};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use mpc_bridge::bridge::{CommandSource, ControllerConfig, MpcController, Telemetry};
use mpc_bridge::common::{Actuation, MotionModel, Path2D, Point2D, State2D};
use mpc_bridge::geometry::{normalize_angle, path_to_global};
use mpc_bridge::path_tracking::{KinematicBicycle, LatencyCompensator};
use mpc_bridge::utils::{init_logger, save_history_svg, TrackPlot};

// Simulation parameters
const SIM_DT: f64 = 0.02; // [s] plant integration step
const CONTROL_PERIOD: f64 = 0.1; // [s] telemetry period
const SIM_TIME: f64 = 40.0; // [s]
const WAYPOINT_SPACING: f64 = 5.0; // [m]
const WAYPOINTS_AHEAD: usize = 6;
const POSITION_NOISE: f64 = 0.05; // [m] standard deviation
const TRACK_LENGTH: f64 = 1200.0; // [m]

/// Sinusoidal road along +x
fn build_track() -> Path2D {
    let n = (TRACK_LENGTH / WAYPOINT_SPACING) as usize;
    (0..n)
        .map(|i| {
            let x = i as f64 * WAYPOINT_SPACING;
            Point2D::new(x, 15.0 * (x / 60.0).sin())
        })
        .collect()
}

/// Index of the closest waypoint, searching forward from `hint`
fn nearest_index(track: &Path2D, position: Point2D, hint: usize) -> usize {
    let mut best = hint;
    let mut best_d = f64::MAX;
    for (i, p) in track.points.iter().enumerate().skip(hint).take(20) {
        let d = p.distance(&position);
        if d < best_d {
            best_d = d;
            best = i;
        }
    }
    best
}

fn main() {
    if let Err(e) = init_logger(LevelFilter::Info, None) {
        eprintln!("{}", e);
        return;
    }

    let args: Vec<String> = env::args().skip(1).collect();
    let plot = args.iter().any(|a| a == "--plot");
    let mut config = match args.iter().find(|a| !a.starts_with("--")) {
        Some(path) => match ControllerConfig::from_file(path) {
            Ok(c) => {
                info!("loaded configuration from {}", path);
                c
            }
            Err(e) => {
                error!("cannot load {}: {}", path, e);
                return;
            }
        },
        None => ControllerConfig::default(),
    };
    if config.emulated_delay_ms > 0 {
        info!("emulated delay of {} ms replaced by simulated latency", config.emulated_delay_ms);
        config.emulated_delay_ms = 0;
    }

    let plant = KinematicBicycle::new(config.mpc.lf);
    let compensator = LatencyCompensator::new(plant, config.latency);
    let steering_sign = config.steering_sign;
    let max_steer = config.mpc.max_steer;
    let speed_scale = config.speed_scale;
    let latency = config.latency;

    let mut controller = match MpcController::new(config) {
        Ok(c) => c,
        Err(e) => {
            error!("invalid configuration: {}", e);
            return;
        }
    };

    let track = build_track();
    let mut rng = StdRng::seed_from_u64(42);
    let noise = match Normal::new(0.0, POSITION_NOISE) {
        Ok(n) => n,
        Err(e) => {
            error!("{}", e);
            return;
        }
    };

    let mut state = State2D::new(0.0, -2.0, 0.0, 0.0);
    let mut applied = Actuation::zero();
    let mut pending: VecDeque<(f64, Actuation)> = VecDeque::new();
    let mut hint = 0;

    let mut driven = Path2D::new();
    let mut predictions = Vec::new();
    let mut times = Vec::new();
    let mut steering = Vec::new();
    let mut throttle = Vec::new();
    let mut cte = Vec::new();
    let (mut optimized, mut safe_default, mut held) = (0usize, 0usize, 0usize);

    let steps_per_cycle = (CONTROL_PERIOD / SIM_DT).round() as usize;
    let total_steps = (SIM_TIME / SIM_DT) as usize;
    let mut time = 0.0;

    for step in 0..total_steps {
        while pending.front().map_or(false, |(t, _)| *t <= time + 1e-9) {
            if let Some((_, u)) = pending.pop_front() {
                applied = u;
            }
        }

        if step % steps_per_cycle == 0 {
            hint = nearest_index(&track, state.pose().position(), hint);
            if hint + WAYPOINTS_AHEAD >= track.len() {
                info!("end of track reached at t = {:.1} s", time);
                break;
            }
            let ahead = &track.points[hint..hint + WAYPOINTS_AHEAD];

            let telemetry = Telemetry {
                ptsx: ahead.iter().map(|p| p.x).collect(),
                ptsy: ahead.iter().map(|p| p.y).collect(),
                x: state.x + noise.sample(&mut rng),
                y: state.y + noise.sample(&mut rng),
                psi: normalize_angle(state.yaw),
                speed: state.v / speed_scale,
                steering_angle: steering_sign * applied.steer,
                throttle: applied.accel,
            };

            let output = controller.step(&telemetry);
            match output.source {
                CommandSource::Optimized => optimized += 1,
                CommandSource::SafeDefault => safe_default += 1,
                CommandSource::Held => held += 1,
            }

            let command = output.command;
            let model_steer = steering_sign * command.steering_angle * max_steer;
            pending.push_back((time + latency, Actuation::new(model_steer, command.throttle)));

            if plot && step % (steps_per_cycle * 25) == 0 && !command.mpc_x.is_empty() {
                let pose = compensator.compensate(&state, &applied).pose();
                let local = Path2D::from_xy(&command.mpc_x, &command.mpc_y);
                predictions.push(path_to_global(&pose, &local));
            }

            let lateral = track.points[hint].distance(&state.pose().position());
            times.push(time);
            steering.push(command.steering_angle);
            throttle.push(command.throttle);
            cte.push(lateral);
        }

        state = plant.propagate(&state, &applied, SIM_DT);
        driven.push(state.pose().position());
        time += SIM_DT;
    }

    let cycles = cte.len().max(1);
    let mean_cte = cte.iter().sum::<f64>() / cycles as f64;
    let max_cte = cte.iter().cloned().fold(0.0, f64::max);
    info!(
        "{} cycles: {} optimized, {} safe default, {} held",
        cte.len(),
        optimized,
        safe_default,
        held
    );
    info!(
        "distance to nearest waypoint: mean {:.3} m, max {:.3} m, final speed {:.2} m/s",
        mean_cte, max_cte, state.v
    );

    if plot {
        if let Err(e) = fs::create_dir_all("./img/path_tracking") {
            error!("cannot create output directory: {}", e);
            return;
        }
        let mut figure = TrackPlot::new("MPC path tracking");
        figure.plot_track(&track).plot_driven(&driven);
        for prediction in &predictions {
            figure.plot_prediction(prediction);
        }
        figure.plot_vehicle(&state.pose(), 3.0);

        let history = "./img/path_tracking/mpc_history.svg";
        let results = [
            figure.save_svg("./img/path_tracking/mpc_simulation.svg"),
            save_history_svg(history, &times, &steering, &throttle, &cte),
        ];
        for result in results {
            if let Err(e) = result {
                error!("{}", e);
            }
        }
        info!("plots written to ./img/path_tracking");
    }
}
