// src/rl/sim_env.rs
//
// Synthetic multi-lane road for exercising the arbitration stack.
//
// This is a small deterministic kinematic model, not a driving simulator:
// - ego and traffic move longitudinally at their own speeds
// - lane changes interpolate laterally at a fixed rate
// - a crash is any traffic vehicle overlapping ego in lane and position
// - episodes truncate after `duration` steps
//
// Observations follow the base kinematic layout in an ego-centric frame:
// ego x = 0, traffic x = longitudinal offset / POSITION_SCALE, lane is the
// continuous lateral coordinate in lane units, vx = speed / SPEED_SCALE and
// vy is lateral speed in lanes per step. The V-1 nearest vehicles are
// observed, nearest first.
//
// All state transitions are deterministic given the reset seed.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::config::Preset;
use crate::error::{GuardError, Result};

use super::action::PrimitiveAction;
use super::env::{Environment, StepInfo, Transition};
use super::observation::{ObservationMatrix, ObservationShape, BASE_FEATURES};

/// Metres per observation distance unit.
pub const POSITION_SCALE: f64 = 10.0;
/// Metres per second per observation velocity unit.
pub const SPEED_SCALE: f64 = 25.0;
/// Bumper-to-bumper collision distance (m).
pub const VEHICLE_LENGTH: f64 = 5.0;

const SPEED_STEP: f64 = 5.0;
const LANE_CHANGE_RATE: f64 = 0.5;
const TRAFFIC_LANE_CHANGE_PROB: f64 = 0.02;
const SPAWN_AHEAD: f64 = 250.0;
const DESPAWN_BEHIND: f64 = 150.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HighwaySimConfig {
    pub lanes: usize,
    /// Traffic vehicles on the road (excluding ego).
    pub traffic: usize,
    /// Observed rows, ego included (V).
    pub observed_vehicles: usize,
    /// Steps before truncation.
    pub duration: u64,
    /// Seconds per step.
    pub dt: f64,
    /// Ego speed limits (m/s).
    pub ego_speed_range: (f64, f64),
    /// Traffic cruise speeds (m/s).
    pub traffic_speed_range: (f64, f64),
    /// Maximum speed change per second (m/s^2).
    pub max_accel: f64,
    pub collision_reward: f64,
    pub lane_change_reward: f64,
    pub right_lane_reward: f64,
    pub high_speed_reward: f64,
    /// Speeds mapped linearly to [0, 1] for the high-speed reward (m/s).
    pub reward_speed_range: (f64, f64),
}

impl Default for HighwaySimConfig {
    fn default() -> Self {
        Self::highway()
    }
}

impl HighwaySimConfig {
    pub fn highway() -> Self {
        Self {
            lanes: 4,
            traffic: 20,
            observed_vehicles: 5,
            duration: 40,
            dt: 1.0,
            ego_speed_range: (10.0, 40.0),
            traffic_speed_range: (18.0, 28.0),
            max_accel: 5.0,
            collision_reward: -10.0,
            lane_change_reward: -0.2,
            right_lane_reward: 0.3,
            high_speed_reward: 1.0,
            reward_speed_range: (25.0, 35.0),
        }
    }

    /// Single circulating lane: no overtaking room, denser interaction.
    pub fn roundabout() -> Self {
        Self {
            lanes: 1,
            traffic: 8,
            duration: 60,
            traffic_speed_range: (15.0, 22.0),
            collision_reward: -5.0,
            lane_change_reward: -0.1,
            right_lane_reward: 0.0,
            reward_speed_range: (20.0, 30.0),
            ..Self::highway()
        }
    }

    pub fn for_preset(preset: Preset) -> Self {
        match preset {
            Preset::Highway => Self::highway(),
            Preset::Roundabout => Self::roundabout(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.lanes == 0 {
            return Err(GuardError::config("sim.lanes", "must be >= 1"));
        }
        if self.observed_vehicles == 0 {
            return Err(GuardError::config("sim.observed_vehicles", "must be >= 1"));
        }
        // Every observed row must be a real vehicle: zero-filled rows would
        // read as an in-lane vehicle at distance 0.
        if self.traffic + 1 < self.observed_vehicles {
            return Err(GuardError::config(
                "sim.traffic",
                format!(
                    "{} traffic vehicles cannot fill {} observed rows",
                    self.traffic, self.observed_vehicles
                ),
            ));
        }
        if self.duration == 0 || !(self.dt > 0.0 && self.dt.is_finite()) {
            return Err(GuardError::config("sim.duration", "duration and dt must be > 0"));
        }
        if !(self.max_accel >= 0.0 && self.max_accel.is_finite()) {
            return Err(GuardError::config(
                "sim.max_accel",
                format!("must be finite and >= 0, got {}", self.max_accel),
            ));
        }
        check_speed_range("sim.ego_speed_range", self.ego_speed_range)?;
        check_speed_range("sim.traffic_speed_range", self.traffic_speed_range)?;
        check_speed_range("sim.reward_speed_range", self.reward_speed_range)?;
        Ok(())
    }
}

fn check_speed_range(field: &str, (lo, hi): (f64, f64)) -> Result<()> {
    if !(lo.is_finite() && hi.is_finite() && lo <= hi) {
        return Err(GuardError::config(
            field,
            format!("must be finite with lo <= hi, got ({lo}, {hi})"),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
struct Vehicle {
    /// Longitudinal position (m).
    x: f64,
    /// Continuous lateral coordinate in lane units.
    lane: f64,
    target_lane: usize,
    speed: f64,
    target_speed: f64,
    /// Lateral speed on the last step (lanes per step).
    vy: f64,
}

impl Vehicle {
    fn new(x: f64, lane: usize, speed: f64) -> Self {
        Self {
            x,
            lane: lane as f64,
            target_lane: lane,
            speed,
            target_speed: speed,
            vy: 0.0,
        }
    }

    fn advance(&mut self, dt: f64, max_accel: f64) {
        let dv = (self.target_speed - self.speed).clamp(-max_accel * dt, max_accel * dt);
        self.speed += dv;

        let dl = (self.target_lane as f64 - self.lane).clamp(-LANE_CHANGE_RATE, LANE_CHANGE_RATE);
        self.lane += dl;
        self.vy = dl;

        self.x += self.speed * dt;
    }

    fn overlaps(&self, other: &Vehicle) -> bool {
        (self.lane - other.lane).abs() < 0.5 && (self.x - other.x).abs() < VEHICLE_LENGTH
    }
}

/// Gym-style synthetic road over primitive actions.
pub struct HighwaySim {
    config: HighwaySimConfig,
    rng: ChaCha8Rng,
    ego: Vehicle,
    traffic: Vec<Vehicle>,
    steps: u64,
    crashed: bool,
    done: bool,
    seed: u64,
}

impl HighwaySim {
    pub fn new(config: HighwaySimConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            rng: ChaCha8Rng::seed_from_u64(0),
            ego: Vehicle::new(0.0, 0, 25.0),
            traffic: Vec::new(),
            steps: 0,
            crashed: false,
            done: false,
            seed: 0,
        })
    }

    pub fn config(&self) -> &HighwaySimConfig {
        &self.config
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    fn sample_speed(&mut self) -> f64 {
        let (lo, hi) = self.config.traffic_speed_range;
        if lo >= hi {
            return lo;
        }
        self.rng.gen_range(lo..=hi)
    }

    /// Place a traffic vehicle in [x_lo, x_hi) on a lane with room for it.
    fn spawn(&mut self, x_lo: f64, x_hi: f64) -> Vehicle {
        let speed = self.sample_speed();
        let mut candidate = Vehicle::new(x_lo, 0, speed);
        for _ in 0..100 {
            let lane = self.rng.gen_range(0..self.config.lanes);
            let x = self.rng.gen_range(x_lo..x_hi);
            candidate = Vehicle::new(x, lane, speed);
            let clear_of_ego = lane != self.ego.target_lane
                || (candidate.x - self.ego.x).abs() > 3.0 * VEHICLE_LENGTH;
            let clear_of_traffic = self
                .traffic
                .iter()
                .all(|v| v.target_lane != lane || (v.x - x).abs() > 2.0 * VEHICLE_LENGTH);
            if clear_of_ego && clear_of_traffic {
                break;
            }
        }
        candidate
    }

    fn apply_ego_action(&mut self, action: PrimitiveAction) {
        let (lo, hi) = self.config.ego_speed_range;
        let last_lane = self.config.lanes - 1;
        match action {
            PrimitiveAction::LaneLeft => {
                self.ego.target_lane = self.ego.target_lane.saturating_sub(1);
            }
            PrimitiveAction::LaneRight => {
                self.ego.target_lane = (self.ego.target_lane + 1).min(last_lane);
            }
            PrimitiveAction::Faster => {
                self.ego.target_speed = (self.ego.target_speed + SPEED_STEP).clamp(lo, hi);
            }
            PrimitiveAction::Slower => {
                self.ego.target_speed = (self.ego.target_speed - SPEED_STEP).clamp(lo, hi);
            }
            PrimitiveAction::Idle => {}
        }
    }

    fn move_traffic(&mut self) {
        let lanes = self.config.lanes;
        for i in 0..self.traffic.len() {
            if lanes > 1 && self.rng.gen::<f64>() < TRAFFIC_LANE_CHANGE_PROB {
                let current = self.traffic[i].target_lane;
                let target = if current == 0 {
                    1
                } else if current == lanes - 1 || self.rng.gen::<bool>() {
                    current - 1
                } else {
                    current + 1
                };
                let x = self.traffic[i].x;
                let free = self
                    .traffic
                    .iter()
                    .enumerate()
                    .all(|(j, v)| j == i || v.target_lane != target || (v.x - x).abs() > 2.0 * VEHICLE_LENGTH);
                if free {
                    self.traffic[i].target_lane = target;
                }
            }
            let (dt, accel) = (self.config.dt, self.config.max_accel);
            self.traffic[i].advance(dt, accel);
        }

        // Recycle vehicles that fell far behind to keep traffic around ego.
        for i in 0..self.traffic.len() {
            if self.traffic[i].x < self.ego.x - DESPAWN_BEHIND {
                let ahead = self.ego.x + SPAWN_AHEAD;
                let fresh = self.spawn(ahead, ahead + 100.0);
                self.traffic[i] = fresh;
            }
        }
    }

    fn reward(&self, action: PrimitiveAction) -> f64 {
        let cfg = &self.config;
        let (lo, hi) = cfg.reward_speed_range;
        let speed_term = if hi > lo {
            ((self.ego.speed - lo) / (hi - lo)).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let lane_term = if cfg.lanes > 1 {
            self.ego.target_lane as f64 / (cfg.lanes - 1) as f64
        } else {
            0.0
        };
        let lane_change = matches!(action, PrimitiveAction::LaneLeft | PrimitiveAction::LaneRight);

        let mut reward = cfg.high_speed_reward * speed_term + cfg.right_lane_reward * lane_term;
        if lane_change {
            reward += cfg.lane_change_reward;
        }
        if self.crashed {
            reward += cfg.collision_reward;
        }
        reward
    }

    fn observe(&self) -> Result<ObservationMatrix> {
        let mut nearest: Vec<&Vehicle> = self.traffic.iter().collect();
        nearest.sort_by(|a, b| {
            (a.x - self.ego.x)
                .abs()
                .total_cmp(&(b.x - self.ego.x).abs())
        });

        let mut rows = Vec::with_capacity(self.config.observed_vehicles);
        rows.push(vec![
            1.0,
            0.0,
            self.ego.lane,
            self.ego.speed / SPEED_SCALE,
            self.ego.vy,
        ]);
        for v in nearest.into_iter().take(self.config.observed_vehicles - 1) {
            rows.push(vec![
                1.0,
                (v.x - self.ego.x) / POSITION_SCALE,
                v.lane,
                v.speed / SPEED_SCALE,
                v.vy,
            ]);
        }
        Ok(ObservationMatrix::from_rows(rows)?)
    }

    fn info(&self) -> StepInfo {
        StepInfo {
            crashed: self.crashed,
            episode_length: Some(self.steps),
            primitive_steps: 1,
        }
    }
}

impl Environment for HighwaySim {
    type Action = PrimitiveAction;

    fn observation_shape(&self) -> ObservationShape {
        ObservationShape::new(self.config.observed_vehicles, BASE_FEATURES)
    }

    fn reset(&mut self, seed: Option<u64>) -> Result<(ObservationMatrix, StepInfo)> {
        let seed = seed.unwrap_or_else(|| self.rng.gen());
        self.seed = seed;
        self.rng = ChaCha8Rng::seed_from_u64(seed);

        let lane = self.rng.gen_range(0..self.config.lanes);
        let speed = 25.0_f64.clamp(self.config.ego_speed_range.0, self.config.ego_speed_range.1);
        self.ego = Vehicle::new(0.0, lane, speed);

        self.traffic.clear();
        for _ in 0..self.config.traffic {
            let v = self.spawn(-DESPAWN_BEHIND / 2.0, SPAWN_AHEAD);
            self.traffic.push(v);
        }

        self.steps = 0;
        self.crashed = false;
        self.done = false;

        let mut info = self.info();
        info.primitive_steps = 0;
        Ok((self.observe()?, info))
    }

    fn step(&mut self, action: PrimitiveAction) -> Result<Transition> {
        if self.done {
            return Ok(Transition {
                observation: self.observe()?,
                reward: 0.0,
                terminated: self.crashed,
                truncated: !self.crashed,
                info: self.info(),
            });
        }

        self.steps += 1;
        self.apply_ego_action(action);
        let (dt, accel) = (self.config.dt, self.config.max_accel);
        self.ego.advance(dt, accel);
        self.move_traffic();

        self.crashed = self.traffic.iter().any(|v| v.overlaps(&self.ego));
        let terminated = self.crashed;
        let truncated = !terminated && self.steps >= self.config.duration;
        self.done = terminated || truncated;

        Ok(Transition {
            observation: self.observe()?,
            reward: self.reward(action),
            terminated,
            truncated,
            info: self.info(),
        })
    }
}
