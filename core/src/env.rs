use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::checkpoint::{LapEvent, LapGraph};
use crate::error::EnvError;
use crate::sensors::SensorLayout;
use crate::track::Circuit;
use crate::vehicle::{Action, PhysicsConfig, Vec2, VehicleState};

/// Training enables the anti-degenerate extras (stuck detector, idle
/// penalty); evaluation runs plain physics and lap logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvMode {
    Training,
    Evaluation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    pub progress_weight: f32,
    pub speed_bonus: f32,
    pub wall_penalty: f32,
    /// Per second spent on a high-friction surface.
    pub off_track_penalty: f32,
    pub step_cost: f32,
    pub idle_speed: f32,
    pub idle_grace_steps: usize,
    pub idle_penalty: f32,
    pub checkpoint_bonus: f32,
    pub lap_bonus: f32,
    pub finish_bonus: f32,
    pub illegal_finish_penalty: f32,
    pub stuck_check_interval: usize,
    pub stuck_distance: f32,
    pub stuck_strikes: usize,
    pub stuck_penalty: f32,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            progress_weight: 0.1,
            speed_bonus: 0.0075,
            wall_penalty: 10.0,
            off_track_penalty: 2.0,
            step_cost: 0.005,
            idle_speed: 8.0,
            idle_grace_steps: 30,
            idle_penalty: 0.02,
            checkpoint_bonus: 50.0,
            lap_bonus: 200.0,
            finish_bonus: 500.0,
            illegal_finish_penalty: 10.0,
            stuck_check_interval: 75,
            stuck_distance: 30.0,
            stuck_strikes: 3,
            stuck_penalty: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvConfig {
    pub physics: PhysicsConfig,
    pub rewards: RewardConfig,
    pub sensors: SensorLayout,
    pub total_laps: u32,
    pub max_steps: usize,
    pub mode: EnvMode,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            physics: PhysicsConfig::default(),
            rewards: RewardConfig::default(),
            sensors: SensorLayout::default(),
            total_laps: 3,
            max_steps: 7500,
            mode: EnvMode::Training,
        }
    }
}

impl EnvConfig {
    pub fn with_mode(&self, mode: EnvMode) -> Self {
        Self { mode, ..self.clone() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    RaceFinished,
    Stuck,
    StepLimit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    pub wall_hit: bool,
    /// The step started on a high-friction surface.
    pub off_track: bool,
    pub laps_completed: u32,
    pub next_checkpoint: usize,
    pub lap_event: LapEvent,
    pub termination: Option<Termination>,
    pub steps: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub observation: Vec<f32>,
    pub reward: f32,
    pub done: bool,
    pub info: StepInfo,
}

/// Single-vehicle racing environment.
#[derive(Debug, Clone)]
pub struct RaceEnv {
    circuit: Arc<Circuit>,
    config: EnvConfig,
    vehicle: VehicleState,
    laps: LapGraph,
    steps: usize,
    idle_steps: usize,
    stuck_strikes: usize,
    last_stuck_check: Vec2,
    termination: Option<Termination>,
}

impl RaceEnv {
    pub fn new(circuit: Arc<Circuit>, config: EnvConfig) -> Self {
        let vehicle = VehicleState::at_rest(circuit.start.position, circuit.start.heading);
        let laps = LapGraph::new(&circuit.checkpoints, config.total_laps);
        Self {
            last_stuck_check: vehicle.position,
            circuit,
            config,
            vehicle,
            laps,
            steps: 0,
            idle_steps: 0,
            stuck_strikes: 0,
            termination: None,
        }
    }

    pub fn reset(&mut self) -> Vec<f32> {
        self.vehicle =
            VehicleState::at_rest(self.circuit.start.position, self.circuit.start.heading);
        self.laps.reset();
        self.steps = 0;
        self.idle_steps = 0;
        self.stuck_strikes = 0;
        self.last_stuck_check = self.vehicle.position;
        self.termination = None;
        self.observe()
    }

    pub fn observe(&self) -> Vec<f32> {
        self.config.sensors.encode(&self.circuit.track, &self.vehicle)
    }

    pub fn observation_len(&self) -> usize {
        self.config.sensors.observation_len()
    }

    pub fn vehicle(&self) -> &VehicleState {
        &self.vehicle
    }

    pub fn laps(&self) -> &LapGraph {
        &self.laps
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn is_done(&self) -> bool {
        self.termination.is_some()
    }

    pub fn step_id(&mut self, action_id: usize) -> Result<StepResult, EnvError> {
        Ok(self.step(Action::from_index(action_id)?))
    }

    pub fn step(&mut self, action: Action) -> StepResult {
        if self.termination.is_some() {
            return self.result(0.0, false, false, LapEvent::None);
        }

        let training = self.config.mode == EnvMode::Training;
        if training && self.stuck_check() {
            self.termination = Some(Termination::Stuck);
            return self.result(-self.config.rewards.stuck_penalty, false, false, LapEvent::None);
        }

        let physics = &self.config.physics;
        let rewards = &self.config.rewards;
        let track = &self.circuit.track;

        let prev = self.vehicle.position;
        let surface = track.surface_at(prev);
        let off_track = surface.is_high_friction();

        self.vehicle.advance(action, surface, physics);

        let wall_hit = track.surface_at(self.vehicle.position).is_blocking();
        if wall_hit {
            self.vehicle.bounce_back(prev, physics);
        }
        let pos = self.vehicle.position;
        let speed = self.vehicle.speed.abs();

        let mut reward = 0.0;
        let progress = self.laps.distance_to_target(prev) - self.laps.distance_to_target(pos);
        reward += progress * rewards.progress_weight;
        if progress > 0.0 {
            reward += speed * physics.dt * rewards.speed_bonus;
        }
        if wall_hit {
            reward -= rewards.wall_penalty;
        }
        if off_track {
            reward -= rewards.off_track_penalty * physics.dt;
        }
        reward -= rewards.step_cost;

        if training {
            if speed < rewards.idle_speed && progress <= 0.0 {
                self.idle_steps += 1;
                if self.idle_steps > rewards.idle_grace_steps {
                    reward -= rewards.idle_penalty;
                }
            } else {
                self.idle_steps = 0;
            }
        }

        let update = self.laps.advance(prev, pos);
        match update.event {
            LapEvent::CheckpointCrossed(_) => reward += rewards.checkpoint_bonus,
            LapEvent::LapCompleted { race_finished, .. } => {
                reward += rewards.checkpoint_bonus + rewards.lap_bonus;
                if race_finished {
                    reward += rewards.finish_bonus;
                }
            }
            LapEvent::None | LapEvent::RaceStarted => {}
        }
        if update.illegal_finish_crossing {
            reward -= rewards.illegal_finish_penalty;
        }

        self.steps += 1;
        if self.laps.is_finished() {
            self.termination = Some(Termination::RaceFinished);
        } else if self.steps >= self.config.max_steps {
            self.termination = Some(Termination::StepLimit);
        }

        self.result(reward, wall_hit, off_track, update.event)
    }

    /// Samples displacement every `stuck_check_interval` steps; true once the
    /// vehicle has failed the distance check `stuck_strikes` times in a row.
    fn stuck_check(&mut self) -> bool {
        let cfg = &self.config.rewards;
        if self.steps == 0 || self.steps % cfg.stuck_check_interval != 0 {
            return false;
        }
        let moved = self.last_stuck_check.distance(self.vehicle.position);
        self.last_stuck_check = self.vehicle.position;
        if moved < cfg.stuck_distance {
            self.stuck_strikes += 1;
            self.stuck_strikes >= cfg.stuck_strikes
        } else {
            self.stuck_strikes = 0;
            false
        }
    }

    fn result(
        &self,
        reward: f32,
        wall_hit: bool,
        off_track: bool,
        lap_event: LapEvent,
    ) -> StepResult {
        StepResult {
            observation: self.observe(),
            reward,
            done: self.termination.is_some(),
            info: StepInfo {
                wall_hit,
                off_track,
                laps_completed: self.laps.laps_completed(),
                next_checkpoint: self.laps.next_checkpoint(),
                lap_event,
                termination: self.termination,
                steps: self.steps,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::OBSERVATION_LEN;

    fn ring_env(mode: EnvMode) -> RaceEnv {
        let circuit = Arc::new(Circuit::ring(900, 8).unwrap());
        RaceEnv::new(circuit, EnvConfig::default().with_mode(mode))
    }

    #[test]
    fn test_reset_returns_fixed_length_observation() {
        let mut env = ring_env(EnvMode::Training);
        assert_eq!(env.reset().len(), OBSERVATION_LEN);
        assert_eq!(env.observation_len(), OBSERVATION_LEN);
    }

    #[test]
    fn test_step_id_rejects_unknown_action() {
        let mut env = ring_env(EnvMode::Training);
        env.reset();
        assert!(matches!(env.step_id(9), Err(EnvError::ActionOutOfRange { .. })));
    }

    #[test]
    fn test_stationary_vehicle_is_terminated_as_stuck() {
        let mut env = ring_env(EnvMode::Training);
        env.reset();
        let mut last = None;
        for _ in 0..1000 {
            let res = env.step(Action::Coast);
            if res.done {
                last = Some(res);
                break;
            }
        }
        let res = last.expect("stuck detector never fired");
        assert_eq!(res.info.termination, Some(Termination::Stuck));
        assert_eq!(res.reward, -50.0);
        assert_eq!(res.info.laps_completed, 0);
        assert_eq!(res.info.steps, 225);
    }

    #[test]
    fn test_evaluation_mode_has_no_stuck_detector() {
        let mut cfg = EnvConfig::default().with_mode(EnvMode::Evaluation);
        cfg.max_steps = 400;
        let mut env = RaceEnv::new(Arc::new(Circuit::ring(900, 8).unwrap()), cfg);
        env.reset();
        let mut steps = 0;
        loop {
            let res = env.step(Action::Coast);
            steps += 1;
            if res.done {
                assert_eq!(res.info.termination, Some(Termination::StepLimit));
                break;
            }
        }
        assert_eq!(steps, 400);
    }

    #[test]
    fn test_idle_penalty_after_grace_period() {
        let mut env = ring_env(EnvMode::Training);
        env.reset();
        let step_cost = env.config().rewards.step_cost;
        let first = env.step(Action::Coast);
        assert!((first.reward + step_cost).abs() < 1e-6);
        for _ in 0..30 {
            env.step(Action::Coast);
        }
        let late = env.step(Action::Coast);
        assert!((late.reward + step_cost + 0.02).abs() < 1e-6);
    }

    #[test]
    fn test_wall_collision_rolls_back_position() {
        let mut env = ring_env(EnvMode::Training);
        env.reset();
        // Face the outer wall and floor it.
        env.vehicle.heading = -std::f32::consts::FRAC_PI_2;
        let mut hit = None;
        for _ in 0..400 {
            let before = env.vehicle.position;
            let res = env.step(Action::Accelerate);
            if res.info.wall_hit {
                hit = Some((before, res));
                break;
            }
        }
        let (before, res) = hit.expect("never reached the wall");
        assert_eq!(env.vehicle.position, before);
        assert!(env.vehicle.speed <= 0.0);
        assert!(res.reward < -9.0);
    }

    #[test]
    fn test_step_after_done_is_inert() {
        let mut env = ring_env(EnvMode::Training);
        env.reset();
        while !env.step(Action::Coast).done {}
        let again = env.step(Action::Accelerate);
        assert!(again.done);
        assert_eq!(again.reward, 0.0);
        assert_eq!(again.info.steps, 225);
    }
}
