use serde::{Deserialize, Serialize};

use crate::error::EnvError;
use crate::track::Surface;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: Vec2) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn midpoint(&self, other: Vec2) -> Vec2 {
        Vec2::new((self.x + other.x) * 0.5, (self.y + other.y) * 0.5)
    }
}

/// The seven discrete controls available to the policy. The discriminant is
/// the action id used by the network output layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Accelerate = 0,
    Reverse = 1,
    SteerLeft = 2,
    SteerRight = 3,
    AccelerateLeft = 4,
    AccelerateRight = 5,
    Coast = 6,
}

impl Action {
    pub const COUNT: usize = 7;

    pub const ALL: [Action; Action::COUNT] = [
        Action::Accelerate,
        Action::Reverse,
        Action::SteerLeft,
        Action::SteerRight,
        Action::AccelerateLeft,
        Action::AccelerateRight,
        Action::Coast,
    ];

    pub fn from_index(id: usize) -> Result<Self, EnvError> {
        Self::ALL.get(id).copied().ok_or(EnvError::ActionOutOfRange {
            id,
            count: Self::COUNT,
        })
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// (acceleration input, steering input)
    pub fn controls(self) -> (f32, f32) {
        match self {
            Action::Accelerate => (1.0, 0.0),
            Action::Reverse => (-0.4, 0.0),
            Action::SteerLeft => (0.0, -1.0),
            Action::SteerRight => (0.0, 1.0),
            Action::AccelerateLeft => (1.0, -1.0),
            Action::AccelerateRight => (1.0, 1.0),
            Action::Coast => (0.0, 0.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicsConfig {
    pub max_speed: f32,
    pub acceleration: f32,
    pub friction: f32,
    pub turn_speed_base: f32,
    pub turn_speed_factor: f32,
    /// Below this absolute speed the vehicle cannot turn.
    pub min_turn_speed: f32,
    /// Speed multiplier applied on a rejected (colliding) step.
    pub bounce: f32,
    pub dt: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            max_speed: 300.0,
            acceleration: 150.0,
            friction: 50.0,
            turn_speed_base: 3.0,
            turn_speed_factor: 0.3,
            min_turn_speed: 1.0,
            bounce: -0.3,
            dt: 1.0 / 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub position: Vec2,
    pub velocity: Vec2,
    /// Radians, 0 = +x, increasing clockwise on screen (y grows downward).
    pub heading: f32,
    pub speed: f32,
}

impl VehicleState {
    pub fn at_rest(position: Vec2, heading: f32) -> Self {
        Self {
            position,
            velocity: Vec2::default(),
            heading,
            speed: 0.0,
        }
    }

    /// Integrates one timestep of speed, heading and position on the given
    /// surface. Collision handling is the caller's job.
    pub fn advance(&mut self, action: Action, surface: Surface, cfg: &PhysicsConfig) {
        let (accel_input, steer_input) = action.controls();
        let dt = cfg.dt;

        self.speed += accel_input * cfg.acceleration * dt;

        // Surface drag only applies while coasting.
        let friction = if accel_input == 0.0 {
            cfg.friction * surface.friction()
        } else {
            cfg.friction
        };

        if self.speed > 0.0 {
            self.speed = (self.speed - friction * dt).max(0.0);
        } else if self.speed < 0.0 {
            self.speed = (self.speed + friction * dt).min(0.0);
        }

        let max_on_surface = if surface.is_high_friction() {
            cfg.max_speed * 0.5
        } else {
            cfg.max_speed
        };
        self.speed = self.speed.clamp(-max_on_surface * 0.5, max_on_surface);

        let speed_factor = 1.0 / (1.0 + self.speed.abs() / cfg.max_speed * cfg.turn_speed_factor);
        let turn_rate = cfg.turn_speed_base * speed_factor;
        if self.speed.abs() > cfg.min_turn_speed {
            self.heading += steer_input * turn_rate * dt * self.speed.signum();
        }

        self.sync_velocity();
        self.position.x += self.velocity.x * dt;
        self.position.y += self.velocity.y * dt;
    }

    /// Rejects the last move: restores `previous` and bounces the speed.
    pub fn bounce_back(&mut self, previous: Vec2, cfg: &PhysicsConfig) {
        self.position = previous;
        self.speed *= cfg.bounce;
        self.sync_velocity();
    }

    fn sync_velocity(&mut self) {
        self.velocity = Vec2::new(self.heading.cos() * self.speed, self.heading.sin() * self.speed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_ids_round_trip() {
        for (i, action) in Action::ALL.iter().enumerate() {
            assert_eq!(action.index(), i);
            assert_eq!(Action::from_index(i).unwrap(), *action);
        }
    }

    #[test]
    fn test_action_out_of_range_is_error() {
        assert_eq!(
            Action::from_index(7),
            Err(EnvError::ActionOutOfRange { id: 7, count: 7 })
        );
    }

    #[test]
    fn test_acceleration_is_capped_on_grass() {
        let cfg = PhysicsConfig::default();
        let mut car = VehicleState::at_rest(Vec2::new(0.0, 0.0), 0.0);
        for _ in 0..2000 {
            car.advance(Action::Accelerate, Surface::Grass, &cfg);
        }
        assert!((car.speed - cfg.max_speed * 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_no_steering_when_stationary() {
        let cfg = PhysicsConfig::default();
        let mut car = VehicleState::at_rest(Vec2::new(10.0, 10.0), 0.5);
        car.advance(Action::SteerLeft, Surface::Track, &cfg);
        assert_eq!(car.heading, 0.5);
        assert_eq!(car.position, Vec2::new(10.0, 10.0));
    }

    #[test]
    fn test_coasting_decays_faster_on_grass() {
        let cfg = PhysicsConfig::default();
        let mut on_track = VehicleState::at_rest(Vec2::default(), 0.0);
        on_track.speed = 100.0;
        let mut on_grass = on_track;
        on_track.advance(Action::Coast, Surface::Track, &cfg);
        on_grass.advance(Action::Coast, Surface::Grass, &cfg);
        assert!(on_grass.speed < on_track.speed);
    }

    #[test]
    fn test_bounce_back_restores_and_inverts() {
        let cfg = PhysicsConfig::default();
        let mut car = VehicleState::at_rest(Vec2::new(5.0, 5.0), 0.0);
        car.speed = 100.0;
        car.position = Vec2::new(7.0, 5.0);
        car.bounce_back(Vec2::new(5.0, 5.0), &cfg);
        assert_eq!(car.position, Vec2::new(5.0, 5.0));
        assert!((car.speed + 30.0).abs() < 1e-4);
    }

    #[test]
    fn test_bounce_back_reverses_velocity() {
        let cfg = PhysicsConfig::default();
        let mut car = VehicleState::at_rest(Vec2::new(20.0, 20.0), std::f32::consts::FRAC_PI_2);
        car.speed = 200.0;
        let before = car.position;
        car.advance(Action::Accelerate, Surface::Track, &cfg);
        assert!(car.velocity.y > 0.0);

        car.bounce_back(before, &cfg);
        let expected_vy = car.speed;
        assert!(car.speed < 0.0);
        assert!(car.velocity.x.abs() < 1e-3);
        assert!((car.velocity.y - expected_vy).abs() < 1e-3);
    }
}
