// File: core/src/lib.rs
//
// Tensor-free racing simulation: track surfaces, checkpoints, vehicle
// kinematics, ray sensors and the step/reset environment built on them.

pub mod checkpoint;
pub mod env;
pub mod error;
pub mod sensors;
pub mod track;
pub mod vehicle;

pub use checkpoint::{Checkpoint, LapEvent, LapGraph, LapState};
pub use env::{EnvConfig, EnvMode, RaceEnv, RewardConfig, StepInfo, StepResult, Termination};
pub use error::EnvError;
pub use sensors::{SensorLayout, OBSERVATION_LEN};
pub use track::{Circuit, StartPose, Surface, TrackImage};
pub use vehicle::{Action, PhysicsConfig, Vec2, VehicleState};
