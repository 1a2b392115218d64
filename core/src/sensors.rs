//! Ray-cast observation encoder.
//!
//! Layout (fixed for the lifetime of a model):
//! `[speed, sin(heading), cos(heading), x, y, short-range danger x13, long-range clearance x5]`

use serde::{Deserialize, Serialize};

use crate::track::TrackImage;
use crate::vehicle::{Vec2, VehicleState};

pub const POSE_FEATURES: usize = 5;
pub const SHORT_RAY_OFFSETS_DEG: [f32; 13] = [
    -90.0, -75.0, -60.0, -45.0, -30.0, -15.0, 0.0, 15.0, 30.0, 45.0, 60.0, 75.0, 90.0,
];
pub const LONG_RAY_OFFSETS_DEG: [f32; 5] = [-30.0, -15.0, 0.0, 15.0, 30.0];
pub const OBSERVATION_LEN: usize =
    POSE_FEATURES + SHORT_RAY_OFFSETS_DEG.len() + LONG_RAY_OFFSETS_DEG.len();

/// Ranges and normalisers for the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorLayout {
    pub speed_scale: f32,
    pub short_range: f32,
    /// Distance at which the danger score is roughly 1.0.
    pub danger_reference: f32,
    pub long_range: f32,
    pub ray_step: f32,
}

impl Default for SensorLayout {
    fn default() -> Self {
        Self {
            speed_scale: 300.0,
            short_range: 200.0,
            danger_reference: 50.0,
            long_range: 900.0,
            ray_step: 2.0,
        }
    }
}

impl SensorLayout {
    pub fn observation_len(&self) -> usize {
        OBSERVATION_LEN
    }

    /// Marches along the ray until a blocking pixel or `max_distance`.
    pub fn cast_ray(&self, track: &TrackImage, origin: Vec2, angle: f32, max_distance: f32) -> f32 {
        let (sin, cos) = angle.sin_cos();
        let mut distance = 0.0;
        while distance < max_distance {
            let point = Vec2::new(origin.x + cos * distance, origin.y + sin * distance);
            if track.surface_at(point).is_blocking() {
                return distance;
            }
            distance += self.ray_step;
        }
        max_distance
    }

    pub fn danger(&self, distance: f32) -> f32 {
        (1.0 / (distance / self.danger_reference + 0.1)).min(1.0)
    }

    pub fn clearance(&self, distance: f32) -> f32 {
        (distance / self.long_range).clamp(0.0, 1.0)
    }

    pub fn encode(&self, track: &TrackImage, vehicle: &VehicleState) -> Vec<f32> {
        let mut obs = Vec::with_capacity(OBSERVATION_LEN);
        obs.push(vehicle.speed / self.speed_scale);
        obs.push(vehicle.heading.sin());
        obs.push(vehicle.heading.cos());
        obs.push(vehicle.position.x / track.width() as f32);
        obs.push(vehicle.position.y / track.height() as f32);

        for offset in SHORT_RAY_OFFSETS_DEG {
            let heading = vehicle.heading + offset.to_radians();
            let d = self.cast_ray(track, vehicle.position, heading, self.short_range);
            obs.push(self.danger(d));
        }
        for offset in LONG_RAY_OFFSETS_DEG {
            let heading = vehicle.heading + offset.to_radians();
            let d = self.cast_ray(track, vehicle.position, heading, self.long_range);
            obs.push(self.clearance(d));
        }
        obs
    }
}
