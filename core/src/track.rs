use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;
use crate::error::EnvError;
use crate::vehicle::Vec2;

/// Surface class of a single track pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Surface {
    Wall,
    Track,
    Grass,
    OutOfBounds,
}

impl Surface {
    pub const WALL_RGB: [u8; 3] = [15, 15, 15];
    pub const TRACK_RGB: [u8; 3] = [35, 35, 35];
    pub const GRASS_RGB: [u8; 3] = [34, 177, 76];

    /// Unknown colours drive like tarmac.
    pub fn from_rgb(rgb: [u8; 3]) -> Self {
        match rgb {
            Self::WALL_RGB => Surface::Wall,
            Self::GRASS_RGB => Surface::Grass,
            _ => Surface::Track,
        }
    }

    pub fn friction(self) -> f32 {
        match self {
            Surface::Wall => 999.0,
            Surface::Grass => 3.0,
            Surface::Track | Surface::OutOfBounds => 1.0,
        }
    }

    pub fn is_high_friction(self) -> bool {
        self.friction() > 2.0
    }

    /// Walls and the image border both stop rays and vehicles.
    pub fn is_blocking(self) -> bool {
        matches!(self, Surface::Wall | Surface::OutOfBounds)
    }
}

/// Rasterised track: one surface class per pixel, row-major.
#[derive(Debug, Clone)]
pub struct TrackImage {
    width: usize,
    height: usize,
    cells: Vec<Surface>,
}

impl TrackImage {
    pub fn new(width: usize, height: usize, cells: Vec<Surface>) -> Result<Self, EnvError> {
        if width == 0 || height == 0 {
            return Err(EnvError::InvalidTrack(format!(
                "empty track image ({}x{})",
                width, height
            )));
        }
        if cells.len() != width * height {
            return Err(EnvError::InvalidTrack(format!(
                "expected {} cells for {}x{}, got {}",
                width * height,
                width,
                height,
                cells.len()
            )));
        }
        Ok(Self { width, height, cells })
    }

    /// Builds a track from a decoded RGB8 buffer.
    pub fn from_rgb(width: usize, height: usize, rgb: &[u8]) -> Result<Self, EnvError> {
        if rgb.len() != width * height * 3 {
            return Err(EnvError::InvalidTrack(format!(
                "expected {} RGB bytes for {}x{}, got {}",
                width * height * 3,
                width,
                height,
                rgb.len()
            )));
        }
        let cells = rgb
            .chunks_exact(3)
            .map(|px| Surface::from_rgb([px[0], px[1], px[2]]))
            .collect();
        Self::new(width, height, cells)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Pixel lookup by truncation, matching how positions map onto the image.
    pub fn surface_at(&self, pos: Vec2) -> Surface {
        if pos.x < 0.0 || pos.y < 0.0 {
            return Surface::OutOfBounds;
        }
        let (px, py) = (pos.x as usize, pos.y as usize);
        if px >= self.width || py >= self.height {
            return Surface::OutOfBounds;
        }
        self.cells[py * self.width + px]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StartPose {
    pub position: Vec2,
    pub heading: f32,
}

/// A complete racing venue: surface map, ordered checkpoints (index 0 is the
/// start/finish line) and the grid position.
#[derive(Debug, Clone)]
pub struct Circuit {
    pub track: TrackImage,
    pub checkpoints: Vec<Checkpoint>,
    pub start: StartPose,
}

impl Circuit {
    pub fn new(
        track: TrackImage,
        checkpoints: Vec<Checkpoint>,
        start: StartPose,
    ) -> Result<Self, EnvError> {
        if checkpoints.len() < 2 {
            return Err(EnvError::InvalidTrack(format!(
                "a circuit needs at least 2 checkpoints, got {}",
                checkpoints.len()
            )));
        }
        if track.surface_at(start.position).is_blocking() {
            return Err(EnvError::InvalidTrack(format!(
                "start position ({:.1}, {:.1}) is not drivable",
                start.position.x, start.position.y
            )));
        }
        Ok(Self { track, checkpoints, start })
    }

    /// Square image holding a circular circuit: wall in the middle and beyond
    /// the outer edge, a grass verge on both sides of the tarmac band.
    /// Proportions are those of a 900px image with a 300px centre line.
    /// Checkpoints are radial gates spaced evenly clockwise from the top; the
    /// car starts just before gate 0 facing +x.
    pub fn ring(size: usize, checkpoint_count: usize) -> Result<Self, EnvError> {
        let scale = size as f32 / 900.0;
        let centre = Vec2::new(size as f32 * 0.5, size as f32 * 0.5);
        let inner_wall = 200.0 * scale;
        let track_inner = 230.0 * scale;
        let track_outer = 370.0 * scale;
        let outer_wall = 400.0 * scale;

        let mut cells = Vec::with_capacity(size * size);
        for y in 0..size {
            for x in 0..size {
                let r = centre.distance(Vec2::new(x as f32 + 0.5, y as f32 + 0.5));
                let surface = if r < inner_wall || r >= outer_wall {
                    Surface::Wall
                } else if r < track_inner || r >= track_outer {
                    Surface::Grass
                } else {
                    Surface::Track
                };
                cells.push(surface);
            }
        }
        let track = TrackImage::new(size, size, cells)?;

        let checkpoints = (0..checkpoint_count)
            .map(|k| {
                let theta = -PI / 2.0 + k as f32 * 2.0 * PI / checkpoint_count as f32;
                let (s, c) = theta.sin_cos();
                Checkpoint::new(
                    Vec2::new(centre.x + c * inner_wall, centre.y + s * inner_wall),
                    Vec2::new(centre.x + c * outer_wall, centre.y + s * outer_wall),
                )
            })
            .collect();

        let centre_line = 300.0 * scale;
        let start = StartPose {
            position: Vec2::new(centre.x - 20.0 * scale, centre.y - centre_line),
            heading: 0.0,
        };
        Self::new(track, checkpoints, start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_classification() {
        assert_eq!(Surface::from_rgb([15, 15, 15]), Surface::Wall);
        assert_eq!(Surface::from_rgb([35, 35, 35]), Surface::Track);
        assert_eq!(Surface::from_rgb([34, 177, 76]), Surface::Grass);
        assert_eq!(Surface::from_rgb([200, 10, 10]), Surface::Track);
    }

    #[test]
    fn test_friction_multipliers() {
        assert_eq!(Surface::Track.friction(), 1.0);
        assert_eq!(Surface::Grass.friction(), 3.0);
        assert!(Surface::Wall.friction() > 100.0);
        assert!(Surface::Grass.is_high_friction());
        assert!(!Surface::Track.is_high_friction());
    }

    #[test]
    fn test_from_rgb_rejects_short_buffer() {
        let err = TrackImage::from_rgb(2, 2, &[0u8; 11]).unwrap_err();
        assert!(matches!(err, EnvError::InvalidTrack(_)));
    }

    #[test]
    fn test_surface_at_outside_image() {
        let img = TrackImage::from_rgb(2, 1, &[35, 35, 35, 15, 15, 15]).unwrap();
        assert_eq!(img.surface_at(Vec2::new(0.5, 0.5)), Surface::Track);
        assert_eq!(img.surface_at(Vec2::new(1.5, 0.5)), Surface::Wall);
        assert_eq!(img.surface_at(Vec2::new(-0.5, 0.5)), Surface::OutOfBounds);
        assert_eq!(img.surface_at(Vec2::new(0.5, 1.0)), Surface::OutOfBounds);
    }

    #[test]
    fn test_ring_layout() {
        let circuit = Circuit::ring(900, 8).unwrap();
        let t = &circuit.track;
        assert_eq!(t.surface_at(Vec2::new(450.0, 450.0)), Surface::Wall);
        assert_eq!(t.surface_at(Vec2::new(450.0, 150.0)), Surface::Track);
        assert_eq!(t.surface_at(Vec2::new(450.0, 235.0)), Surface::Grass);
        assert_eq!(t.surface_at(Vec2::new(5.0, 5.0)), Surface::Wall);
        assert_eq!(circuit.checkpoints.len(), 8);
        assert_eq!(t.surface_at(circuit.start.position), Surface::Track);
    }
}
