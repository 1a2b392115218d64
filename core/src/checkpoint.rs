use serde::{Deserialize, Serialize};

use crate::vehicle::Vec2;

/// A gate the vehicle has to drive through.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub start: Vec2,
    pub end: Vec2,
    pub crossed: bool,
}

impl Checkpoint {
    pub fn new(start: Vec2, end: Vec2) -> Self {
        Self { start, end, crossed: false }
    }

    pub fn midpoint(&self) -> Vec2 {
        self.start.midpoint(self.end)
    }

    /// True when the movement segment `prev -> current` intersects the gate.
    pub fn is_crossed_by(&self, prev: Vec2, current: Vec2) -> bool {
        let (x1, y1, x2, y2) = (prev.x, prev.y, current.x, current.y);
        let (x3, y3, x4, y4) = (self.start.x, self.start.y, self.end.x, self.end.y);

        let denom = (x1 - x2) * (y3 - y4) - (y1 - y2) * (x3 - x4);
        if denom.abs() < 0.001 {
            return false;
        }

        let t = ((x1 - x3) * (y3 - y4) - (y1 - y3) * (x3 - x4)) / denom;
        let u = -((x1 - x2) * (y1 - y3) - (y1 - y2) * (x1 - x3)) / denom;

        (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LapState {
    NotStarted,
    LapInProgress { next_checkpoint: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LapEvent {
    None,
    /// First pass over the finish line; no lap is awarded.
    RaceStarted,
    CheckpointCrossed(usize),
    LapCompleted { laps_completed: u32, race_finished: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LapUpdate {
    pub event: LapEvent,
    /// The finish line was crossed while another checkpoint was targeted.
    pub illegal_finish_crossing: bool,
}

/// Ordered checkpoint sequence and the lap state machine over it.
///
/// Only the currently targeted checkpoint can be crossed. Checkpoint 0 is
/// never left flagged: it is set and cleared in the same update that
/// completes a lap.
#[derive(Debug, Clone)]
pub struct LapGraph {
    checkpoints: Vec<Checkpoint>,
    state: LapState,
    laps_completed: u32,
    total_laps: u32,
}

impl LapGraph {
    pub fn new(template: &[Checkpoint], total_laps: u32) -> Self {
        let mut graph = Self {
            checkpoints: template.to_vec(),
            state: LapState::NotStarted,
            laps_completed: 0,
            total_laps,
        };
        graph.reset();
        graph
    }

    pub fn reset(&mut self) {
        self.clear_flags();
        self.state = LapState::NotStarted;
        self.laps_completed = 0;
    }

    pub fn state(&self) -> LapState {
        self.state
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    pub fn laps_completed(&self) -> u32 {
        self.laps_completed
    }

    pub fn is_finished(&self) -> bool {
        self.laps_completed >= self.total_laps
    }

    /// Index of the checkpoint the vehicle must cross next.
    pub fn next_checkpoint(&self) -> usize {
        match self.state {
            LapState::NotStarted => 0,
            LapState::LapInProgress { next_checkpoint } => next_checkpoint,
        }
    }

    pub fn distance_to_target(&self, pos: Vec2) -> f32 {
        self.checkpoints[self.next_checkpoint()].midpoint().distance(pos)
    }

    pub fn advance(&mut self, prev: Vec2, current: Vec2) -> LapUpdate {
        let target = self.next_checkpoint();
        let illegal_finish_crossing =
            target != 0 && self.checkpoints[0].is_crossed_by(prev, current);

        let event = if self.checkpoints[target].is_crossed_by(prev, current) {
            self.cross(target)
        } else {
            LapEvent::None
        };

        LapUpdate { event, illegal_finish_crossing }
    }

    fn cross(&mut self, target: usize) -> LapEvent {
        let count = self.checkpoints.len();
        match (self.state, target) {
            (LapState::NotStarted, _) => {
                self.state = LapState::LapInProgress { next_checkpoint: 1 };
                LapEvent::RaceStarted
            }
            (LapState::LapInProgress { .. }, 0) => {
                let all_crossed = self.checkpoints[1..].iter().all(|cp| cp.crossed);
                if !all_crossed {
                    return LapEvent::None;
                }
                self.checkpoints[0].crossed = true;
                self.laps_completed += 1;
                self.clear_flags();
                self.state = LapState::LapInProgress { next_checkpoint: 1 };
                LapEvent::LapCompleted {
                    laps_completed: self.laps_completed,
                    race_finished: self.is_finished(),
                }
            }
            (LapState::LapInProgress { .. }, idx) => {
                self.checkpoints[idx].crossed = true;
                self.state = LapState::LapInProgress {
                    next_checkpoint: (idx + 1) % count,
                };
                LapEvent::CheckpointCrossed(idx)
            }
        }
    }

    fn clear_flags(&mut self) {
        for cp in &mut self.checkpoints {
            cp.crossed = false;
        }
    }
}
