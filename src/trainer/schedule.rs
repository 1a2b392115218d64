use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Multiplicative per-episode epsilon decay with a floor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpsilonSchedule {
    pub start: f64,
    pub end: f64,
    pub decay: f64,
    value: f64,
}

impl EpsilonSchedule {
    pub fn new(start: f64, end: f64, decay: f64) -> Self {
        Self { start, end, decay, value: start.max(end) }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn set_value(&mut self, value: f64) {
        self.value = value.max(self.end);
    }

    pub fn step(&mut self) -> f64 {
        self.value = (self.value * self.decay).max(self.end);
        self.value
    }

    /// Closed form after `n` decay steps: `max(end, start * decay^n)`.
    pub fn value_after(&self, n: u32) -> f64 {
        (self.start * self.decay.powi(n as i32)).max(self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LrDrop {
    FirstFinish(f64),
    FinishRate { rate: f64, lr: f64 },
}

impl LrDrop {
    pub fn lr(&self) -> f64 {
        match self {
            LrDrop::FirstFinish(lr) => *lr,
            LrDrop::FinishRate { lr, .. } => *lr,
        }
    }
}

/// One-way learning-rate milestones: a drop on the first completed race and
/// another once the rolling finish rate reaches the threshold. Each fires at
/// most once and never raises the rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningRateSchedule {
    pub first_finish_lr: f64,
    pub finish_rate_lr: f64,
    pub window: usize,
    pub threshold: f64,
    pub dropped_on_first_finish: bool,
    pub dropped_on_finish_rate: bool,
}

impl LearningRateSchedule {
    pub fn new(first_finish_lr: f64, finish_rate_lr: f64, window: usize, threshold: f64) -> Self {
        Self {
            first_finish_lr,
            finish_rate_lr,
            window,
            threshold,
            dropped_on_first_finish: false,
            dropped_on_finish_rate: false,
        }
    }

    /// `finishes` holds the newest per-episode finish flags, newest last. Only
    /// the last `window` of them count toward the finish rate.
    pub fn observe(&mut self, finishes: &VecDeque<bool>, current_lr: f64) -> Option<LrDrop> {
        let mut drop = None;

        if !self.dropped_on_first_finish && finishes.back().copied().unwrap_or(false) {
            self.dropped_on_first_finish = true;
            if self.first_finish_lr < current_lr {
                drop = Some(LrDrop::FirstFinish(self.first_finish_lr));
            }
        }

        if !self.dropped_on_finish_rate && finishes.len() >= self.window {
            let finished = finishes
                .iter()
                .skip(finishes.len() - self.window)
                .filter(|f| **f)
                .count();
            let rate = finished as f64 / self.window as f64;
            if rate >= self.threshold {
                self.dropped_on_finish_rate = true;
                let lr_now = drop.map(|d| d.lr()).unwrap_or(current_lr);
                if self.finish_rate_lr < lr_now {
                    drop = Some(LrDrop::FinishRate { rate, lr: self.finish_rate_lr });
                }
            }
        }

        drop
    }
}
