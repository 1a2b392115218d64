use std::fs;
use std::path::{Path, PathBuf};

use racing_core::{EnvConfig, EnvMode};
use serde::{Deserialize, Serialize};
use tch::Device;

use crate::error::RacerError;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TrainerSettings {
    pub batch_size: usize,
    pub buffer_size: usize,
    pub learning_rate: f32,
    pub hidden_units: usize,
    pub gamma: f32,
    pub tau: f32,
    pub max_grad_norm: f32,

    pub epsilon_start: f32,
    pub epsilon_end: f32,
    pub epsilon_decay: f32,
    pub warmup_episodes: usize,
    pub train_every_steps: usize,

    // Learning-rate milestones
    pub lr_after_first_finish: f32,
    pub lr_after_finish_rate: f32,
    pub finish_rate_window: usize,
    pub finish_rate_threshold: f32,

    pub milestone_frequency: usize,
    pub summary_freq: usize,
    pub eval_episodes: usize,
    pub finish_count_min_improvement: usize,
    pub time_min_improvement: f64,
    pub score_min_improvement: f64,
    pub eval_finish_bonus: f64,
    pub eval_step_penalty: f64,
    pub eval_wall_penalty: f64,
    pub eval_grass_penalty: f64,

    /// Episodes kept in memory for the statistics CSVs.
    pub stats_history: usize,
    pub max_episodes: Option<usize>,
    pub track_size: usize,
    pub track_checkpoints: usize,
    pub env: EnvConfig,

    pub seed: u64,
    pub output_path: String,
    pub init_path: String,
    pub device: String,
}

impl Default for TrainerSettings {
    fn default() -> Self {
        Self {
            batch_size: 32,
            buffer_size: 50_000,
            learning_rate: 1e-3,
            hidden_units: 64,
            gamma: 0.99,
            tau: 0.005,
            max_grad_norm: 1.0,
            epsilon_start: 1.0,
            epsilon_end: 0.005,
            epsilon_decay: 0.995,
            warmup_episodes: 5,
            train_every_steps: 3,
            lr_after_first_finish: 3e-4,
            lr_after_finish_rate: 1e-4,
            finish_rate_window: 20,
            finish_rate_threshold: 0.5,
            milestone_frequency: 50,
            summary_freq: 10,
            eval_episodes: 20,
            finish_count_min_improvement: 2,
            time_min_improvement: 50.0,
            score_min_improvement: 500.0,
            eval_finish_bonus: 100_000.0,
            eval_step_penalty: 1.0,
            eval_wall_penalty: 200.0,
            eval_grass_penalty: 50.0,
            stats_history: 1000,
            max_episodes: None,
            track_size: 900,
            track_checkpoints: 8,
            env: EnvConfig::default(),
            seed: 12345,
            output_path: "models".to_string(),
            init_path: "".to_string(),
            device: "cpu".to_string(),
        }
    }
}

impl TrainerSettings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RacerError> {
        let content = fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), RacerError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), RacerError> {
        let positive = [
            ("batch_size", self.batch_size),
            ("buffer_size", self.buffer_size),
            ("hidden_units", self.hidden_units),
            ("train_every_steps", self.train_every_steps),
            ("milestone_frequency", self.milestone_frequency),
            ("summary_freq", self.summary_freq),
            ("finish_rate_window", self.finish_rate_window),
            ("track_checkpoints", self.track_checkpoints),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(RacerError::InvalidSettings(format!("{} must be > 0", name)));
            }
        }
        if self.batch_size > self.buffer_size {
            return Err(RacerError::InvalidSettings(format!(
                "batch_size ({}) exceeds buffer_size ({})",
                self.batch_size, self.buffer_size
            )));
        }
        if !(self.tau > 0.0 && self.tau < 1.0) {
            return Err(RacerError::InvalidSettings(format!(
                "tau must be in (0, 1), got {}",
                self.tau
            )));
        }
        if self.epsilon_end > self.epsilon_start {
            return Err(RacerError::InvalidSettings(
                "epsilon_end must not exceed epsilon_start".to_string(),
            ));
        }
        Ok(())
    }

    pub fn device(&self) -> Device {
        match self.device.to_lowercase().as_str() {
            "cuda" => {
                println!("🚀 Using CUDA GPU backend");
                Device::Cuda(0)
            }
            "mps" => {
                println!("🚀 Using Metal GPU backend (MPS)");
                Device::Mps
            }
            _ => Device::Cpu,
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.output_path)
    }

    pub fn training_env(&self) -> EnvConfig {
        self.env.with_mode(EnvMode::Training)
    }

    pub fn evaluation_env(&self) -> EnvConfig {
        self.env.with_mode(EnvMode::Evaluation)
    }
}
