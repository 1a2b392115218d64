pub mod evaluator;
pub mod schedule;
pub mod selection;
pub mod settings;
pub mod stats;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use racing_core::{Action, Circuit, RaceEnv, Termination};
use serde::{Deserialize, Serialize};
use tensorboard_rs::summary_writer::SummaryWriter;

use crate::agent::QPolicy;
use crate::dqn::replay_buffer::{Batch, ReplayBuffer, Transition};
use crate::dqn::{DoubleDqn, DqnConfig};
use crate::error::RacerError;
use crate::trainer::evaluator::{evaluate, EvalReport, EvalScoring};
use crate::trainer::schedule::{EpsilonSchedule, LearningRateSchedule, LrDrop};
use crate::trainer::selection::{ModelSelector, SelectionRecords};
use crate::trainer::settings::TrainerSettings;
use crate::trainer::stats::{EpisodeLog, EpisodeStats};

/// Stored beside every saved model as `<model>.json`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TrainerMetadata {
    pub episode: usize,
    pub total_steps: usize,
    pub train_steps: usize,
    pub epsilon: f64,
    pub learning_rate: f64,
    pub lr_schedule: LearningRateSchedule,
    pub best: SelectionRecords,
    pub last_avg_reward: f32,
}

impl TrainerMetadata {
    pub fn path_for(model_path: &Path) -> PathBuf {
        model_path.with_extension("json")
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RacerError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), RacerError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Cooperative stop request, checked between environment steps.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The episode cap was reached.
    Completed,
    Interrupted,
}

pub struct Trainer {
    pub settings: TrainerSettings,
    pub writer: SummaryWriter,
    pub circuit: Arc<Circuit>,
    pub env: RaceEnv,
    pub agent: DoubleDqn,
    pub buffer: ReplayBuffer,
    pub epsilon: EpsilonSchedule,
    pub lr_schedule: LearningRateSchedule,
    pub log: EpisodeLog,
    pub selector: ModelSelector,
    pub scoring: EvalScoring,
    /// Completed episodes, across resumes.
    pub episode: usize,
    pub total_steps: usize,
    pub shutdown_signal: CancellationToken,
    rng: StdRng,
    started: Instant,
}

impl Trainer {
    pub fn new(
        settings: TrainerSettings,
        shutdown_signal: CancellationToken,
    ) -> Result<Self, RacerError> {
        settings.validate()?;
        tch::manual_seed(settings.seed as i64);

        let circuit = Arc::new(Circuit::ring(settings.track_size, settings.track_checkpoints)?);
        let env = RaceEnv::new(circuit.clone(), settings.training_env());

        let agent = DoubleDqn::new(&DqnConfig {
            obs_dim: env.observation_len(),
            act_dim: Action::COUNT,
            hidden_dim: settings.hidden_units,
            learning_rate: settings.learning_rate as f64,
            gamma: settings.gamma as f64,
            tau: settings.tau as f64,
            max_grad_norm: settings.max_grad_norm as f64,
            device: settings.device(),
        })?;

        let output_dir = settings.output_dir();
        fs::create_dir_all(&output_dir)?;
        settings.save(output_dir.join("settings.json"))?;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let log_dir = output_dir.join("logs").join(format!("run_{}", timestamp));
        let writer = SummaryWriter::new(&log_dir);

        let mut trainer = Self {
            writer,
            circuit,
            env,
            agent,
            buffer: ReplayBuffer::new(settings.buffer_size, settings.seed),
            epsilon: EpsilonSchedule::new(
                settings.epsilon_start as f64,
                settings.epsilon_end as f64,
                settings.epsilon_decay as f64,
            ),
            lr_schedule: LearningRateSchedule::new(
                settings.lr_after_first_finish as f64,
                settings.lr_after_finish_rate as f64,
                settings.finish_rate_window,
                settings.finish_rate_threshold as f64,
            ),
            log: EpisodeLog::new(settings.stats_history, settings.finish_rate_window),
            selector: ModelSelector::from_settings(&settings),
            scoring: EvalScoring::from_settings(&settings),
            episode: 0,
            total_steps: 0,
            shutdown_signal,
            rng: StdRng::seed_from_u64(settings.seed.wrapping_add(1)),
            started: Instant::now(),
            settings,
        };

        if !trainer.settings.init_path.is_empty() {
            let init_path = PathBuf::from(&trainer.settings.init_path);
            trainer.resume(&init_path)?;
        }

        Ok(trainer)
    }

    /// Loads policy weights (target is hard-copied) and, when present, the
    /// metadata saved beside them.
    pub fn resume(&mut self, model_path: &Path) -> Result<(), RacerError> {
        println!("💾 Loading Weights: {}", model_path.display());
        self.agent.load(model_path)?;
        println!("✅ Weights loaded successfully.");

        let meta_path = TrainerMetadata::path_for(model_path);
        if !meta_path.exists() {
            println!("🆕 No metadata beside {}; counters start fresh.", model_path.display());
            return Ok(());
        }
        let meta = TrainerMetadata::load(&meta_path)?;
        println!(
            "📊 Resuming from episode {} (ε {:.3}, LR {:.1e})",
            meta.episode, meta.epsilon, meta.learning_rate
        );
        self.episode = meta.episode;
        self.total_steps = meta.total_steps;
        self.agent.train_count = meta.train_steps;
        self.epsilon.set_value(meta.epsilon);
        self.agent.set_learning_rate(meta.learning_rate);
        self.lr_schedule.dropped_on_first_finish = meta.lr_schedule.dropped_on_first_finish;
        self.lr_schedule.dropped_on_finish_rate = meta.lr_schedule.dropped_on_finish_rate;
        self.selector.restore(&meta.best);
        Ok(())
    }

    fn metadata(&self) -> TrainerMetadata {
        TrainerMetadata {
            episode: self.episode,
            total_steps: self.total_steps,
            train_steps: self.agent.train_count,
            epsilon: self.epsilon.value(),
            learning_rate: self.agent.get_learning_rate(),
            lr_schedule: self.lr_schedule.clone(),
            best: self.selector.records(),
            last_avg_reward: self.log.recent_mean_reward(self.settings.summary_freq),
        }
    }

    /// Saves the policy network and its metadata under the output directory.
    pub fn save_model(&self, file_name: &str) -> Result<PathBuf, RacerError> {
        let path = self.settings.output_dir().join(file_name);
        self.agent.save(&path)?;
        self.metadata().save(TrainerMetadata::path_for(&path))?;
        Ok(path)
    }

    pub fn run(&mut self) -> Result<RunOutcome, RacerError> {
        println!("🚀 Racing DQN trainer started.");
        if self.episode > 0 {
            println!("🔄 Mode: RESUME from episode {}", self.episode);
        } else {
            println!("🆕 Mode: FRESH START");
        }
        println!(
            "📡 Observation {} | actions {} | milestone every {} episodes",
            self.agent.get_obs_dim(),
            self.agent.get_act_dim(),
            self.settings.milestone_frequency
        );
        self.started = Instant::now();

        let outcome = loop {
            if let Some(max) = self.settings.max_episodes {
                if self.episode >= max {
                    println!("🏁 Episode cap of {} reached.", max);
                    break RunOutcome::Completed;
                }
            }
            if self.shutdown_signal.is_cancelled() {
                break RunOutcome::Interrupted;
            }

            match self.run_episode()? {
                Some(stats) => self.finish_episode(stats)?,
                // The partial episode is discarded, not logged.
                None => break RunOutcome::Interrupted,
            }
        };

        if outcome == RunOutcome::Interrupted {
            println!("🛑 Shutdown signal received. Stopping trainer loop.");
        }
        let path = self.save_model("model_final.ot")?;
        println!("💾 Final model saved: {}", path.display());
        self.writer.flush();
        Ok(outcome)
    }

    /// Plays one epsilon-greedy episode, storing every transition and training
    /// on the configured cadence. `None` when cancelled mid-episode.
    fn run_episode(&mut self) -> Result<Option<EpisodeStats>, RacerError> {
        let episode = self.episode + 1;
        let mut obs = self.env.reset();
        let mut episode_reward = 0.0f32;
        let mut total_loss = 0.0f32;
        let mut loss_count = 0usize;

        loop {
            if self.shutdown_signal.is_cancelled() {
                return Ok(None);
            }

            let action = if self.rng.gen::<f64>() < self.epsilon.value() {
                self.rng.gen_range(0..Action::COUNT)
            } else {
                self.agent.greedy_action(&obs)?
            };

            let result = self.env.step_id(action)?;
            episode_reward += result.reward;
            self.total_steps += 1;

            self.buffer.push(Transition {
                obs: std::mem::take(&mut obs),
                action,
                reward: result.reward,
                next_obs: result.observation.clone(),
                done: result.done,
            });

            if episode > self.settings.warmup_episodes
                && self.buffer.can_sample(self.settings.batch_size)
                && result.info.steps % self.settings.train_every_steps == 0
            {
                let batch = {
                    let sample = self.buffer.sample(self.settings.batch_size);
                    Batch::from_transitions(&sample, self.agent.obs_dim, self.agent.device)?
                };
                total_loss += self.agent.train(&batch)?;
                loss_count += 1;
            }

            obs = result.observation;
            if result.done {
                return Ok(Some(EpisodeStats {
                    episode,
                    reward: episode_reward,
                    length: result.info.steps,
                    mean_loss: if loss_count > 0 { total_loss / loss_count as f32 } else { 0.0 },
                    laps_completed: result.info.laps_completed,
                    finished: result.info.termination == Some(Termination::RaceFinished),
                }));
            }
        }
    }

    fn finish_episode(&mut self, stats: EpisodeStats) -> Result<(), RacerError> {
        self.episode = stats.episode;
        self.epsilon.step();
        let step = self.episode;

        self.writer.add_scalar("Episode/Reward", stats.reward, step);
        self.writer.add_scalar("Episode/Length", stats.length as f32, step);
        self.writer.add_scalar("Episode/Laps", stats.laps_completed as f32, step);
        self.writer.add_scalar("Loss/TD", stats.mean_loss, step);
        self.writer.add_scalar("Policy/Epsilon", self.epsilon.value() as f32, step);
        self.writer.add_scalar("Policy/LearningRate", self.agent.get_learning_rate() as f32, step);

        self.log.push(stats.clone());

        let current_lr = self.agent.get_learning_rate();
        if let Some(drop) = self.lr_schedule.observe(self.log.recent_finishes(), current_lr) {
            self.agent.set_learning_rate(drop.lr());
            match drop {
                LrDrop::FirstFinish(lr) => {
                    println!("📉 First finish detected. Lowering LR to {:.1e}", lr)
                }
                LrDrop::FinishRate { rate, lr } => println!(
                    "📉 Finish rate (last {}) = {:.2}. Lowering LR to {:.1e}",
                    self.lr_schedule.window, rate, lr
                ),
            }
        }

        if self.episode % self.settings.summary_freq == 0 {
            println!(
                "Episode: {} | Reward: {:.2} | Avg({}): {:.2} | Laps: {} | ε: {:.3} | Steps: {} | LR: {:.1e} | Time: {}s",
                self.episode,
                stats.reward,
                self.settings.summary_freq,
                self.log.recent_mean_reward(self.settings.summary_freq),
                stats.laps_completed,
                self.epsilon.value(),
                stats.length,
                self.agent.get_learning_rate(),
                self.started.elapsed().as_secs()
            );
        }

        if self.episode % self.settings.milestone_frequency == 0 {
            self.milestone()?;
        }
        Ok(())
    }

    /// Persists model and statistics, runs greedy evaluation, then offers the
    /// report to each selection rule. `None` when shutdown interrupts the
    /// evaluation; the selection records are then left alone.
    pub fn milestone(&mut self) -> Result<Option<EvalReport>, RacerError> {
        let episode = self.episode;
        let model_path = self.save_model(&format!("model_episode_{}.ot", episode))?;

        let stats_path = self
            .settings
            .output_dir()
            .join(format!("training_stats_{}.csv", episode));
        self.log
            .write_window_csv(&stats_path, episode, self.settings.milestone_frequency)?;

        let report = evaluate(
            &self.agent,
            self.circuit.clone(),
            &self.settings.evaluation_env(),
            self.settings.eval_episodes,
            &self.scoring,
            &self.shutdown_signal,
        )?;

        println!();
        println!("🏁 Milestone {} saved!", episode);
        println!("  Model: {}", model_path.display());
        println!("  Stats: {}", stats_path.display());
        let report = match report {
            Some(report) => report,
            None => {
                println!("🛑 Evaluation interrupted; best models unchanged.");
                return Ok(None);
            }
        };
        report.print();

        self.writer.add_scalar("Eval/FinishRate", report.finish_rate as f32, episode);
        self.writer.add_scalar("Eval/Score", report.avg_score as f32, episode);
        self.writer.add_scalar("Eval/Laps", report.avg_laps as f32, episode);
        if let Some(steps) = report.avg_steps_to_finish {
            self.writer.add_scalar("Eval/StepsToFinish", steps as f32, episode);
        }

        for accepted in self.selector.update(&report, episode) {
            let path = self.save_model(accepted.file_name)?;
            println!(
                "★ New best {}: {} -> {}",
                accepted.rule,
                accepted.record,
                path.display()
            );
        }
        println!();
        self.writer.flush();
        Ok(Some(report))
    }
}
