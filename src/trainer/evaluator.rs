use std::sync::Arc;

use racing_core::{Circuit, EnvConfig, EnvMode, RaceEnv, Termination};
use serde::{Deserialize, Serialize};

use crate::agent::QPolicy;
use crate::error::RacerError;
use crate::trainer::settings::TrainerSettings;
use crate::trainer::CancellationToken;

/// Weights of the evaluation score:
/// `finish_bonus * finished - step_penalty * steps - wall_penalty * walls - grass_penalty * grass`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalScoring {
    pub finish_bonus: f64,
    pub step_penalty: f64,
    pub wall_penalty: f64,
    pub grass_penalty: f64,
}

impl Default for EvalScoring {
    fn default() -> Self {
        Self {
            finish_bonus: 100_000.0,
            step_penalty: 1.0,
            wall_penalty: 200.0,
            grass_penalty: 50.0,
        }
    }
}

impl EvalScoring {
    pub fn from_settings(settings: &TrainerSettings) -> Self {
        Self {
            finish_bonus: settings.eval_finish_bonus,
            step_penalty: settings.eval_step_penalty,
            wall_penalty: settings.eval_wall_penalty,
            grass_penalty: settings.eval_grass_penalty,
        }
    }

    pub fn score(&self, episode: &EpisodeOutcome) -> f64 {
        let finished = if episode.finished { 1.0 } else { 0.0 };
        self.finish_bonus * finished
            - self.step_penalty * episode.steps as f64
            - self.wall_penalty * episode.wall_hits as f64
            - self.grass_penalty * episode.grass_frames as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpisodeOutcome {
    pub finished: bool,
    pub laps: u32,
    pub steps: usize,
    pub wall_hits: usize,
    pub grass_frames: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalReport {
    pub episodes: usize,
    pub finishes: usize,
    pub finish_rate: f64,
    pub avg_laps: f64,
    /// Mean steps over finished episodes only; `None` when nothing finished.
    pub avg_steps_to_finish: Option<f64>,
    pub avg_steps: f64,
    pub avg_wall_hits: f64,
    pub avg_grass_frames: f64,
    pub avg_score: f64,
}

impl EvalReport {
    pub fn from_outcomes(outcomes: &[EpisodeOutcome], scoring: &EvalScoring) -> Self {
        let episodes = outcomes.len();
        let n = episodes.max(1) as f64;
        let finished: Vec<&EpisodeOutcome> = outcomes.iter().filter(|o| o.finished).collect();
        let avg_steps_to_finish = if finished.is_empty() {
            None
        } else {
            Some(finished.iter().map(|o| o.steps as f64).sum::<f64>() / finished.len() as f64)
        };

        Self {
            episodes,
            finishes: finished.len(),
            finish_rate: finished.len() as f64 / n,
            avg_laps: outcomes.iter().map(|o| o.laps as f64).sum::<f64>() / n,
            avg_steps_to_finish,
            avg_steps: outcomes.iter().map(|o| o.steps as f64).sum::<f64>() / n,
            avg_wall_hits: outcomes.iter().map(|o| o.wall_hits as f64).sum::<f64>() / n,
            avg_grass_frames: outcomes.iter().map(|o| o.grass_frames as f64).sum::<f64>() / n,
            avg_score: outcomes.iter().map(|o| scoring.score(o)).sum::<f64>() / n,
        }
    }

    pub fn print(&self) {
        println!(
            "🏁 Eval: {}/{} finished ({:.0}%) | laps {:.2} | steps {:.0} | to-finish {} | walls {:.1} | grass {:.1} | score {:.1}",
            self.finishes,
            self.episodes,
            self.finish_rate * 100.0,
            self.avg_laps,
            self.avg_steps,
            self.avg_steps_to_finish
                .map(|s| format!("{:.0}", s))
                .unwrap_or_else(|| "-".to_string()),
            self.avg_wall_hits,
            self.avg_grass_frames,
            self.avg_score,
        );
    }
}

/// Runs one greedy episode to termination. `None` when `shutdown` fires
/// between steps.
pub fn run_greedy_episode<P: QPolicy + ?Sized>(
    policy: &P,
    env: &mut RaceEnv,
    shutdown: &CancellationToken,
) -> Result<Option<EpisodeOutcome>, RacerError> {
    let mut obs = env.reset();
    let mut outcome = EpisodeOutcome {
        finished: false,
        laps: 0,
        steps: 0,
        wall_hits: 0,
        grass_frames: 0,
    };

    loop {
        if shutdown.is_cancelled() {
            return Ok(None);
        }
        let action = policy.greedy_action(&obs)?;
        let result = env.step_id(action)?;
        if result.info.wall_hit {
            outcome.wall_hits += 1;
        }
        if result.info.off_track {
            outcome.grass_frames += 1;
        }
        outcome.steps = result.info.steps;
        outcome.laps = result.info.laps_completed;
        obs = result.observation;

        if result.done {
            outcome.finished = result.info.termination == Some(Termination::RaceFinished);
            return Ok(Some(outcome));
        }
    }
}

/// Greedy evaluation: the stuck detector and idle penalty are always off,
/// whatever mode `config` carries. `None` when cancelled before the last
/// episode ends; partial episodes are not scored.
pub fn evaluate<P: QPolicy + ?Sized>(
    policy: &P,
    circuit: Arc<Circuit>,
    config: &EnvConfig,
    episodes: usize,
    scoring: &EvalScoring,
    shutdown: &CancellationToken,
) -> Result<Option<EvalReport>, RacerError> {
    let mut env = RaceEnv::new(circuit, config.with_mode(EnvMode::Evaluation));
    if env.observation_len() != policy.get_obs_dim() {
        return Err(RacerError::DimensionMismatch {
            what: "observation".to_string(),
            expected: vec![policy.get_obs_dim() as i64],
            got: vec![env.observation_len() as i64],
        });
    }

    let mut outcomes = Vec::with_capacity(episodes);
    for _ in 0..episodes {
        match run_greedy_episode(policy, &mut env, shutdown)? {
            Some(outcome) => outcomes.push(outcome),
            None => return Ok(None),
        }
    }
    Ok(Some(EvalReport::from_outcomes(&outcomes, scoring)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use racing_core::OBSERVATION_LEN;
    use std::cell::Cell;

    /// Always brakes; never finishes.
    struct Parked;

    impl QPolicy for Parked {
        fn predict(&self, _obs: &[f32]) -> Result<Vec<f32>, RacerError> {
            Ok(vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0])
        }
        fn get_obs_dim(&self) -> usize {
            OBSERVATION_LEN
        }
        fn get_act_dim(&self) -> usize {
            7
        }
    }

    /// Brakes, and requests shutdown on its `limit`-th decision.
    struct CancelAfter {
        token: CancellationToken,
        calls: Cell<usize>,
        limit: usize,
    }

    impl QPolicy for CancelAfter {
        fn predict(&self, obs: &[f32]) -> Result<Vec<f32>, RacerError> {
            self.calls.set(self.calls.get() + 1);
            if self.calls.get() == self.limit {
                self.token.cancel();
            }
            Parked.predict(obs)
        }
        fn get_obs_dim(&self) -> usize {
            OBSERVATION_LEN
        }
        fn get_act_dim(&self) -> usize {
            7
        }
    }

    fn outcome(finished: bool, steps: usize, walls: usize, grass: usize) -> EpisodeOutcome {
        EpisodeOutcome {
            finished,
            laps: if finished { 3 } else { 1 },
            steps,
            wall_hits: walls,
            grass_frames: grass,
        }
    }

    #[test]
    fn test_score_formula() {
        let scoring = EvalScoring::default();
        assert_eq!(scoring.score(&outcome(true, 1000, 2, 10)), 100_000.0 - 1000.0 - 400.0 - 500.0);
        assert_eq!(scoring.score(&outcome(false, 7500, 0, 0)), -7500.0);
    }

    #[test]
    fn test_report_aggregates() {
        let outcomes = [
            outcome(true, 1000, 0, 0),
            outcome(true, 1200, 2, 0),
            outcome(false, 7500, 4, 30),
        ];
        let report = EvalReport::from_outcomes(&outcomes, &EvalScoring::default());
        assert_eq!(report.episodes, 3);
        assert_eq!(report.finishes, 2);
        assert!((report.finish_rate - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(report.avg_steps_to_finish, Some(1100.0));
        assert!((report.avg_wall_hits - 2.0).abs() < 1e-12);
        assert!((report.avg_laps - 7.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_no_finishes_has_no_time() {
        let report =
            EvalReport::from_outcomes(&[outcome(false, 10, 0, 0)], &EvalScoring::default());
        assert_eq!(report.avg_steps_to_finish, None);
        assert_eq!(report.finish_rate, 0.0);
    }

    #[test]
    fn test_parked_policy_runs_to_step_limit() {
        let circuit = Arc::new(Circuit::ring(900, 8).unwrap());
        let mut config = EnvConfig::default();
        config.max_steps = 300;
        // Training mode on the way in; the stuck detector must still be off.
        let report = evaluate(
            &Parked,
            circuit,
            &config,
            2,
            &EvalScoring::default(),
            &CancellationToken::new(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(report.episodes, 2);
        assert_eq!(report.finishes, 0);
        assert_eq!(report.avg_steps, 300.0);
        assert_eq!(report.avg_score, -300.0);
    }

    #[test]
    fn test_cancellation_stops_between_steps() {
        let circuit = Arc::new(Circuit::ring(900, 8).unwrap());
        let mut config = EnvConfig::default();
        config.max_steps = 300;
        let policy = CancelAfter {
            token: CancellationToken::new(),
            calls: Cell::new(0),
            limit: 25,
        };

        let mut env = RaceEnv::new(circuit.clone(), config.with_mode(EnvMode::Evaluation));
        assert_eq!(run_greedy_episode(&policy, &mut env, &policy.token).unwrap(), None);
        assert_eq!(env.steps(), 25);

        // Already cancelled: nothing is played and no report is produced.
        let scoring = EvalScoring::default();
        let report = evaluate(&policy, circuit, &config, 3, &scoring, &policy.token);
        assert_eq!(report.unwrap(), None);
        assert_eq!(policy.calls.get(), 25);
    }
}
