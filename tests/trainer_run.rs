use std::path::Path;

use racing_core::{Action, OBSERVATION_LEN};
use racing_orchestrator::trainer::stats::read_stats_csv;
use racing_orchestrator::{
    CancellationToken, DoubleDqn, DqnConfig, RacerError, RunOutcome, Trainer, TrainerMetadata,
    TrainerSettings,
};

fn small_settings(output: &Path) -> TrainerSettings {
    let mut settings = TrainerSettings {
        batch_size: 8,
        buffer_size: 200,
        hidden_units: 16,
        warmup_episodes: 0,
        milestone_frequency: 1,
        summary_freq: 1,
        eval_episodes: 1,
        max_episodes: Some(2),
        output_path: output.to_string_lossy().into_owned(),
        ..Default::default()
    };
    settings.env.max_steps = 40;
    settings
}

#[test]
fn test_short_run_writes_milestones_and_best_models() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path();
    let mut trainer = Trainer::new(small_settings(out), CancellationToken::new()).unwrap();

    assert_eq!(trainer.run().unwrap(), RunOutcome::Completed);
    assert_eq!(trainer.episode, 2);
    assert!(trainer.agent.train_count > 0);

    for name in [
        "settings.json",
        "model_episode_1.ot",
        "model_episode_1.json",
        "model_episode_2.ot",
        "training_stats_1.csv",
        "training_stats_2.csv",
        "best_finish_rate.ot",
        "best_score.ot",
        "model_final.ot",
        "model_final.json",
    ] {
        assert!(out.join(name).exists(), "missing {}", name);
    }
    // Forty steps cannot finish a race, so no time record exists.
    assert!(!out.join("best_time.ot").exists());

    let rows = read_stats_csv(out.join("training_stats_2.csv")).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].episode, 2);
    assert_eq!(rows[0].length, 40);
    assert!(!rows[0].finished);

    let meta = TrainerMetadata::load(out.join("model_final.json")).unwrap();
    assert_eq!(meta.episode, 2);
    assert!(meta.best.finish_rate.is_some());
    assert!(meta.best.time.is_none());
    assert!((meta.epsilon - 0.995f64.powi(2)).abs() < 1e-6);
}

#[test]
fn test_resume_restores_counters() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path();
    Trainer::new(small_settings(out), CancellationToken::new())
        .unwrap()
        .run()
        .unwrap();

    let mut settings = small_settings(out);
    settings.init_path = out.join("model_final.ot").to_string_lossy().into_owned();
    settings.max_episodes = Some(3);
    let mut resumed = Trainer::new(settings, CancellationToken::new()).unwrap();
    assert_eq!(resumed.episode, 2);
    assert!((resumed.epsilon.value() - 0.995f64.powi(2)).abs() < 1e-6);
    assert!(resumed.selector.finish_rate.record.is_some());

    assert_eq!(resumed.run().unwrap(), RunOutcome::Completed);
    assert_eq!(resumed.episode, 3);
    assert!(out.join("model_episode_3.ot").exists());
}

#[test]
fn test_cancelled_run_saves_final_model_only() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path();
    let token = CancellationToken::new();
    let mut trainer = Trainer::new(small_settings(out), token.clone()).unwrap();
    token.cancel();

    assert_eq!(trainer.run().unwrap(), RunOutcome::Interrupted);
    assert_eq!(trainer.episode, 0);
    assert!(out.join("model_final.ot").exists());
    assert!(!out.join("training_stats_1.csv").exists());
}

#[test]
fn test_warmup_episodes_never_train() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = small_settings(dir.path());
    settings.warmup_episodes = 1;
    settings.max_episodes = Some(1);
    let mut trainer = Trainer::new(settings, CancellationToken::new()).unwrap();

    assert_eq!(trainer.run().unwrap(), RunOutcome::Completed);
    assert_eq!(trainer.total_steps, 40);
    assert_eq!(trainer.agent.train_count, 0);
}

#[test]
fn test_training_cadence_counts_gradient_steps() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = small_settings(dir.path());
    settings.train_every_steps = 3;
    settings.max_episodes = Some(1);
    let mut trainer = Trainer::new(settings, CancellationToken::new()).unwrap();
    trainer.run().unwrap();
    // Episode 1 needs 8 stored transitions first: steps 9, 12, ..., 39.
    assert_eq!(trainer.agent.train_count, 11);

    let mut settings = small_settings(dir.path());
    settings.train_every_steps = 3;
    settings.max_episodes = Some(2);
    let mut trainer = Trainer::new(settings, CancellationToken::new()).unwrap();
    trainer.run().unwrap();
    // Episode 2 starts with a full batch available: steps 3, 6, ..., 39.
    assert_eq!(trainer.agent.train_count, 11 + 13);
}

#[test]
fn test_training_starts_after_warmup() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = small_settings(dir.path());
    settings.warmup_episodes = 1;
    settings.train_every_steps = 3;
    let mut trainer = Trainer::new(settings, CancellationToken::new()).unwrap();

    trainer.run().unwrap();
    assert_eq!(trainer.episode, 2);
    assert_eq!(trainer.agent.train_count, 13);
}

#[test]
fn test_resume_rejects_model_with_other_observation_size() {
    let dir = tempfile::tempdir().unwrap();
    let model = dir.path().join("foreign.ot");
    let settings = small_settings(dir.path());
    DoubleDqn::new(&DqnConfig {
        obs_dim: OBSERVATION_LEN + 1,
        act_dim: Action::COUNT,
        hidden_dim: settings.hidden_units,
        learning_rate: 1e-3,
        gamma: 0.99,
        tau: 0.005,
        max_grad_norm: 1.0,
        device: tch::Device::Cpu,
    })
    .unwrap()
    .save(&model)
    .unwrap();

    let mut settings = settings;
    settings.init_path = model.to_string_lossy().into_owned();
    let err = Trainer::new(settings, CancellationToken::new()).err().unwrap();
    assert!(matches!(err, RacerError::DimensionMismatch { .. }), "got {}", err);
}

#[test]
fn test_cancelled_milestone_skips_evaluation() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path();
    let token = CancellationToken::new();
    let mut trainer = Trainer::new(small_settings(out), token.clone()).unwrap();
    trainer.episode = 1;
    token.cancel();

    assert_eq!(trainer.milestone().unwrap(), None);
    assert!(out.join("model_episode_1.ot").exists());
    assert!(out.join("training_stats_1.csv").exists());
    assert!(!out.join("best_finish_rate.ot").exists());
    assert!(!out.join("best_score.ot").exists());
    assert!(trainer.selector.records().finish_rate.is_none());
}
