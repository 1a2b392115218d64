use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use racing_core::{Action, Circuit, RaceEnv};
use racing_orchestrator::trainer::stats::{read_stats_csv, StatsSummary};
use racing_orchestrator::{
    evaluate, CancellationToken, DoubleDqn, DqnConfig, EvalScoring, RacerError, RunOutcome,
    Trainer, TrainerSettings,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Double-DQN trainer for a single-car racing circuit",
    long_about = None
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a policy, saving milestones and best models
    Train {
        /// Settings JSON; defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Episodes between checkpoint/evaluation cycles
        #[arg(short, long)]
        milestone_frequency: Option<usize>,

        /// Model (.ot) to resume from
        #[arg(short, long)]
        resume: Option<PathBuf>,

        /// Output directory for models, stats and logs
        #[arg(short, long)]
        output: Option<String>,

        /// Stop after this many episodes
        #[arg(long)]
        max_episodes: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,

        /// cpu, cuda or mps
        #[arg(long)]
        device: Option<String>,
    },
    /// Greedy evaluation of a saved model
    Evaluate {
        model: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of greedy episodes
        #[arg(short, long, default_value_t = 20)]
        episodes: usize,
    },
    /// Summarise a training_stats CSV and write `<stem>_summary.txt` beside it
    Analyze {
        stats: PathBuf,

        /// Laps that make up a full race
        #[arg(long, default_value_t = 3)]
        race_laps: u32,
    },
}

fn load_settings(config: Option<&PathBuf>) -> Result<TrainerSettings, RacerError> {
    match config {
        Some(path) => TrainerSettings::load(path),
        None => Ok(TrainerSettings::default()),
    }
}

fn shutdown_on_ctrlc() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let handler_token = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        eprintln!("⚠️ Could not install Ctrl-C handler: {}", e);
    }
    shutdown
}

fn train(
    config: Option<PathBuf>,
    milestone_frequency: Option<usize>,
    resume: Option<PathBuf>,
    output: Option<String>,
    max_episodes: Option<usize>,
    seed: Option<u64>,
    device: Option<String>,
) -> Result<RunOutcome, RacerError> {
    let mut settings = load_settings(config.as_ref())?;
    if let Some(freq) = milestone_frequency {
        settings.milestone_frequency = freq;
    }
    if let Some(path) = resume {
        settings.init_path = path.to_string_lossy().into_owned();
    }
    if let Some(output) = output {
        settings.output_path = output;
    }
    if max_episodes.is_some() {
        settings.max_episodes = max_episodes;
    }
    if let Some(seed) = seed {
        settings.seed = seed;
    }
    if let Some(device) = device {
        settings.device = device;
    }

    let mut trainer = Trainer::new(settings, shutdown_on_ctrlc())?;
    trainer.run()
}

fn evaluate_model(
    model: PathBuf,
    config: Option<PathBuf>,
    episodes: usize,
) -> Result<(), RacerError> {
    let settings = load_settings(config.as_ref())?;
    let circuit = Arc::new(Circuit::ring(settings.track_size, settings.track_checkpoints)?);
    let obs_dim = RaceEnv::new(circuit.clone(), settings.evaluation_env()).observation_len();

    let mut agent = DoubleDqn::new(&DqnConfig {
        obs_dim,
        act_dim: Action::COUNT,
        hidden_dim: settings.hidden_units,
        learning_rate: settings.learning_rate as f64,
        gamma: settings.gamma as f64,
        tau: settings.tau as f64,
        max_grad_norm: settings.max_grad_norm as f64,
        device: settings.device(),
    })?;
    agent.load(&model)?;
    println!("✅ Loaded {}", model.display());

    let report = evaluate(
        &agent,
        circuit,
        &settings.evaluation_env(),
        episodes,
        &EvalScoring::from_settings(&settings),
        &shutdown_on_ctrlc(),
    )?;
    match report {
        Some(report) => report.print(),
        None => println!("🛑 Evaluation interrupted."),
    }
    Ok(())
}

fn analyze(stats: PathBuf, race_laps: u32) -> Result<(), RacerError> {
    let rows = read_stats_csv(&stats)?;
    println!("📊 Loaded {} episodes from {}", rows.len(), stats.display());
    let summary = match StatsSummary::from_stats(&rows) {
        Some(summary) => summary,
        None => {
            println!("⚠️ {} holds no episodes", stats.display());
            return Ok(());
        }
    };
    summary.print(race_laps);
    let path = summary.write_summary_file(&stats)?;
    println!("\n📝 Summary saved to: {}", path.display());
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let result = match args.command {
        Command::Train {
            config,
            milestone_frequency,
            resume,
            output,
            max_episodes,
            seed,
            device,
        } => {
            println!("--- Hardware Diagnostics ---");
            println!("  CUDA Available: {}", tch::Cuda::is_available());
            println!("  MPS Available:  {}", tch::utils::has_mps());
            println!("----------------------------");
            train(config, milestone_frequency, resume, output, max_episodes, seed, device).map(
                |outcome| match outcome {
                    RunOutcome::Completed => println!("✅ Training complete."),
                    RunOutcome::Interrupted => {
                        println!("🛑 Training interrupted; final model saved.")
                    }
                },
            )
        }
        Command::Evaluate {
            model,
            config,
            episodes,
        } => evaluate_model(model, config, episodes),
        Command::Analyze { stats, race_laps } => analyze(stats, race_laps),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {}", e);
            ExitCode::FAILURE
        }
    }
}
