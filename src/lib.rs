pub mod agent;
pub mod dqn;
pub mod error;
pub mod trainer;

pub use agent::{argmax, QPolicy};
pub use dqn::replay_buffer::{Batch, ReplayBuffer, Transition};
pub use dqn::{DoubleDqn, DqnConfig};
pub use error::RacerError;
pub use trainer::evaluator::{evaluate, EvalReport, EvalScoring};
pub use trainer::selection::ModelSelector;
pub use trainer::settings::TrainerSettings;
pub use trainer::{CancellationToken, RunOutcome, Trainer, TrainerMetadata};
