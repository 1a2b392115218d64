use std::fmt;
use std::io;

use racing_core::EnvError;

// --- Error Type ---
#[derive(Debug)]
pub enum RacerError {
    Io(io::Error),
    Tch(tch::TchError),
    Json(serde_json::Error),
    Env(EnvError),
    /// Saved or requested network shape does not match the live one.
    DimensionMismatch { what: String, expected: Vec<i64>, got: Vec<i64> },
    NonFiniteLoss { train_step: usize, loss: f32 },
    InvalidSettings(String),
    StatsParse { line: usize, msg: String },
}

impl From<io::Error> for RacerError {
    fn from(err: io::Error) -> Self {
        RacerError::Io(err)
    }
}

impl From<tch::TchError> for RacerError {
    fn from(err: tch::TchError) -> Self {
        RacerError::Tch(err)
    }
}

impl From<serde_json::Error> for RacerError {
    fn from(err: serde_json::Error) -> Self {
        RacerError::Json(err)
    }
}

impl From<EnvError> for RacerError {
    fn from(err: EnvError) -> Self {
        RacerError::Env(err)
    }
}

impl fmt::Display for RacerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RacerError::Io(err) => write!(f, "IO error: {}", err),
            RacerError::Tch(err) => write!(f, "Tensor error: {}", err),
            RacerError::Json(err) => write!(f, "JSON error: {}", err),
            RacerError::Env(err) => write!(f, "Environment error: {}", err),
            RacerError::DimensionMismatch { what, expected, got } => {
                write!(f, "Dimension mismatch for {}: expected {:?}, got {:?}", what, expected, got)
            }
            RacerError::NonFiniteLoss { train_step, loss } => {
                write!(f, "Non-finite loss {} at train step {}", loss, train_step)
            }
            RacerError::InvalidSettings(msg) => write!(f, "Invalid settings: {}", msg),
            RacerError::StatsParse { line, msg } => {
                write!(f, "Stats parse error at line {}: {}", line, msg)
            }
        }
    }
}

impl std::error::Error for RacerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RacerError::Io(err) => Some(err),
            RacerError::Tch(err) => Some(err),
            RacerError::Json(err) => Some(err),
            RacerError::Env(err) => Some(err),
            _ => None,
        }
    }
}
