use std::fmt;

// --- Error Type ---
#[derive(Debug, Clone, PartialEq)]
pub enum EnvError {
    ActionOutOfRange { id: usize, count: usize },
    InvalidTrack(String),
    ObservationMismatch { expected: usize, got: usize },
}

impl fmt::Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvError::ActionOutOfRange { id, count } => {
                write!(f, "Action id {} out of range (action count: {})", id, count)
            }
            EnvError::InvalidTrack(msg) => write!(f, "Invalid track: {}", msg),
            EnvError::ObservationMismatch { expected, got } => write!(
                f,
                "Observation length mismatch: expected {}, got {}",
                expected, got
            ),
        }
    }
}

impl std::error::Error for EnvError {}
