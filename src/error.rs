//! Error types for abgate

use crate::experiment::ExperimentStatus;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Experimentation engine error types
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown experiment or variant ID
    #[error("experiment {0} not found")]
    NotFound(String),

    /// Missing or out-of-range configuration field
    #[error("invalid experiment config: {0}")]
    InvalidConfig(String),

    /// Lifecycle transition not permitted from the current status
    #[error("experiment {id} cannot {operation}: status is {status}")]
    InvalidState {
        /// Experiment ID
        id: String,
        /// The rejected operation
        operation: &'static str,
        /// Status the experiment was in when the operation was rejected
        status: ExperimentStatus,
    },

    /// Experiment cannot start without at least one treatment variant
    #[error("experiment {0} has no treatment variants")]
    NoVariants(String),

    /// Experiment cannot start when all variant weights are zero
    #[error("experiment {0} has zero total weight")]
    ZeroWeight(String),
}
