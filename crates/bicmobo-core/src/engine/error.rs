use thiserror::Error;

use super::optimizer::OptimizerError;
use super::space::ParameterRangeError;
use crate::core::config::ConfigError;
use crate::core::io::ledger::LedgerError;
use std::time::Duration;

/// Fatal end of an optimization run. Carries the diagnostics of the most recent failed
/// trials so the caller can show what went wrong.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RunAbortedError {
    #[error("{count} consecutive trial failures reached the threshold of {threshold}")]
    ConsecutiveFailures {
        count: usize,
        threshold: usize,
        recent: Vec<String>,
    },

    #[error("Global run timeout of {after:?} expired")]
    GlobalTimeout { after: Duration, recent: Vec<String> },

    #[error("Run interrupted")]
    Interrupted { recent: Vec<String> },
}

impl RunAbortedError {
    pub fn diagnostics(&self) -> &[String] {
        match self {
            RunAbortedError::ConsecutiveFailures { recent, .. }
            | RunAbortedError::GlobalTimeout { recent, .. }
            | RunAbortedError::Interrupted { recent } => recent,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Optimizer proposed an invalid point: {source}")]
    ParameterRange {
        #[from]
        source: ParameterRangeError,
    },

    #[error("Run aborted: {source}")]
    RunAborted {
        #[from]
        source: RunAbortedError,
    },

    #[error("Failed to record trial state: {source}")]
    Ledger {
        #[from]
        source: LedgerError,
    },

    #[error("Optimizer failure: {source}")]
    Optimizer {
        #[from]
        source: OptimizerError,
    },

    #[error("Internal logic error: {0}")]
    Internal(String),
}
