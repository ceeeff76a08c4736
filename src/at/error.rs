use thiserror::Error;

use crate::port::truncate_for_log;

/// Failures of the line transport and command/response engine.
#[derive(Debug, Error)]
pub enum AtError {
    /// No terminal or expected line arrived before the deadline. The caller
    /// may retry the whole operation.
    #[error("timed out waiting for response to {}", truncate_for_log(.command))]
    Timeout { command: String },

    /// The modem reported a power-down in the middle of a command.
    #[error("modem powered down unexpectedly")]
    PoweredDown,

    #[error("invalid response pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("serial i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl AtError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AtError::Timeout { .. })
    }
}
