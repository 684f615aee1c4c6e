//! Error types for SEN66 command construction

use thiserror::Error;

/// Errors raised while building or validating a console command
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Command verb was empty or whitespace
    #[error("empty command")]
    EmptyCommand,

    /// Argument cannot be carried on a single console line
    #[error("invalid argument {arg:?}: {reason}")]
    InvalidArgument { arg: String, reason: &'static str },

    /// Setting key not recognised by the firmware
    #[error("unknown setting: {0}")]
    UnknownSetting(String),

    /// UTC offset outside the range the firmware accepts
    #[error("UTC offset must be between -12 and +14 hours (got {0})")]
    UtcOffsetOutOfRange(i32),
}
