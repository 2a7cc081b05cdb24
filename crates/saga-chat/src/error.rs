//! Chat pipeline error types.
//!
//! All pipeline subsystems surface errors through [`ChatError`].

use thiserror::Error;

use crate::hooks::HookStack;

/// Unified error type for the chat pipeline.
#[derive(Error, Debug)]
pub enum ChatError {
    /// A hook stack name did not match any known stack.
    #[error("unknown hook stack: {0}")]
    UnknownStack(String),

    /// The hook kind cannot be registered under this stack/command.
    #[error("a {kind} hook cannot be registered as `{command}` on the {stack} stack")]
    HookKindMismatch {
        stack: HookStack,
        command: String,
        kind: &'static str,
    },

    /// A hook handler reported a failure.
    #[error("hook `{command}` failed: {reason}")]
    Hook { command: String, reason: String },

    /// Producing a streamed response failed.
    #[error("streaming failed: {0}")]
    Streaming(String),

    /// Input processing never reported a terminal status.
    #[error("input processing did not finish after {0} steps")]
    InputSteps(usize),

    /// An I/O operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The streaming worker panicked or was cancelled.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl ChatError {
    /// Shorthand for a [`ChatError::Hook`] failure.
    pub fn hook(command: impl Into<String>, reason: impl ToString) -> Self {
        Self::Hook {
            command: command.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for ChatError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}

/// Convenience alias used throughout the chat crate.
pub type Result<T> = std::result::Result<T, ChatError>;
