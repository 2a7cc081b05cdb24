//! Engine error types.
//!
//! All engine subsystems surface errors through [`EngineError`]. Storage and
//! pipeline failures are wrapped so callers can still match on them.

use std::path::PathBuf;

/// Unified error type for the game engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // -- LLM errors ----------------------------------------------------------
    /// The model call itself failed.
    #[error("llm request failed: {reason}")]
    LlmRequestFailed { reason: String },

    /// The model answered, but not in the expected shape.
    #[error("llm response parse error: {reason}")]
    LlmParseFailed { reason: String },

    /// A streamed answer could not be started or was interrupted.
    #[error("llm stream error: {reason}")]
    LlmStreamError { reason: String },

    // -- Session errors ------------------------------------------------------
    /// The lore file is missing a required part or is inconsistent.
    #[error("invalid lore: {reason}")]
    InvalidLore { reason: String },

    /// A new session was requested over an existing database.
    #[error("session database already exists: {}", path.display())]
    SessionExists { path: PathBuf },

    /// A saved session was requested but its database is gone.
    #[error("session database not found: {}", path.display())]
    SessionMissing { path: PathBuf },

    /// A name that is not part of the session roster.
    #[error("unknown actor: {name}")]
    UnknownActor { name: String },

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading or writing a session file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // -- Upstream crate errors -----------------------------------------------
    /// An error propagated from the storage crate.
    #[error("store error: {0}")]
    Store(#[from] saga_store::StoreError),

    /// An error propagated from the chat pipeline.
    #[error("chat error: {0}")]
    Chat(#[from] saga_chat::ChatError),
}

impl EngineError {
    pub fn parse(reason: impl ToString) -> Self {
        Self::LlmParseFailed {
            reason: reason.to_string(),
        }
    }
}

/// Convenience alias used throughout the engine crate.
pub type Result<T> = std::result::Result<T, EngineError>;
