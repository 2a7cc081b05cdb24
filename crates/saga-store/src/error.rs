//! Error types for the saga-store crate.
//!
//! All storage operations return [`StoreError`] via [`StoreResult`].
//! Row-level variants (`MissingPrimaryKey`, `DuplicateKey`, `RowNotFound`) are
//! meant to be matched by callers that treat them as skips rather than
//! failures.

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the storage engine.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    // -- Schema errors ------------------------------------------------------
    /// A table with this name is already registered in the store.
    #[error("table already exists: {table}")]
    TableAlreadyExists { table: String },

    /// The table is not registered in the store.
    #[error("unknown table: {table}")]
    UnknownTable { table: String },

    /// A required domain table was not found in an existing backing file.
    #[error("table `{table}` does not exist in the backing file")]
    MissingTable { table: String },

    /// A column referenced by a row or key is not declared on the table.
    #[error("unknown column `{column}` on table `{table}`")]
    UnknownColumn { table: String, column: String },

    /// The table schema itself is malformed.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    // -- Row errors ---------------------------------------------------------
    /// A strict write omitted one of the table's primary-key columns.
    #[error("missing primary key `{column}` for table `{table}`")]
    MissingPrimaryKey { table: String, column: String },

    /// A row with the same primary key already exists.
    #[error("duplicate key in `{table}`: {key}")]
    DuplicateKey { table: String, key: String },

    /// No row matched the supplied key.
    #[error("row not found in `{table}`: {key}")]
    RowNotFound { table: String, key: String },

    /// A value does not fit the declared column type.
    #[error("type mismatch for `{table}.{column}`: expected {expected}")]
    TypeMismatch {
        table: String,
        column: String,
        expected: &'static str,
    },

    // -- Game memory errors -------------------------------------------------
    /// A turn message used a role that is not part of the session roster.
    #[error("unknown role: {role}")]
    UnknownRole { role: String },

    /// The character holds no inventory entry for the item.
    #[error("item `{item}` not found in inventory of `{character}`")]
    ItemNotFound { character: String, item: String },

    /// An invalid argument was provided to a store operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}
