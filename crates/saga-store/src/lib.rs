//! # saga-store
//!
//! Storage engine for saga.
//!
//! A dynamic-schema record store over a single SQLite file, and the game
//! memory that models one session's inventory, item catalog, turn history,
//! locations and player state on top of it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  GameMemory   (domain tables, roster)   │
//! ├─────────────────────────────────────────┤
//! │  RecordStore  (TableSchema + Row CRUD,  │
//! │                discovery on open)       │
//! ├─────────────────────────────────────────┤
//! │  Database     (rusqlite WAL)            │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use saga_store::{GameMemory, TurnMessage, AI_RESPONSE};
//!
//! let memory = GameMemory::open("games/abc/memory.db", vec!["Aria".into()]).await?;
//! memory
//!     .add_new_turn(&[TurnMessage::new(AI_RESPONSE, "You wake up in a cave.")], None)
//!     .await?;
//! ```

pub mod db;
pub mod error;
pub mod game_memory;
pub mod record;
pub mod schema;
pub mod value;

// ── re-exports ───────────────────────────────────────────────────────

pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use game_memory::{
    AI_RESPONSE, GameMemory, HISTORY_TABLE, HUMAN_PLAYER, HUMAN_RESPONSE, INVENTORY_TABLE,
    ITEMS_TABLE, InventoryItem, ItemDescriptor, LOCATION_TABLE, LocationEntry, PLAYERS_STATE_TABLE,
    PlayerState, TurnMessage, TurnRecord,
};
pub use record::RecordStore;
pub use schema::{Column, ColumnType, ForeignKey, TableSchema};
pub use value::{Row, Value, row};
