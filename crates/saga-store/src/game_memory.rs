//! Game memory: the fixed domain schema of one game session.
//!
//! | Table              | Primary key         | Contents                          |
//! |--------------------|---------------------|-----------------------------------|
//! | `items`            | `name`              | item catalog (descriptors)        |
//! | `inventory`        | `character, item`   | who holds how many of what        |
//! | `history`          | `turn`              | narration, human and actor lines  |
//! | `location_history` | `turn, player`      | where each actor is, per turn     |
//! | `players_state`    | `player`            | alive / mental / physical state   |
//!
//! The `history` table carries one text column per roster actor. The roster
//! is fixed when the memory is opened; turn messages for any other role are
//! rejected.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{StoreError, StoreResult};
use crate::record::RecordStore;
use crate::schema::{ColumnType, TableSchema};
use crate::value::{Row, Value, row};

/// Inventory owner name used for the human player.
pub const HUMAN_PLAYER: &str = "human";

pub const ITEMS_TABLE: &str = "items";
pub const INVENTORY_TABLE: &str = "inventory";
pub const HISTORY_TABLE: &str = "history";
pub const LOCATION_TABLE: &str = "location_history";
pub const PLAYERS_STATE_TABLE: &str = "players_state";

/// Turn role carrying the narration that opens a turn.
pub const AI_RESPONSE: &str = "ai_response";
/// Turn role carrying the human player's action.
pub const HUMAN_RESPONSE: &str = "human_response";

const TURN: &str = "turn";

// ═══════════════════════════════════════════════════════════════════════
//  Domain types
// ═══════════════════════════════════════════════════════════════════════

/// One `{role, message}` entry of a turn write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnMessage {
    pub role: String,
    pub message: String,
}

impl TurnMessage {
    pub fn new(role: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            message: message.into(),
        }
    }
}

/// Catalog entry describing an item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDescriptor {
    pub name: String,
    #[serde(rename = "type", default)]
    pub item_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub strength: String,
}

impl ItemDescriptor {
    /// A descriptor with every field but the name left blank.
    pub fn blank(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    fn to_row(&self, name: &str) -> Row {
        row([
            ("name", Value::from(name)),
            ("type", Value::from(self.item_type.as_str())),
            ("description", Value::from(self.description.as_str())),
            ("action", Value::from(self.action.as_str())),
            ("strength", Value::from(self.strength.as_str())),
        ])
    }

    fn from_row(r: &Row) -> Self {
        Self {
            name: text(r, "name"),
            item_type: text(r, "type"),
            description: text(r, "description"),
            action: text(r, "action"),
            strength: text(r, "strength"),
        }
    }
}

/// An inventory entry joined with its catalog descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    #[serde(flatten)]
    pub item: ItemDescriptor,
    pub count: i64,
}

/// One row of the `history` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn: i64,
    pub ai_response: String,
    pub human_response: String,
    /// Actor name → that actor's line for the turn (empty if none yet).
    pub actors: BTreeMap<String, String>,
}

impl TurnRecord {
    /// Message of any role: `ai_response`, `human_response` or an actor.
    pub fn message(&self, role: &str) -> Option<&str> {
        match role {
            AI_RESPONSE => Some(&self.ai_response),
            HUMAN_RESPONSE => Some(&self.human_response),
            actor => self.actors.get(actor).map(String::as_str),
        }
    }
}

/// Current condition of one actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerState {
    pub player: String,
    pub alive: bool,
    pub mental: String,
    pub physical: String,
}

/// Where an actor is (or intends to be) at a given turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationEntry {
    pub turn: i64,
    pub player: String,
    pub kingdom: String,
    pub town: String,
    pub extra: String,
    pub status: String,
}

// ═══════════════════════════════════════════════════════════════════════
//  GameMemory
// ═══════════════════════════════════════════════════════════════════════

/// Domain memory of one game session on top of a [`RecordStore`].
pub struct GameMemory {
    store: RecordStore,
    roster: Vec<String>,
    /// Next turn number for `add_new_turn(.., None)`; `-1` until first derived.
    next_turn: AtomicI64,
}

impl std::fmt::Debug for GameMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameMemory")
            .field("path", &self.store.database().path())
            .field("roster", &self.roster)
            .field("next_turn", &self.next_turn.load(Ordering::SeqCst))
            .finish()
    }
}

impl GameMemory {
    /// Open (or create) the session file at `path`, creating any missing
    /// domain tables.
    pub async fn open(path: impl AsRef<Path>, roster: Vec<String>) -> StoreResult<Self> {
        let store = RecordStore::open(path).await?;
        Self::from_store(store, roster, false).await
    }

    /// Open a saved session. Every domain table must already exist.
    pub async fn open_existing(path: impl AsRef<Path>, roster: Vec<String>) -> StoreResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StoreError::InvalidArgument(format!(
                "no session file at {}",
                path.display()
            )));
        }
        let store = RecordStore::open(path).await?;
        Self::from_store(store, roster, true).await
    }

    /// Fresh in-memory session.
    pub async fn open_in_memory(roster: Vec<String>) -> StoreResult<Self> {
        Self::from_store(RecordStore::open_in_memory()?, roster, false).await
    }

    /// Build the domain layer over an existing store.
    ///
    /// With `require_existing`, missing domain tables are an error instead of
    /// being created.
    pub async fn from_store(
        store: RecordStore,
        roster: Vec<String>,
        require_existing: bool,
    ) -> StoreResult<Self> {
        let roster = check_roster(roster)?;

        for schema in domain_schemas(&roster) {
            if store.has_table(&schema.name) {
                continue;
            }
            if require_existing {
                return Err(StoreError::MissingTable { table: schema.name });
            }
            store.create_table(schema).await?;
        }

        let history = store.schema(HISTORY_TABLE)?;
        if let Some(actor) = roster.iter().find(|a| !history.has_column(a)) {
            return Err(StoreError::InvalidSchema(format!(
                "history table has no column for actor `{actor}`"
            )));
        }

        info!(actors = roster.len(), "game memory ready");
        Ok(Self {
            store,
            roster,
            next_turn: AtomicI64::new(-1),
        })
    }

    /// Actor names whose lines are tracked per turn.
    pub fn roster(&self) -> &[String] {
        &self.roster
    }

    /// The underlying record store.
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    // ── inventory ────────────────────────────────────────────────────

    /// Give `character` the listed items.
    ///
    /// Catalog rows are inserted from `items_lut`, skipping items that are
    /// already described. Inventory entries are inserted, or their count
    /// overwritten when the character already holds the item.
    #[instrument(skip(self, items, items_lut), fields(items = items.len()))]
    pub async fn add_inventory_items(
        &self,
        character: &str,
        items: &BTreeMap<String, i64>,
        items_lut: &BTreeMap<String, ItemDescriptor>,
    ) -> StoreResult<()> {
        for (name, count) in items {
            match items_lut.get(name) {
                Some(descriptor) => {
                    match self.store.add_row(ITEMS_TABLE, descriptor.to_row(name), true).await {
                        Ok(()) => debug!(item = %name, "item described"),
                        Err(StoreError::DuplicateKey { .. }) => {
                            debug!(item = %name, "item already in catalog, skipping")
                        }
                        Err(e) => return Err(e),
                    }
                }
                None => warn!(item = %name, "no descriptor for item, catalog entry left absent"),
            }

            let entry = row([
                ("character", Value::from(character)),
                ("item", Value::from(name.as_str())),
                ("count", Value::from(*count)),
            ]);
            self.upsert(INVENTORY_TABLE, entry).await?;
        }
        Ok(())
    }

    /// Apply a signed delta to an existing inventory entry.
    ///
    /// Returns the new count, or `None` when `character` holds no entry for
    /// `item`. Entries are never created here. Counts may go negative; that
    /// is logged as a warning.
    #[instrument(skip(self))]
    pub async fn update_inventory_item(
        &self,
        item: &str,
        count_change: i64,
        character: &str,
    ) -> StoreResult<Option<i64>> {
        let key = inventory_key(character, item);
        let rows = self
            .store
            .query_rows_by_keys(INVENTORY_TABLE, std::slice::from_ref(&key))
            .await?;
        let Some(current) = rows.first() else {
            let err = StoreError::ItemNotFound {
                character: character.to_string(),
                item: item.to_string(),
            };
            warn!(error = %err, "inventory update skipped");
            return Ok(None);
        };

        let count = current.get("count").and_then(Value::as_i64).unwrap_or(0) + count_change;
        if count < 0 {
            warn!(count, "inventory count went negative");
        }

        let mut updated = key;
        updated.insert("count".into(), Value::from(count));
        self.store.update_row(INVENTORY_TABLE, updated, true).await?;
        debug!(count, "inventory updated");
        Ok(Some(count))
    }

    /// Items held by `character` with a positive count, with descriptors.
    ///
    /// Entries whose item has no catalog row are left out.
    #[instrument(skip(self))]
    pub async fn get_inventory_items(&self, character: &str) -> StoreResult<Vec<InventoryItem>> {
        let entries: Vec<(String, i64)> = self
            .store
            .query_rows_by_keys(
                INVENTORY_TABLE,
                &[row([("character", Value::from(character))])],
            )
            .await?
            .iter()
            .map(|r| (text(r, "item"), r.get("count").and_then(Value::as_i64).unwrap_or(0)))
            .filter(|(_, count)| *count > 0)
            .collect();
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<Row> = entries
            .iter()
            .map(|(name, _)| row([("name", Value::from(name.as_str()))]))
            .collect();
        let catalog: BTreeMap<String, ItemDescriptor> = self
            .store
            .query_rows_by_keys(ITEMS_TABLE, &keys)
            .await?
            .iter()
            .map(|r| {
                let d = ItemDescriptor::from_row(r);
                (d.name.clone(), d)
            })
            .collect();

        let mut items = Vec::with_capacity(entries.len());
        for (name, count) in entries {
            match catalog.get(&name) {
                Some(descriptor) => items.push(InventoryItem {
                    item: descriptor.clone(),
                    count,
                }),
                None => debug!(item = %name, "inventory entry has no descriptor"),
            }
        }
        Ok(items)
    }

    /// Names of the items `character` holds with a positive count.
    pub async fn list_inventory_items(&self, character: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .get_inventory_items(character)
            .await?
            .into_iter()
            .map(|i| i.item.name)
            .collect())
    }

    /// Every described item.
    pub async fn list_items(&self) -> StoreResult<Vec<ItemDescriptor>> {
        Ok(self
            .store
            .list_all_rows(ITEMS_TABLE)
            .await?
            .iter()
            .map(ItemDescriptor::from_row)
            .collect())
    }

    pub async fn get_item(&self, name: &str) -> StoreResult<Option<ItemDescriptor>> {
        let rows = self
            .store
            .query_rows_by_keys(ITEMS_TABLE, &[row([("name", Value::from(name))])])
            .await?;
        Ok(rows.first().map(ItemDescriptor::from_row))
    }

    // ── turns ────────────────────────────────────────────────────────

    /// `(turn, true)` for the latest turn, or `(0, false)` on empty history.
    pub async fn get_most_recent_turn(&self) -> StoreResult<(i64, bool)> {
        let rows = self.store.get_last_n_rows(HISTORY_TABLE, 1).await?;
        Ok(match rows.first().and_then(|r| r.get(TURN)).and_then(Value::as_i64) {
            Some(turn) => (turn, true),
            None => (0, false),
        })
    }

    pub async fn most_recent_turn_record(&self) -> StoreResult<Option<TurnRecord>> {
        Ok(self.recent_turns(1).await?.into_iter().next())
    }

    /// Up to `n` turns, most recent first.
    pub async fn recent_turns(&self, n: usize) -> StoreResult<Vec<TurnRecord>> {
        let rows = self.store.get_last_n_rows(HISTORY_TABLE, n).await?;
        Ok(rows.iter().map(|r| self.turn_from_row(r)).collect())
    }

    /// Insert a new turn row.
    ///
    /// Without an explicit `turn`, the first call continues after the most
    /// recent stored turn (or starts at 0) and later calls keep counting from
    /// there. Returns the turn number written.
    #[instrument(skip(self, messages), fields(messages = messages.len()))]
    pub async fn add_new_turn(
        &self,
        messages: &[TurnMessage],
        turn: Option<i64>,
    ) -> StoreResult<i64> {
        let mut turn_row = self.turn_row(messages)?;
        let turn = match turn {
            Some(turn) => turn,
            None => self.next_turn_number().await?,
        };
        turn_row.insert(TURN.into(), Value::from(turn));

        self.store.add_row(HISTORY_TABLE, turn_row, true).await?;
        self.next_turn.fetch_max(turn + 1, Ordering::SeqCst);
        debug!(turn, "turn added");
        Ok(turn)
    }

    /// Overwrite the given roles of an existing turn (the most recent one
    /// when `turn` is `None`). Returns the turn number written.
    #[instrument(skip(self, messages), fields(messages = messages.len()))]
    pub async fn update_turn(&self, messages: &[TurnMessage], turn: Option<i64>) -> StoreResult<i64> {
        let mut turn_row = self.turn_row(messages)?;
        let turn = match turn {
            Some(turn) => turn,
            None => match self.get_most_recent_turn().await? {
                (turn, true) => turn,
                (_, false) => {
                    return Err(StoreError::RowNotFound {
                        table: HISTORY_TABLE.into(),
                        key: "(most recent turn)".into(),
                    });
                }
            },
        };
        turn_row.insert(TURN.into(), Value::from(turn));

        self.store.update_row(HISTORY_TABLE, turn_row, true).await?;
        debug!(turn, "turn updated");
        Ok(turn)
    }

    // ── player state & location ──────────────────────────────────────

    /// Insert or overwrite the state row of `state.player`.
    #[instrument(skip(self, state), fields(player = %state.player))]
    pub async fn set_player_state(&self, state: &PlayerState) -> StoreResult<()> {
        let r = row([
            ("player", Value::from(state.player.as_str())),
            ("alive", Value::from(state.alive)),
            ("mental", Value::from(state.mental.as_str())),
            ("physical", Value::from(state.physical.as_str())),
        ]);
        self.upsert(PLAYERS_STATE_TABLE, r).await
    }

    pub async fn get_player_state(&self, player: &str) -> StoreResult<Option<PlayerState>> {
        let rows = self
            .store
            .query_rows_by_keys(PLAYERS_STATE_TABLE, &[row([("player", Value::from(player))])])
            .await?;
        Ok(rows.first().map(|r| PlayerState {
            player: text(r, "player"),
            alive: r.get("alive").and_then(Value::as_bool).unwrap_or(true),
            mental: text(r, "mental"),
            physical: text(r, "physical"),
        }))
    }

    /// Insert or overwrite the location of `entry.player` at `entry.turn`.
    ///
    /// The turn must already exist in the history.
    #[instrument(skip(self, entry), fields(player = %entry.player, turn = entry.turn))]
    pub async fn record_location(&self, entry: &LocationEntry) -> StoreResult<()> {
        let r = row([
            (TURN, Value::from(entry.turn)),
            ("player", Value::from(entry.player.as_str())),
            ("kingdom", Value::from(entry.kingdom.as_str())),
            ("town", Value::from(entry.town.as_str())),
            ("extra", Value::from(entry.extra.as_str())),
            ("status", Value::from(entry.status.as_str())),
        ]);
        self.upsert(LOCATION_TABLE, r).await
    }

    /// The location recorded for `player` at the highest turn.
    pub async fn latest_location(&self, player: &str) -> StoreResult<Option<LocationEntry>> {
        let rows = self
            .store
            .query_rows_by_keys(LOCATION_TABLE, &[row([("player", Value::from(player))])])
            .await?;
        Ok(rows.last().map(|r| LocationEntry {
            turn: r.get(TURN).and_then(Value::as_i64).unwrap_or(0),
            player: text(r, "player"),
            kingdom: text(r, "kingdom"),
            town: text(r, "town"),
            extra: text(r, "extra"),
            status: text(r, "status"),
        }))
    }

    // ── helpers ──────────────────────────────────────────────────────

    async fn upsert(&self, table: &str, r: Row) -> StoreResult<()> {
        match self.store.add_row(table, r.clone(), true).await {
            Err(StoreError::DuplicateKey { .. }) => {
                self.store.update_row(table, r, true).await?;
                Ok(())
            }
            other => other,
        }
    }

    async fn next_turn_number(&self) -> StoreResult<i64> {
        let next = self.next_turn.load(Ordering::SeqCst);
        if next >= 0 {
            return Ok(next);
        }
        let next = match self.get_most_recent_turn().await? {
            (turn, true) => turn + 1,
            (_, false) => 0,
        };
        self.next_turn.store(next, Ordering::SeqCst);
        Ok(next)
    }

    /// Map turn messages onto history columns, rejecting unknown roles.
    fn turn_row(&self, messages: &[TurnMessage]) -> StoreResult<Row> {
        let mut r = Row::new();
        for msg in messages {
            let known = msg.role == AI_RESPONSE
                || msg.role == HUMAN_RESPONSE
                || self.roster.iter().any(|a| *a == msg.role);
            if !known {
                return Err(StoreError::UnknownRole {
                    role: msg.role.clone(),
                });
            }
            r.insert(msg.role.clone(), Value::from(msg.message.as_str()));
        }
        Ok(r)
    }

    fn turn_from_row(&self, r: &Row) -> TurnRecord {
        TurnRecord {
            turn: r.get(TURN).and_then(Value::as_i64).unwrap_or(0),
            ai_response: text(r, AI_RESPONSE),
            human_response: text(r, HUMAN_RESPONSE),
            actors: self
                .roster
                .iter()
                .map(|a| (a.clone(), text(r, a)))
                .collect(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Schemas
// ═══════════════════════════════════════════════════════════════════════

fn check_roster(roster: Vec<String>) -> StoreResult<Vec<String>> {
    let reserved = [TURN, AI_RESPONSE, HUMAN_RESPONSE];
    let mut seen = HashSet::new();
    let mut checked = Vec::with_capacity(roster.len());
    for actor in roster {
        if actor.trim().is_empty() || reserved.contains(&actor.as_str()) {
            return Err(StoreError::InvalidArgument(format!(
                "invalid actor name `{actor}`"
            )));
        }
        if seen.insert(actor.clone()) {
            checked.push(actor);
        }
    }
    Ok(checked)
}

/// Domain tables in creation order (history before its dependants).
fn domain_schemas(roster: &[String]) -> Vec<TableSchema> {
    let items = TableSchema::new(ITEMS_TABLE)
        .column("name", ColumnType::Text)
        .column("type", ColumnType::Text)
        .column("description", ColumnType::Text)
        .column("action", ColumnType::Text)
        .column("strength", ColumnType::Text)
        .primary_key(["name"]);

    // No SQL reference to `items`: callers insert descriptors first.
    let inventory = TableSchema::new(INVENTORY_TABLE)
        .column("character", ColumnType::Text)
        .column("item", ColumnType::Text)
        .column("count", ColumnType::Integer)
        .primary_key(["character", "item"])
        .index("item");

    let mut history = TableSchema::new(HISTORY_TABLE)
        .column(TURN, ColumnType::Integer)
        .column(AI_RESPONSE, ColumnType::Text)
        .column(HUMAN_RESPONSE, ColumnType::Text);
    for actor in roster {
        history = history.column(actor.as_str(), ColumnType::Text);
    }
    let history = history.primary_key([TURN]);

    let location = TableSchema::new(LOCATION_TABLE)
        .column(TURN, ColumnType::Integer)
        .column("player", ColumnType::Text)
        .column("kingdom", ColumnType::Text)
        .column("town", ColumnType::Text)
        .column("extra", ColumnType::Text)
        .column("status", ColumnType::Text)
        .primary_key([TURN, "player"])
        .index("player")
        .foreign_key(TURN, HISTORY_TABLE, TURN);

    let players_state = TableSchema::new(PLAYERS_STATE_TABLE)
        .column("player", ColumnType::Text)
        .column("alive", ColumnType::Boolean)
        .column("mental", ColumnType::Text)
        .column("physical", ColumnType::Text)
        .primary_key(["player"]);

    vec![items, inventory, history, location, players_state]
}

fn inventory_key(character: &str, item: &str) -> Row {
    row([
        ("character", Value::from(character)),
        ("item", Value::from(item)),
    ])
}

fn text(r: &Row, column: &str) -> String {
    r.get(column)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════
