//! Integration tests for the saga-store crate.
//!
//! These exercise the record store and game memory against a real SQLite
//! file on disk (via tempfile), including schema discovery on reopen.

use std::collections::BTreeMap;

use saga_store::{
    AI_RESPONSE, ColumnType, GameMemory, HUMAN_PLAYER, HUMAN_RESPONSE, ItemDescriptor,
    PlayerState, RecordStore, StoreError, TableSchema, TurnMessage, Value, row,
};

// ═══════════════════════════════════════════════════════════════════════
//  Record store
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn items_scenario_round_trips() {
    let store = RecordStore::open_in_memory().unwrap();
    assert!(store.tables().is_empty());

    store
        .create_table(
            TableSchema::new("items")
                .column("name", ColumnType::Text)
                .column("type", ColumnType::Text)
                .primary_key(["name"]),
        )
        .await
        .unwrap();
    let axe = row([("name", Value::from("axe")), ("type", Value::from("weapon"))]);
    store.add_row("items", axe.clone(), true).await.unwrap();

    assert_eq!(store.get_last_n_rows("items", 1).await.unwrap(), vec![axe.clone()]);
    let by_key = store
        .query_rows_by_keys("items", &[row([("name", Value::from("axe"))])])
        .await
        .unwrap();
    assert_eq!(by_key, vec![axe]);
}

#[tokio::test]
async fn reopen_discovers_schema() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.db");

    {
        let store = RecordStore::open(&path).await.unwrap();
        store
            .create_table(
                TableSchema::new("parents")
                    .column("id", ColumnType::Integer)
                    .primary_key(["id"]),
            )
            .await
            .unwrap();
        store
            .create_table(
                TableSchema::new("children")
                    .column("parent", ColumnType::Integer)
                    .column("name", ColumnType::Text)
                    .column("grown", ColumnType::Boolean)
                    .column("height", ColumnType::Real)
                    .primary_key(["name", "parent"])
                    .index("parent")
                    .foreign_key("parent", "parents", "id"),
            )
            .await
            .unwrap();
        store
            .add_row("parents", row([("id", Value::from(1))]), true)
            .await
            .unwrap();
        store
            .add_row(
                "children",
                row([
                    ("parent", Value::from(1)),
                    ("name", Value::from("kid")),
                    ("grown", Value::from(true)),
                    ("height", Value::from(1.25)),
                ]),
                true,
            )
            .await
            .unwrap();
    }

    let store = RecordStore::open(&path).await.unwrap();
    assert_eq!(store.tables(), vec!["children", "parents"]);

    let schema = store.schema("children").unwrap();
    assert_eq!(schema.primary_keys, vec!["name", "parent"]);
    assert_eq!(schema.index_keys, vec!["parent"]);
    assert_eq!(schema.foreign_keys.len(), 1);
    assert_eq!(schema.foreign_keys[0].ref_table, "parents");
    assert_eq!(schema.column_type("grown"), Some(ColumnType::Boolean));
    assert_eq!(schema.column_type("height"), Some(ColumnType::Real));

    let rows = store.list_all_rows("children").await.unwrap();
    assert_eq!(rows[0]["grown"], Value::Boolean(true));
    assert_eq!(rows[0]["height"], Value::Real(1.25));

    let err = store
        .create_table(TableSchema::new("parents").column("id", ColumnType::Integer).primary_key(["id"]))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::TableAlreadyExists { .. }));

    // Foreign keys stay enforced after reopen.
    let orphan = row([
        ("parent", Value::from(9)),
        ("name", Value::from("orphan")),
    ]);
    assert!(store.add_row("children", orphan, false).await.is_err());
}

// ═══════════════════════════════════════════════════════════════════════
//  Game memory
// ═══════════════════════════════════════════════════════════════════════

fn roster() -> Vec<String> {
    vec!["Aria".to_string(), "Borin".to_string()]
}

#[tokio::test]
async fn saved_session_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.db");

    {
        let mem = GameMemory::open(&path, roster()).await.unwrap();
        let lut = BTreeMap::from([(
            "torch".to_string(),
            ItemDescriptor {
                name: "torch".into(),
                item_type: "tool".into(),
                ..Default::default()
            },
        )]);
        mem.add_inventory_items(HUMAN_PLAYER, &BTreeMap::from([("torch".to_string(), 2)]), &lut)
            .await
            .unwrap();
        mem.add_new_turn(&[TurnMessage::new(AI_RESPONSE, "The gate opens.")], None)
            .await
            .unwrap();
        mem.update_turn(&[TurnMessage::new(HUMAN_RESPONSE, "I walk in.")], None)
            .await
            .unwrap();
        mem.set_player_state(&PlayerState {
            player: "Aria".into(),
            alive: true,
            mental: "curious".into(),
            physical: "fine".into(),
        })
        .await
        .unwrap();
    }

    let mem = GameMemory::open_existing(&path, roster()).await.unwrap();
    assert_eq!(mem.get_most_recent_turn().await.unwrap(), (0, true));
    assert_eq!(mem.list_inventory_items(HUMAN_PLAYER).await.unwrap(), vec!["torch"]);
    assert!(mem.get_player_state("Aria").await.unwrap().unwrap().alive);

    // Unspecified turns continue after the stored history.
    let next = mem
        .add_new_turn(&[TurnMessage::new(AI_RESPONSE, "Night falls.")], None)
        .await
        .unwrap();
    assert_eq!(next, 1);

    let turns = mem.recent_turns(5).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1].human_response, "I walk in.");
}

#[tokio::test]
async fn open_existing_requires_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.db");
    let err = GameMemory::open_existing(&path, roster()).await.err().unwrap();
    assert!(matches!(err, StoreError::InvalidArgument(_)));
    assert!(!path.exists());
}

#[tokio::test]
async fn open_existing_rejects_foreign_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("other.db");
    {
        let store = RecordStore::open(&path).await.unwrap();
        store
            .create_table(TableSchema::new("notes").column("id", ColumnType::Integer).primary_key(["id"]))
            .await
            .unwrap();
    }
    let err = GameMemory::open_existing(&path, roster()).await.err().unwrap();
    assert!(matches!(err, StoreError::MissingTable { .. }));
}
