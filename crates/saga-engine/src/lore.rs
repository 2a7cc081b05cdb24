//! Game lore and session bootstrap.
//!
//! A game folder holds the generated lore ([`LORE_FILE`]) next to the
//! session database ([`MEMORY_FILE`]). Starting a new game seeds every
//! character's inventory and the opening turn; loading one only checks that
//! the saved tables are there.

use std::collections::BTreeMap;
use std::path::Path;

use saga_store::{GameMemory, HUMAN_PLAYER, ItemDescriptor, TurnMessage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::error::{EngineError, Result};

pub const LORE_FILE: &str = "lore.json";
pub const MEMORY_FILE: &str = "memory.db";

/// Name of the synthesized currency item.
pub const MONEY_ITEM: &str = "gold";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct World {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A character as generated: starting inventory and money plus free-form
/// details (appearance, occupation, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterCard {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub inventory: Vec<String>,
    #[serde(default)]
    pub money: i64,
    #[serde(flatten)]
    pub details: BTreeMap<String, Value>,
}

impl CharacterCard {
    /// The card without inventory and money, as shown to the model.
    pub fn biography(&self) -> String {
        let mut lines = Vec::new();
        if !self.name.is_empty() {
            lines.push(format!("- name: {}", self.name));
        }
        for (key, value) in &self.details {
            lines.push(format!("- {key}: {}", render(value)));
        }
        lines.join("\n")
    }
}

/// Generated lore of one game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lore {
    pub world: World,
    /// Behavioural rules of the world; a string or any JSON structure.
    #[serde(default)]
    pub world_outline: Value,
    /// Non-player characters by name.
    #[serde(default)]
    pub npc: BTreeMap<String, CharacterCard>,
    #[serde(default)]
    pub npc_rules: BTreeMap<String, Value>,
    pub human_player: CharacterCard,
    #[serde(default)]
    pub inventory_lut: BTreeMap<String, ItemDescriptor>,
    /// Opening narration, stored as turn 0.
    #[serde(default)]
    pub start: String,
    /// Kingdoms, towns and anything else the generator produced.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Lore {
    pub fn from_json(text: &str) -> Result<Self> {
        let lore: Self = serde_json::from_str(text)?;
        lore.validate()?;
        Ok(lore)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json(&text)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path.as_ref(), text).await?;
        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.npc.is_empty() {
            return Err(EngineError::InvalidLore {
                reason: "no non-player characters".into(),
            });
        }
        if let Some(name) = self.npc.keys().find(|n| n.eq_ignore_ascii_case(HUMAN_PLAYER)) {
            return Err(EngineError::InvalidLore {
                reason: format!("`{name}` is reserved for the human player"),
            });
        }
        let cards = std::iter::once(&self.human_player).chain(self.npc.values());
        for item in cards.flat_map(|c| &c.inventory) {
            if !self.inventory_lut.contains_key(item) {
                warn!(item = %item, "inventory item has no description");
            }
        }
        Ok(())
    }

    /// One-line summary used as the game description.
    pub fn title(&self) -> String {
        format!("{} -- {}", self.world.name, self.world.description)
    }

    /// Names of the non-player characters, in a stable order.
    pub fn roster(&self) -> Vec<String> {
        self.npc.keys().cloned().collect()
    }

    pub fn human_name(&self) -> &str {
        if self.human_player.name.is_empty() {
            HUMAN_PLAYER
        } else {
            &self.human_player.name
        }
    }

    pub fn world_rules(&self) -> String {
        render(&self.world_outline)
    }

    pub fn rules_for(&self, actor: &str) -> String {
        self.npc_rules.get(actor).map(render).unwrap_or_default()
    }
}

/// Strings as they are, anything else as pretty JSON.
fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn money_descriptor() -> ItemDescriptor {
    ItemDescriptor {
        item_type: "money".into(),
        ..ItemDescriptor::blank(MONEY_ITEM)
    }
}

/// Create the session database at `db_path` and seed it from `lore`.
///
/// Fails with [`EngineError::SessionExists`] if the file is already there.
#[instrument(skip(lore), fields(world = %lore.world.name))]
pub async fn new_session(lore: &Lore, db_path: &Path) -> Result<GameMemory> {
    if db_path.exists() {
        return Err(EngineError::SessionExists {
            path: db_path.to_path_buf(),
        });
    }
    let memory = GameMemory::open(db_path, lore.roster()).await?;

    info!("populating initial inventories");
    seed_inventory(&memory, lore, HUMAN_PLAYER, &lore.human_player).await?;
    for (name, card) in &lore.npc {
        seed_inventory(&memory, lore, name, card).await?;
    }

    memory
        .add_new_turn(&[TurnMessage::new(saga_store::AI_RESPONSE, &lore.start)], Some(0))
        .await?;
    info!(path = %db_path.display(), "new session created");
    Ok(memory)
}

/// Reopen the session database at `db_path`.
///
/// Fails with [`EngineError::SessionMissing`] if the file is gone, and with
/// a store error if any domain table is missing.
#[instrument(skip(lore), fields(world = %lore.world.name))]
pub async fn load_session(lore: &Lore, db_path: &Path) -> Result<GameMemory> {
    if !db_path.exists() {
        return Err(EngineError::SessionMissing {
            path: db_path.to_path_buf(),
        });
    }
    let memory = GameMemory::open_existing(db_path, lore.roster()).await?;
    let (turn, _) = memory.get_most_recent_turn().await?;
    info!(path = %db_path.display(), turn, "session loaded");
    Ok(memory)
}

/// Every listed item once, plus the character's money.
async fn seed_inventory(
    memory: &GameMemory,
    lore: &Lore,
    character: &str,
    card: &CharacterCard,
) -> Result<()> {
    let mut counts = BTreeMap::new();
    let mut lut = BTreeMap::new();
    for item in &card.inventory {
        counts.insert(item.clone(), 1);
        if let Some(descriptor) = lore.inventory_lut.get(item) {
            lut.insert(item.clone(), descriptor.clone());
        }
    }
    counts.insert(MONEY_ITEM.to_string(), card.money);
    lut.insert(MONEY_ITEM.to_string(), money_descriptor());

    memory.add_inventory_items(character, &counts, &lut).await?;
    info!(character, items = counts.len(), "inventory seeded");
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use saga_store::StoreError;
    use serde_json::json;

    use super::*;

    pub(crate) fn sample_lore() -> Lore {
        let value = json!({
            "world": {"name": "Grimmark", "description": "A cold northern land."},
            "world_outline": "Magic is rare. Steel is law.",
            "kingdoms": {"Nordhal": {}},
            "npc": {
                "Aria": {
                    "name": "Aria",
                    "occupation": "ranger",
                    "inventory": ["bow"],
                    "money": 5
                },
                "Borin": {
                    "name": "Borin",
                    "occupation": "smith",
                    "inventory": ["hammer", "axe"],
                    "money": 12
                }
            },
            "npc_rules": {"Aria": "Never lies.", "Borin": ["Hates thieves", "Loves ale"]},
            "human_player": {
                "name": "Kael",
                "inventory": ["torch", "axe"],
                "money": 3
            },
            "inventory_lut": {
                "bow": {"name": "bow", "type": "weapon"},
                "hammer": {"name": "hammer", "type": "tool"},
                "axe": {"name": "axe", "type": "weapon", "strength": "high"},
                "torch": {"name": "torch", "type": "light"}
            },
            "start": "Snow falls on the road to Nordhal."
        });
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn unknown_sections_survive_a_round_trip() {
        let lore = sample_lore();
        assert!(lore.extra.contains_key("kingdoms"));
        let text = serde_json::to_string(&lore).unwrap();
        assert_eq!(Lore::from_json(&text).unwrap(), lore);
    }

    #[test]
    fn title_joins_world_name_and_description() {
        assert_eq!(sample_lore().title(), "Grimmark -- A cold northern land.");
    }

    #[test]
    fn lore_without_characters_is_rejected() {
        let text = r#"{"world": {"name": "w"}, "human_player": {"name": "h"}}"#;
        assert!(matches!(
            Lore::from_json(text),
            Err(EngineError::InvalidLore { .. })
        ));
    }

    #[test]
    fn rules_render_strings_and_structures() {
        let lore = sample_lore();
        assert_eq!(lore.rules_for("Aria"), "Never lies.");
        assert!(lore.rules_for("Borin").contains("Hates thieves"));
        assert_eq!(lore.rules_for("Nobody"), "");
        assert_eq!(lore.human_name(), "Kael");
        assert_eq!(lore.roster(), vec!["Aria".to_string(), "Borin".to_string()]);
    }

    #[test]
    fn biography_leaves_out_inventory_and_money() {
        let lore = sample_lore();
        let bio = lore.npc["Borin"].biography();
        assert!(bio.contains("- name: Borin"));
        assert!(bio.contains("- occupation: smith"));
        assert!(!bio.contains("hammer"));
    }

    #[tokio::test]
    async fn new_session_seeds_inventories_and_opening_turn() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join(MEMORY_FILE);
        let lore = sample_lore();
        let memory = new_session(&lore, &db).await.unwrap();

        let human = memory.get_inventory_items(HUMAN_PLAYER).await.unwrap();
        let names: Vec<&str> = human.iter().map(|i| i.item.name.as_str()).collect();
        assert_eq!(names, vec!["axe", "gold", "torch"]);
        let gold = human.iter().find(|i| i.item.name == MONEY_ITEM).unwrap();
        assert_eq!(gold.count, 3);
        assert_eq!(gold.item.item_type, "money");

        assert_eq!(memory.list_inventory_items("Borin").await.unwrap().len(), 3);
        assert_eq!(memory.list_items().await.unwrap().len(), 5);

        let opening = memory.most_recent_turn_record().await.unwrap().unwrap();
        assert_eq!(opening.turn, 0);
        assert_eq!(opening.ai_response, lore.start);
    }

    #[tokio::test]
    async fn new_session_refuses_an_existing_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join(MEMORY_FILE);
        let lore = sample_lore();
        drop(new_session(&lore, &db).await.unwrap());
        assert!(matches!(
            new_session(&lore, &db).await,
            Err(EngineError::SessionExists { .. })
        ));
    }

    #[tokio::test]
    async fn load_session_requires_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join(MEMORY_FILE);
        let lore = sample_lore();
        assert!(matches!(
            load_session(&lore, &db).await,
            Err(EngineError::SessionMissing { .. })
        ));

        drop(new_session(&lore, &db).await.unwrap());
        let memory = load_session(&lore, &db).await.unwrap();
        assert_eq!(memory.get_most_recent_turn().await.unwrap(), (0, true));
    }

    #[tokio::test]
    async fn load_session_rejects_a_foreign_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join(MEMORY_FILE);
        std::fs::write(&db, b"").unwrap();
        let err = load_session(&sample_lore(), &db).await.unwrap_err();
        assert!(matches!(err, EngineError::Store(StoreError::MissingTable { .. })));
    }
}
