//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Tunables of one game session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Recent turns shown to an actor when it responds.
    pub npc_turn_history: usize,
    /// Classify player input before running the actors. Without a validator
    /// every line counts as a valid game action.
    pub enable_validator: bool,
    /// Sampling temperature for describing new items.
    pub describe_temperature: f32,
    /// Seed for the actor order; random when unset.
    pub seed: Option<u64>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            npc_turn_history: 10,
            enable_validator: true,
            describe_temperature: 0.25,
            seed: None,
        }
    }
}

/// Tone of a generated world.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorldKind {
    #[default]
    Dark,
    Neutral,
    Funny,
}

impl WorldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dark => "dark",
            Self::Neutral => "neutral",
            Self::Funny => "funny",
        }
    }
}

/// Sizes and tone of a generated lore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoreConfig {
    /// Genre the world is set in, e.g. "medieval fantasy".
    pub world_setting: String,
    pub world_kind: WorldKind,
    pub world_rules: usize,
    pub kingdoms: usize,
    pub towns_per_kingdom: usize,
    /// Non-player characters travelling with the human.
    pub companions: usize,
    pub npc_rules: usize,
    pub temperature: f32,
    /// Seed for the starting location; random when unset.
    pub seed: Option<u64>,
}

impl Default for LoreConfig {
    fn default() -> Self {
        Self {
            world_setting: "medieval fantasy".into(),
            world_kind: WorldKind::Dark,
            world_rules: 5,
            kingdoms: 2,
            towns_per_kingdom: 2,
            companions: 2,
            npc_rules: 5,
            temperature: 1.0,
            seed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: GameConfig = serde_json::from_str(r#"{"npc_turn_history": 4}"#).unwrap();
        assert_eq!(config.npc_turn_history, 4);
        assert!(config.enable_validator);
        assert_eq!(config.describe_temperature, 0.25);
    }

    #[test]
    fn world_kind_is_lowercase() {
        let config: LoreConfig =
            serde_json::from_str(r#"{"world_kind": "funny", "companions": 1}"#).unwrap();
        assert_eq!(config.world_kind, WorldKind::Funny);
        assert_eq!(config.world_kind.as_str(), "funny");
        assert_eq!(config.companions, 1);
        assert_eq!(config.kingdoms, 2);
        assert!(serde_json::from_str::<LoreConfig>(r#"{"world_kind": "grim"}"#).is_err());
    }
}
