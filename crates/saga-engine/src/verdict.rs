//! Classification of a player's input.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Kinds of game action the validator can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    #[serde(rename = "inventory change")]
    InventoryChange,
    #[serde(rename = "mental state change")]
    MentalStateChange,
    #[serde(rename = "physical state change")]
    PhysicalStateChange,
    #[serde(rename = "relocation")]
    Relocation,
    #[serde(rename = "conversation")]
    Conversation,
    #[serde(rename = "fight")]
    Fight,
    /// Anything the model made up.
    #[serde(other)]
    Other,
}

impl ActionType {
    pub const KNOWN: [ActionType; 6] = [
        Self::InventoryChange,
        Self::MentalStateChange,
        Self::PhysicalStateChange,
        Self::Relocation,
        Self::Conversation,
        Self::Fight,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InventoryChange => "inventory change",
            Self::MentalStateChange => "mental state change",
            Self::PhysicalStateChange => "physical state change",
            Self::Relocation => "relocation",
            Self::Conversation => "conversation",
            Self::Fight => "fight",
            Self::Other => "other",
        }
    }
}

/// Validator outcome for one line of player input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the input is an in-world action rather than, say, a question
    /// about the lore.
    pub is_game_action: bool,
    /// Whether the action is allowed by the world rules.
    pub valid: bool,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub action_types: Vec<ActionType>,
}

/// Permissive: a valid game action of unknown kind. Used whenever no
/// validator is configured.
impl Default for Verdict {
    fn default() -> Self {
        Self {
            is_game_action: true,
            valid: true,
            reasons: Vec::new(),
            action_types: Vec::new(),
        }
    }
}

impl Verdict {
    /// A verdict for input that is not a game action.
    pub fn not_a_game_action(reason: impl Into<String>) -> Self {
        Self {
            is_game_action: false,
            valid: false,
            reasons: vec![reason.into()],
            action_types: Vec::new(),
        }
    }

    /// JSON schema requested from the model.
    pub fn schema() -> Value {
        let kinds: Vec<&str> = ActionType::KNOWN.iter().map(|k| k.as_str()).collect();
        json!({
            "type": "object",
            "properties": {
                "is_game_action": {"type": "boolean", "description": "Is this an action inside the game world?"},
                "valid": {"type": "boolean", "description": "Is the action allowed by the world rules?"},
                "reasons": {
                    "type": "array",
                    "description": "Violations, 3 words each at most; empty if valid",
                    "items": {"type": "string"}
                },
                "action_types": {
                    "type": "array",
                    "description": "Kinds of action if valid",
                    "items": {"type": "string", "enum": kinds}
                }
            },
            "required": ["is_game_action", "valid"]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_permissive() {
        let v = Verdict::default();
        assert!(v.is_game_action);
        assert!(v.valid);
        assert!(v.action_types.is_empty());
    }

    #[test]
    fn action_types_use_spaced_names() {
        let v: Verdict = serde_json::from_value(json!({
            "is_game_action": true,
            "valid": true,
            "action_types": ["inventory change", "fight", "dancing"]
        }))
        .unwrap();
        assert_eq!(
            v.action_types,
            vec![ActionType::InventoryChange, ActionType::Fight, ActionType::Other]
        );
        assert!(v.reasons.is_empty());
    }

    #[test]
    fn schema_lists_known_action_types() {
        let schema = Verdict::schema();
        let kinds = schema["properties"]["action_types"]["items"]["enum"]
            .as_array()
            .unwrap();
        assert_eq!(kinds.len(), 6);
        assert!(kinds.contains(&json!("relocation")));
    }
}
