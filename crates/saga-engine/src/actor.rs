//! Non-player character responses.
//!
//! An [`ActorResponder`] decides what an actor does this turn; the result
//! ([`NpcResponse`]) is then written to [`GameMemory`] by [`apply_response`],
//! field by field, so that a failure in one field never loses the others.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use saga_store::{
    GameMemory, HUMAN_PLAYER, ItemDescriptor, LocationEntry, PlayerState, TurnMessage, TurnRecord,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error, info, instrument};

use crate::describe::ItemDescriber;
use crate::error::{EngineError, Result};
use crate::llm::{ChatOptions, LlmClient, Message, structured_chat_as};
use crate::lore::Lore;

// ---------------------------------------------------------------------------
// Response model
// ---------------------------------------------------------------------------

/// One item changing hands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryUpdate {
    pub item: String,
    /// Who receives the item.
    pub subject: String,
    /// Who gives it up, if anyone tracked.
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorState {
    #[serde(default = "alive")]
    pub alive: bool,
    #[serde(default)]
    pub physical: Vec<String>,
    #[serde(default)]
    pub mental: Vec<String>,
}

fn alive() -> bool {
    true
}

impl Default for ActorState {
    fn default() -> Self {
        Self {
            alive: true,
            physical: Vec::new(),
            mental: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationUpdate {
    #[serde(default)]
    pub kingdom: String,
    #[serde(default)]
    pub town: String,
    #[serde(default)]
    pub extra: String,
    #[serde(default)]
    pub status: String,
}

/// What an actor does in one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NpcResponse {
    pub action: String,
    #[serde(default)]
    pub inventory: Vec<InventoryUpdate>,
    #[serde(default)]
    pub state: ActorState,
    #[serde(default)]
    pub location: Option<LocationUpdate>,
}

impl NpcResponse {
    /// A response that only carries an action line.
    pub fn action(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Self::default()
        }
    }

    pub fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "description": "What you do or say, in one or two sentences"},
                "inventory": {
                    "type": "array",
                    "description": "Items that change hands; empty if none",
                    "items": {
                        "type": "object",
                        "properties": {
                            "item": {"type": "string", "description": "Item name"},
                            "subject": {"type": "string", "description": "Who receives the item"},
                            "source": {"type": "string", "description": "Who gives the item away, empty if found"},
                            "amount": {"type": "integer", "description": "Number of items"}
                        },
                        "required": ["item", "subject", "amount"]
                    }
                },
                "state": {
                    "type": "object",
                    "properties": {
                        "alive": {"type": "boolean"},
                        "physical": {"type": "array", "items": {"type": "string"}, "description": "e.g. fresh, tired, wounded"},
                        "mental": {"type": "array", "items": {"type": "string"}, "description": "e.g. calm, alert, afraid"}
                    }
                },
                "location": {
                    "type": "object",
                    "properties": {
                        "kingdom": {"type": "string"},
                        "town": {"type": "string"},
                        "extra": {"type": "string"},
                        "status": {"type": "string"}
                    }
                }
            },
            "required": ["action"]
        })
    }
}

// ---------------------------------------------------------------------------
// Responders
// ---------------------------------------------------------------------------

/// Produces an actor's response from the current game memory.
#[async_trait]
pub trait ActorResponder: Send + Sync {
    async fn respond(&self, actor: &str, memory: &GameMemory) -> Result<NpcResponse>;
}

/// What the model is told about one actor.
#[derive(Debug, Clone, Default)]
pub struct ActorProfile {
    pub biography: String,
    pub rules: String,
}

const HEADER: &str = "-----";

/// Actor responses from a structured model call.
pub struct LlmResponder {
    client: Arc<dyn LlmClient>,
    world_name: String,
    world_description: String,
    world_rules: String,
    profiles: BTreeMap<String, ActorProfile>,
    history: usize,
    options: ChatOptions,
}

impl LlmResponder {
    /// `history` is the number of recent turns put in the prompt.
    pub fn from_lore(client: Arc<dyn LlmClient>, lore: &Lore, history: usize) -> Self {
        let profiles = lore
            .npc
            .iter()
            .map(|(name, card)| {
                let profile = ActorProfile {
                    biography: card.biography(),
                    rules: lore.rules_for(name),
                };
                (name.clone(), profile)
            })
            .collect();
        Self {
            client,
            world_name: lore.world.name.clone(),
            world_description: lore.world.description.clone(),
            world_rules: lore.world_rules(),
            profiles,
            history: history.max(1),
            options: ChatOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    fn system_prompt(&self, actor: &str, profile: &ActorProfile, inventory: &[String]) -> String {
        format!(
            "You are {actor}. These are your brief biography details:\n{bio}\n\n\
             You act following your rules:\n{rules}\n\n\
             You live in a world that follows these behavioral rules:\n{world_rules}\n\n\
             Here's your world:\n- name: {world}\n- description: {description}\n\n\
             You will be provided with actions of other characters.\n\n\
             Your task: respond to these as {actor}\n\
             Instructions:\n\
             - actions MUST agree with the world rules\n\
             - you help the human player\n\
             - you behave strictly in accordance to your behavioral rules\n\
             - you can use only items in your inventory\n\
             - if you change any inventory, list the items and counts\n\
             Your inventory items: {inventory:?}",
            bio = profile.biography,
            rules = profile.rules,
            world_rules = self.world_rules,
            world = self.world_name,
            description = self.world_description,
        )
    }

    fn format_turn(&self, actor: &str, turn: &TurnRecord) -> String {
        let mut text = format!(
            "{HEADER} TURN: {} {HEADER}\nSituation: {}\nHuman: {}\nYou: {}",
            turn.turn,
            turn.ai_response,
            turn.human_response,
            turn.message(actor).unwrap_or_default()
        );
        for (other, line) in turn.actors.iter().filter(|(name, _)| name.as_str() != actor) {
            text.push_str(&format!("\n{other}: {line}"));
        }
        text
    }

    fn task(&self, actor: &str, turns: &[TurnRecord]) -> String {
        let Some((current, earlier)) = turns.split_first() else {
            return "What will you do?".to_string();
        };
        let mut task = format!(
            "What will you do?\n\nSituation: {}\n\nHuman actions: {}",
            current.ai_response, current.human_response
        );
        for (other, line) in &current.actors {
            if other != actor && !line.is_empty() {
                task.push_str(&format!("\n{other}: {line}"));
            }
        }
        if !earlier.is_empty() {
            let context: Vec<String> = earlier
                .iter()
                .rev()
                .map(|t| self.format_turn(actor, t))
                .collect();
            task.push_str(&format!(
                "\n{HEADER} Your previous conversation: {HEADER}\n{}",
                context.join("\n")
            ));
        }
        task
    }

    /// Prompt for `actor`'s next response.
    pub async fn compile_messages(&self, actor: &str, memory: &GameMemory) -> Result<Vec<Message>> {
        let profile = self
            .profiles
            .get(actor)
            .ok_or_else(|| EngineError::UnknownActor { name: actor.into() })?;
        let inventory = memory.list_inventory_items(actor).await?;
        let turns = memory.recent_turns(self.history).await?;

        Ok(vec![
            Message::json_schema(&NpcResponse::schema()),
            Message::system(self.system_prompt(actor, profile, &inventory)),
            Message::user(self.task(actor, &turns)),
        ])
    }
}

#[async_trait]
impl ActorResponder for LlmResponder {
    #[instrument(skip(self, memory))]
    async fn respond(&self, actor: &str, memory: &GameMemory) -> Result<NpcResponse> {
        let messages = self.compile_messages(actor, memory).await?;
        let (response, stats): (NpcResponse, _) = structured_chat_as(
            self.client.as_ref(),
            &messages,
            &NpcResponse::schema(),
            self.options,
        )
        .await?;
        debug!(
            prompt_tokens = stats.prompt_tokens,
            eval_tokens = stats.eval_tokens,
            "actor responded"
        );
        Ok(response)
    }
}

// ---------------------------------------------------------------------------
// Applying a response
// ---------------------------------------------------------------------------

/// Parts of a response that could not be written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub failed: Vec<&'static str>,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, field: &'static str, actor: &str, outcome: Result<()>) {
        if let Err(e) = outcome {
            error!(actor, field, error = %e, "could not apply actor response");
            self.failed.push(field);
        }
    }
}

/// Who the engine means by a character name in a response.
pub struct Cast<'a> {
    /// Display name of the human player.
    pub human_name: &'a str,
    /// The responding actor.
    pub actor: &'a str,
    pub roster: &'a [String],
}

impl Cast<'_> {
    pub fn is_human(&self, name: &str) -> bool {
        [self.human_name, HUMAN_PLAYER, "player"]
            .iter()
            .any(|candidate| name.trim().eq_ignore_ascii_case(candidate))
    }

    /// Inventory owner receiving an item; the actor when unspecified.
    fn receiver(&self, subject: &str) -> String {
        if subject.trim().is_empty() {
            self.actor.to_string()
        } else if self.is_human(subject) {
            HUMAN_PLAYER.to_string()
        } else {
            subject.trim().to_string()
        }
    }

    /// Tracked owner giving an item up, other than the receiver.
    fn giver(&self, source: &str, receiver: &str) -> Option<String> {
        let owner = if self.is_human(source) {
            HUMAN_PLAYER.to_string()
        } else if self.roster.iter().any(|a| a == source.trim()) {
            source.trim().to_string()
        } else {
            return None;
        };
        (owner != receiver).then_some(owner)
    }
}

/// Write `response` of `actor` into memory.
///
/// The turn line, player state, inventory and location are applied in that
/// order; each failure is logged and reported, and the rest still run.
#[instrument(skip(memory, describer, response))]
pub async fn apply_response(
    memory: &GameMemory,
    describer: &dyn ItemDescriber,
    human_name: &str,
    actor: &str,
    response: &NpcResponse,
) -> ApplyReport {
    let mut report = ApplyReport::default();
    let cast = Cast {
        human_name,
        actor,
        roster: memory.roster(),
    };

    let turn = memory
        .update_turn(&[TurnMessage::new(actor, &response.action)], None)
        .await
        .map(drop)
        .map_err(EngineError::from);
    report.record("turn", actor, turn);

    let state = PlayerState {
        player: actor.to_string(),
        alive: response.state.alive,
        physical: response.state.physical.join(", "),
        mental: response.state.mental.join(", "),
    };
    let state = memory.set_player_state(&state).await.map_err(EngineError::from);
    report.record("state", actor, state);

    let inventory = apply_inventory(memory, describer, &cast, &response.inventory).await;
    report.record("inventory", actor, inventory);

    if let Some(location) = &response.location {
        let written = record_location(memory, actor, location).await;
        report.record("location", actor, written);
    }

    report
}

async fn apply_inventory(
    memory: &GameMemory,
    describer: &dyn ItemDescriber,
    cast: &Cast<'_>,
    updates: &[InventoryUpdate],
) -> Result<()> {
    if updates.is_empty() {
        return Ok(());
    }
    let mut catalog: BTreeMap<String, ItemDescriptor> = memory
        .list_items()
        .await?
        .into_iter()
        .map(|d| (d.name.clone(), d))
        .collect();

    for update in updates {
        let item = update.item.trim();
        if item.is_empty() || update.amount == 0 {
            debug!(?update, "ignoring empty inventory update");
            continue;
        }
        let receiver = cast.receiver(&update.subject);
        let counts = BTreeMap::from([(item.to_string(), update.amount)]);

        match catalog.get(item).cloned() {
            None => {
                info!(item, "describing new item");
                let descriptor = describer.describe(item).await;
                catalog.insert(item.to_string(), descriptor.clone());
                let lut = BTreeMap::from([(item.to_string(), descriptor)]);
                memory.add_inventory_items(&receiver, &counts, &lut).await?;
            }
            Some(descriptor) => {
                let held = memory.list_inventory_items(&receiver).await?;
                if held.iter().any(|h| h == item) {
                    memory.update_inventory_item(item, update.amount, &receiver).await?;
                } else {
                    let lut = BTreeMap::from([(item.to_string(), descriptor)]);
                    memory.add_inventory_items(&receiver, &counts, &lut).await?;
                }
            }
        }

        if let Some(giver) = cast.giver(&update.source, &receiver) {
            debug!(item, giver = %giver, "decreasing giver's count");
            memory.update_inventory_item(item, -update.amount, &giver).await?;
        }
    }
    Ok(())
}

async fn record_location(memory: &GameMemory, actor: &str, location: &LocationUpdate) -> Result<()> {
    let (turn, _) = memory.get_most_recent_turn().await?;
    let entry = LocationEntry {
        turn,
        player: actor.to_string(),
        kingdom: location.kingdom.clone(),
        town: location.town.clone(),
        extra: location.extra.clone(),
        status: location.status.clone(),
    };
    memory.record_location(&entry).await?;
    Ok(())
}
