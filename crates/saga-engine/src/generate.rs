//! Lore generation.
//!
//! [`LoreGenerator`] asks the model for one part of the lore at a time and
//! assembles the answers into a [`Lore`] ready for [`crate::new_session`].
//! Later stages see the earlier ones: kingdoms are placed in the generated
//! world, characters start in a generated town, companion rules are written
//! for the generated companions.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use saga_store::{HUMAN_PLAYER, ItemDescriptor};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument};

use crate::config::LoreConfig;
use crate::describe::ItemDescriber;
use crate::error::{EngineError, Result};
use crate::llm::{ChatOptions, LlmClient, Message, structured_chat_as};
use crate::lore::{CharacterCard, Lore, MONEY_ITEM, World};

/// Money a generated character may start with.
const STARTING_FUNDS: RangeInclusive<i64> = 20..=40;

/// Conditions generated for each end of the game.
const END_GAME_CONDITIONS: usize = 3;

const GAME_MASTER: &str = "You are a game master who plans and outlines a role-playing game. \
    Keep every answer short: it is read by another model, not by the players.";

const KINGDOM_TRAITS: &str = "Kingdoms differ. Some solve their problems with magic, some \
    rely on strong armies, some on deception and plots, some on technology and trade.";

// ---------------------------------------------------------------------------
// Model answers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WorldDraft {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    rules: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Place {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct PlacesDraft {
    #[serde(default)]
    places: Vec<Place>,
}

#[derive(Debug, Deserialize)]
struct CharacterDraft {
    #[serde(default)]
    name: String,
    #[serde(default)]
    inventory: Vec<String>,
    #[serde(default)]
    money: i64,
    #[serde(flatten)]
    details: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RulesDraft {
    #[serde(default)]
    rules: Vec<String>,
}

fn string_list(count: usize) -> Value {
    json!({"type": "array", "items": {"type": "string"}, "minItems": count, "maxItems": count})
}

fn world_schema(rules: usize) -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": {"type": "string", "description": "Name of the world"},
            "description": {"type": "string", "description": "One sentence about the world"},
            "rules": string_list(rules)
        },
        "required": ["name", "description", "rules"]
    })
}

fn places_schema(count: usize) -> Value {
    json!({
        "type": "object",
        "properties": {
            "places": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "description": {"type": "string", "description": "History, location and character, two sentences"}
                    },
                    "required": ["name", "description"]
                },
                "minItems": count,
                "maxItems": count
            }
        },
        "required": ["places"]
    })
}

fn character_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": {"type": "string"},
            "occupation": {"type": "string"},
            "biography": {"type": "string", "description": "1-2 sentences"},
            "goal": {"type": "string", "description": "Something epic, up to 10 words"},
            "strengths": {"type": "string"},
            "weaknesses": {"type": "string"},
            "inventory": {"type": "array", "items": {"type": "string"}, "minItems": 1, "maxItems": 4},
            "money": {
                "type": "integer",
                "description": format!("Between {} and {}", STARTING_FUNDS.start(), STARTING_FUNDS.end())
            }
        },
        "required": ["name", "occupation", "inventory", "money"]
    })
}

fn rules_schema(count: usize) -> Value {
    json!({
        "type": "object",
        "properties": {"rules": string_list(count)},
        "required": ["rules"]
    })
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Who a generated character is in the story.
#[derive(Clone, Copy)]
enum Part<'a> {
    Player,
    Antagonist { player: &'a CharacterCard },
    Companion { player: &'a CharacterCard },
}

/// A starting point in the generated geography.
#[derive(Debug, Clone, Default)]
struct Location {
    kingdom: String,
    town: String,
}

impl Location {
    fn describe(&self) -> String {
        if self.town.is_empty() {
            self.kingdom.clone()
        } else {
            format!("{}, {}", self.town, self.kingdom)
        }
    }

    fn to_value(&self) -> Value {
        json!({"kingdom": self.kingdom, "town": self.town})
    }
}

/// Builds a new [`Lore`] with the model.
pub struct LoreGenerator {
    client: Arc<dyn LlmClient>,
    describer: Arc<dyn ItemDescriber>,
    config: LoreConfig,
    rng: StdRng,
}

impl LoreGenerator {
    pub fn new(
        client: Arc<dyn LlmClient>,
        describer: Arc<dyn ItemDescriber>,
        config: LoreConfig,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            client,
            describer,
            config,
            rng,
        }
    }

    fn options(&self) -> ChatOptions {
        ChatOptions::with_temperature(self.config.temperature)
    }

    /// Generate every part of the lore, reporting each stage to `progress`.
    ///
    /// Any failed model call aborts the generation. The result passes the
    /// same checks as a lore loaded from disk.
    #[instrument(skip_all, fields(kingdoms = self.config.kingdoms, companions = self.config.companions))]
    pub async fn generate(&mut self, mut progress: impl FnMut(&str)) -> Result<Lore> {
        let config = self.config.clone();

        progress(&format!(
            "Generating a {} {} world with {} rules",
            config.world_kind.as_str(),
            config.world_setting,
            config.world_rules
        ));
        let (world, world_rules) = self.world().await?;
        let context = format!(
            "World: {} -- {}\nRules of the world:\n{}",
            world.name,
            world.description,
            bullets(&world_rules)
        );

        progress(&format!("Generating {} kingdoms", config.kingdoms));
        let kingdoms = self
            .places(
                &context,
                format!("Create {} kingdoms of this world. {KINGDOM_TRAITS}", config.kingdoms),
                config.kingdoms,
            )
            .await?;
        if kingdoms.is_empty() {
            return Err(EngineError::InvalidLore {
                reason: "no kingdoms were generated".into(),
            });
        }

        progress(&format!(
            "Generating {} towns for each kingdom",
            config.towns_per_kingdom
        ));
        let mut towns = BTreeMap::new();
        for kingdom in &kingdoms {
            let ask = format!(
                "Create {} towns in the kingdom {}: {}",
                config.towns_per_kingdom, kingdom.name, kingdom.description
            );
            let found = self.places(&context, ask, config.towns_per_kingdom).await?;
            towns.insert(kingdom.name.clone(), found);
        }

        let start = self.start_location(&kingdoms, &towns);
        let mut taken = BTreeSet::new();

        progress("Generating the human player");
        let human = self.character(&context, Part::Player, &start, &mut taken).await?;

        progress("Generating the antagonist");
        let hideout = Location {
            kingdom: start.kingdom.clone(),
            town: String::new(),
        };
        let antagonist = self
            .character(&context, Part::Antagonist { player: &human }, &hideout, &mut taken)
            .await?;

        progress(&format!("Generating {} companions", config.companions));
        let mut npc = BTreeMap::new();
        for _ in 0..config.companions {
            let card = self
                .character(&context, Part::Companion { player: &human }, &start, &mut taken)
                .await?;
            npc.insert(card.name.clone(), card);
        }

        progress("Describing all inventories");
        let cards = std::iter::once(&human)
            .chain([&antagonist])
            .chain(npc.values());
        let inventory_lut = self.describe_inventories(cards).await;

        progress("Generating action rules for the companions");
        let mut npc_rules = BTreeMap::new();
        for (name, card) in &npc {
            let rules = self.companion_rules(&context, card).await?;
            npc_rules.insert(name.clone(), Value::String(bullets(&rules)));
        }

        progress("Generating the end-game conditions");
        let end_game = self.end_game(&context, &human, &antagonist).await?;

        progress("Generating the starting point");
        let opening = self.opening(&context, &human, &npc, &start).await?;

        let mut extra = BTreeMap::new();
        extra.insert("kingdoms".to_string(), places_value(&kingdoms));
        extra.insert(
            "towns".to_string(),
            Value::Object(
                towns
                    .iter()
                    .map(|(kingdom, found)| (kingdom.clone(), places_value(found)))
                    .collect(),
            ),
        );
        extra.insert("antagonist".to_string(), serde_json::to_value(&antagonist)?);
        extra.insert(
            "start_location".to_string(),
            json!({"human": start.to_value(), "antagonist": hideout.to_value()}),
        );
        extra.insert("end_game".to_string(), end_game);

        let lore = Lore {
            world,
            world_outline: Value::String(bullets(&world_rules)),
            npc,
            npc_rules,
            human_player: human,
            inventory_lut,
            start: opening,
            extra,
        };
        lore.validate()?;
        info!(world = %lore.world.name, companions = lore.npc.len(), "lore generated");
        Ok(lore)
    }

    async fn world(&self) -> Result<(World, Vec<String>)> {
        let schema = world_schema(self.config.world_rules);
        let messages = [
            Message::json_schema(&schema),
            Message::system(GAME_MASTER),
            Message::user(format!(
                "Create a {} {} world: give it a name, one sentence of description and {} \
                 rules that govern it.",
                self.config.world_kind.as_str(),
                self.config.world_setting,
                self.config.world_rules
            )),
        ];
        let (draft, usage) =
            structured_chat_as::<WorldDraft>(self.client.as_ref(), &messages, &schema, self.options())
                .await?;
        debug!(
            prompt_tokens = usage.prompt_tokens,
            eval_tokens = usage.eval_tokens,
            "world drafted"
        );
        let world = World {
            name: fallback(&draft.name, "Nameless world"),
            description: draft.description.trim().to_string(),
        };
        info!(world = %world.name, "world created");
        Ok((world, tidy(draft.rules)))
    }

    /// Named places with unique, non-empty names.
    async fn places(&self, context: &str, ask: String, count: usize) -> Result<Vec<Place>> {
        let schema = places_schema(count);
        let messages = [
            Message::json_schema(&schema),
            Message::system(GAME_MASTER),
            Message::user(format!("{context}\n\n{ask}")),
        ];
        let (draft, _) = structured_chat_as::<PlacesDraft>(
            self.client.as_ref(),
            &messages,
            &schema,
            self.options(),
        )
        .await?;

        let mut taken = BTreeSet::new();
        let places: Vec<Place> = draft
            .places
            .into_iter()
            .map(|place| {
                let name = unique_name(&place.name, "Unnamed", &taken);
                taken.insert(name.to_lowercase());
                Place {
                    name,
                    description: place.description.trim().to_string(),
                }
            })
            .collect();
        debug!(places = ?places.iter().map(|p| &p.name).collect::<Vec<_>>(), "places created");
        Ok(places)
    }

    fn start_location(
        &mut self,
        kingdoms: &[Place],
        towns: &BTreeMap<String, Vec<Place>>,
    ) -> Location {
        let kingdom = kingdoms
            .choose(&mut self.rng)
            .map(|k| k.name.clone())
            .unwrap_or_default();
        let town = towns
            .get(&kingdom)
            .and_then(|found| found.choose(&mut self.rng))
            .map(|t| t.name.clone())
            .unwrap_or_default();
        Location { kingdom, town }
    }

    /// One character card. Its name is recorded in `taken` so later
    /// characters get different ones.
    async fn character(
        &mut self,
        context: &str,
        part: Part<'_>,
        location: &Location,
        taken: &mut BTreeSet<String>,
    ) -> Result<CharacterCard> {
        let schema = character_schema();
        let ask = match part {
            Part::Player => "Create the character played by the human player.".to_string(),
            Part::Antagonist { player } => format!(
                "Create the main enemy of the human player, whose goals oppose theirs.\n\
                 The player:\n{}",
                player.biography()
            ),
            Part::Companion { player } => format!(
                "Create a companion who travels with the human player.\nThe player:\n{}",
                player.biography()
            ),
        };
        let avoid = if taken.is_empty() {
            String::new()
        } else {
            let names: Vec<&str> = taken.iter().map(String::as_str).collect();
            format!(" Do not use these names: {}.", names.join(", "))
        };
        let messages = [
            Message::json_schema(&schema),
            Message::system(GAME_MASTER),
            Message::user(format!(
                "{context}\n\n{ask}\nThe character is in {}.{avoid}",
                location.describe()
            )),
        ];
        let (draft, usage) = structured_chat_as::<CharacterDraft>(
            self.client.as_ref(),
            &messages,
            &schema,
            self.options(),
        )
        .await?;
        debug!(
            prompt_tokens = usage.prompt_tokens,
            eval_tokens = usage.eval_tokens,
            "character drafted"
        );

        let proposed = if draft.name.trim().eq_ignore_ascii_case(HUMAN_PLAYER) {
            ""
        } else {
            draft.name.as_str()
        };
        let name = unique_name(proposed, "Stranger", taken);
        taken.insert(name.to_lowercase());

        let money = if STARTING_FUNDS.contains(&draft.money) {
            draft.money
        } else {
            self.rng.gen_range(STARTING_FUNDS)
        };
        let mut details = draft.details;
        details.insert("location".into(), Value::String(location.describe()));
        info!(character = %name, "character created");
        Ok(CharacterCard {
            name,
            inventory: inventory(draft.inventory),
            money,
            details,
        })
    }

    async fn describe_inventories<'a>(
        &self,
        cards: impl IntoIterator<Item = &'a CharacterCard>,
    ) -> BTreeMap<String, ItemDescriptor> {
        let items: BTreeSet<&String> = cards.into_iter().flat_map(|c| &c.inventory).collect();
        let mut lut = BTreeMap::new();
        for item in items {
            lut.insert(item.clone(), self.describer.describe(item).await);
        }
        info!(items = lut.len(), "inventories described");
        lut
    }

    async fn companion_rules(&self, context: &str, card: &CharacterCard) -> Result<Vec<String>> {
        let count = self.config.npc_rules;
        let schema = rules_schema(count);
        let messages = [
            Message::json_schema(&schema),
            Message::system(GAME_MASTER),
            Message::user(format!(
                "{context}\n\nWrite {count} rules that govern how this character acts and \
                 speaks:\n{}",
                card.biography()
            )),
        ];
        let (draft, _) =
            structured_chat_as::<RulesDraft>(self.client.as_ref(), &messages, &schema, self.options())
                .await?;
        Ok(tidy(draft.rules))
    }

    async fn end_game(
        &self,
        context: &str,
        human: &CharacterCard,
        antagonist: &CharacterCard,
    ) -> Result<Value> {
        let mut conditions = Map::new();
        for kind in ["win", "lose"] {
            let messages = [
                Message::system(GAME_MASTER),
                Message::user(format!(
                    "{context}\n\nThe player:\n{}\n\nThe enemy:\n{}\n\nList \
                     {END_GAME_CONDITIONS} conditions under which the player would {kind} \
                     the game.",
                    human.biography(),
                    antagonist.biography()
                )),
            ];
            let answer = self.client.chat(&messages, self.options()).await?;
            conditions.insert(kind.to_string(), Value::String(answer.message.trim().to_string()));
        }
        Ok(Value::Object(conditions))
    }

    async fn opening(
        &self,
        context: &str,
        human: &CharacterCard,
        npc: &BTreeMap<String, CharacterCard>,
        start: &Location,
    ) -> Result<String> {
        let companions: Vec<String> = npc.values().map(CharacterCard::biography).collect();
        let messages = [
            Message::system(GAME_MASTER),
            Message::user(format!(
                "{context}\n\nThe player:\n{}\n\nCompanions:\n{}\n\nDescribe in a few \
                 sentences where the story begins, in {}, and what the player sees.",
                human.biography(),
                companions.join("\n\n"),
                start.describe()
            )),
        ];
        let answer = self.client.chat(&messages, self.options()).await?;
        Ok(answer.message.trim().to_string())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fallback(proposed: &str, default: &str) -> String {
    match proposed.trim() {
        "" => default.to_string(),
        name => name.to_string(),
    }
}

/// `proposed` (or `default` when blank), numbered if the lowercase name is
/// already in `taken`.
fn unique_name(proposed: &str, default: &str, taken: &BTreeSet<String>) -> String {
    let base = fallback(proposed, default);
    let free = |name: &str| !taken.contains(&name.to_lowercase());
    if free(&base) {
        return base;
    }
    (2u32..)
        .map(|n| format!("{base} {n}"))
        .find(|name| free(name))
        .unwrap_or(base)
}

/// Trimmed, non-empty entries.
fn tidy(lines: Vec<String>) -> Vec<String> {
    lines
        .into_iter()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Distinct item names in order of appearance. Money is tracked separately.
fn inventory(items: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    tidy(items)
        .into_iter()
        .filter(|item| !item.eq_ignore_ascii_case(MONEY_ITEM))
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

fn bullets(lines: &[String]) -> String {
    lines
        .iter()
        .map(|line| format!("- {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn places_value(places: &[Place]) -> Value {
    Value::Object(
        places
            .iter()
            .map(|p| (p.name.clone(), json!({"description": p.description})))
            .collect(),
    )
}
