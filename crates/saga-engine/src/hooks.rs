//! The engine as chat pipeline hooks.
//!
//! [`GameHooks`] shares one [`TurnOrchestrator`] between the handlers it
//! registers:
//!
//! | stack           | command             | handler                    |
//! |-----------------|---------------------|----------------------------|
//! | service         | `/help`             | [`HelpCommand`]            |
//! | service         | `/inventory`        | [`InventoryCommand`]       |
//! | service         | `/stats`            | [`StatsCommand`]           |
//! | user_input      | `process_input`     | [`ProcessInput`]           |
//! | user_input      | `ai_response`       | [`Narrator`]               |
//! | post_processing | `response_complete` | [`ResponseComplete`]       |
//! | post_processing | `exit`              | [`ExitHook`]               |

use std::sync::Arc;

use async_trait::async_trait;
use saga_chat::{
    AI_RESPONSE, ChatError, CommandHook, EXIT, FragmentStream, Hook, HookRegistry, HookResponse,
    HookStack, InputHook, PROCESS_INPUT, RESPONSE_COMPLETE, StreamHook,
};
use saga_store::{GameMemory, HUMAN_PLAYER};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::llm::{ChatOptions, LlmClient, Message};
use crate::orchestrator::TurnOrchestrator;

pub const HELP: &str = "/help";
pub const INVENTORY: &str = "/inventory";
pub const STATS: &str = "/stats";

const STORY_TELLER: &str = "You are an author narrating events based on the provided outline. \
Each section of events should be narrated in the third person limited perspective. \
The language should be straightforward and to the point.";

const LORE_KEEPER: &str = "You are the keeper of this world's lore. Answer the player's \
question briefly and only with what the world would know.";

/// Orchestrator shared between the hooks of one session.
pub type SharedOrchestrator = Arc<Mutex<TurnOrchestrator>>;

// ---------------------------------------------------------------------------
// user_input
// ---------------------------------------------------------------------------

/// `process_input`: one orchestrator step per call.
pub struct ProcessInput {
    orchestrator: SharedOrchestrator,
}

#[async_trait]
impl InputHook for ProcessInput {
    async fn process(&self, input: &str) -> saga_chat::Result<HookResponse> {
        let mut orchestrator = self.orchestrator.lock().await;
        orchestrator
            .process_input(input)
            .await
            .map_err(|e| ChatError::hook(PROCESS_INPUT, e))
    }

    async fn abandon(&self) {
        self.orchestrator.lock().await.abandon();
    }
}

/// `ai_response`: narrates the turn that was just played, or answers a
/// question that was not a game action.
///
/// Context is gathered on the foreground; only the model stream runs on the
/// pipeline's worker.
pub struct Narrator {
    orchestrator: SharedOrchestrator,
    client: Arc<dyn LlmClient>,
    world: String,
    options: ChatOptions,
}

impl Narrator {
    async fn messages(&self, responses: &[HookResponse]) -> crate::error::Result<Vec<Message>> {
        let orchestrator = self.orchestrator.lock().await;
        let state = orchestrator.state();

        if !state.verdict.is_game_action {
            return Ok(vec![
                Message::system(format!("{LORE_KEEPER}\nThe world: {}", self.world)),
                Message::user(state.last_input.clone()),
            ]);
        }

        let situation = orchestrator
            .memory()
            .most_recent_turn_record()
            .await?
            .map(|t| t.ai_response)
            .unwrap_or_default();
        let mut outline = format!(
            "Situation: {situation}\nThe player: {}",
            state.last_input
        );
        for r in responses.iter().filter(|r| !r.message.is_empty()) {
            outline.push_str(&format!("\n{}: {}", r.role, r.message));
        }
        Ok(vec![
            Message::system(STORY_TELLER),
            Message::user(format!(
                "Rewrite the following outline into a concise, coherent, and engaging literary \
                 text:\n{outline}\nWrite 5 sentences maximum."
            )),
        ])
    }
}

#[async_trait]
impl StreamHook for Narrator {
    async fn open(&self, responses: Vec<HookResponse>) -> saga_chat::Result<FragmentStream> {
        let messages = self
            .messages(&responses)
            .await
            .map_err(|e| ChatError::hook(AI_RESPONSE, e))?;
        debug!(messages = messages.len(), "starting narration");
        self.client
            .stream_chat(&messages, self.options)
            .await
            .map_err(|e| ChatError::hook(AI_RESPONSE, e))
    }
}

// ---------------------------------------------------------------------------
// post_processing
// ---------------------------------------------------------------------------

/// `response_complete`: stores the narration as the next turn.
pub struct ResponseComplete {
    orchestrator: SharedOrchestrator,
}

#[async_trait]
impl CommandHook for ResponseComplete {
    async fn call(&self, args: Vec<String>) -> saga_chat::Result<Option<String>> {
        let text = args.join(" ");
        let orchestrator = self.orchestrator.lock().await;
        orchestrator
            .record_ai_response(&text)
            .await
            .map_err(|e| ChatError::hook(RESPONSE_COMPLETE, e))?;
        Ok(None)
    }
}

/// `exit`: logs where the session stopped.
pub struct ExitHook {
    memory: Arc<GameMemory>,
}

#[async_trait]
impl CommandHook for ExitHook {
    async fn call(&self, _args: Vec<String>) -> saga_chat::Result<Option<String>> {
        let (turn, _) = self
            .memory
            .get_most_recent_turn()
            .await
            .map_err(|e| ChatError::hook(EXIT, e))?;
        info!(turn, "session closed");
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// service
// ---------------------------------------------------------------------------

/// `/inventory [character]`: what the player (or a character) holds.
pub struct InventoryCommand {
    memory: Arc<GameMemory>,
}

#[async_trait]
impl CommandHook for InventoryCommand {
    async fn call(&self, args: Vec<String>) -> saga_chat::Result<Option<String>> {
        let owner = if args.is_empty() {
            HUMAN_PLAYER.to_string()
        } else {
            args.join(" ")
        };
        let items = self
            .memory
            .get_inventory_items(&owner)
            .await
            .map_err(|e| ChatError::hook(INVENTORY, e))?;
        if items.is_empty() {
            return Ok(Some(format!("{owner} carries nothing.")));
        }
        let lines: Vec<String> = items
            .iter()
            .map(|i| {
                let kind = if i.item.item_type.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", i.item.item_type)
                };
                format!("- {} x{}{kind}", i.item.name, i.count)
            })
            .collect();
        Ok(Some(format!("Inventory of {owner}:\n{}", lines.join("\n"))))
    }
}

/// `/stats`: current turn and every actor's condition.
pub struct StatsCommand {
    memory: Arc<GameMemory>,
}

#[async_trait]
impl CommandHook for StatsCommand {
    async fn call(&self, _args: Vec<String>) -> saga_chat::Result<Option<String>> {
        let failed = |e: saga_store::StoreError| ChatError::hook(STATS, e);
        let (turn, _) = self.memory.get_most_recent_turn().await.map_err(failed)?;
        let mut lines = vec![format!("Turn: {turn}")];
        for actor in self.memory.roster() {
            let line = match self.memory.get_player_state(actor).await.map_err(failed)? {
                Some(s) if !s.alive => format!("{actor}: dead"),
                Some(s) => format!("{actor}: physical [{}], mental [{}]", s.physical, s.mental),
                None => format!("{actor}: no news"),
            };
            lines.push(line);
        }
        Ok(Some(lines.join("\n")))
    }
}

/// `/help`: the available commands.
pub struct HelpCommand {
    quit_keywords: Vec<String>,
}

#[async_trait]
impl CommandHook for HelpCommand {
    async fn call(&self, _args: Vec<String>) -> saga_chat::Result<Option<String>> {
        Ok(Some(format!(
            "{HELP}                 this help\n\
             {INVENTORY} [name]     items you (or a character) carry\n\
             {STATS}                turn and characters' condition\n\
             {}    leave the game\n\
             Anything else is your next action.",
            self.quit_keywords.join(", ")
        )))
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Every engine hook of one session.
pub struct GameHooks {
    orchestrator: SharedOrchestrator,
    memory: Arc<GameMemory>,
    narrator: Arc<dyn LlmClient>,
    world: String,
    options: ChatOptions,
    quit_keywords: Vec<String>,
}

impl GameHooks {
    pub fn new(orchestrator: TurnOrchestrator, narrator: Arc<dyn LlmClient>) -> Self {
        let memory = Arc::clone(orchestrator.memory());
        Self {
            orchestrator: Arc::new(Mutex::new(orchestrator)),
            memory,
            narrator,
            world: String::new(),
            options: ChatOptions::default(),
            quit_keywords: Vec::new(),
        }
    }

    /// World description given to the narrator for lore questions.
    pub fn with_world(mut self, world: impl Into<String>) -> Self {
        self.world = world.into();
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    /// Keywords listed by `/help`.
    pub fn with_quit_keywords(mut self, keywords: Vec<String>) -> Self {
        self.quit_keywords = keywords;
        self
    }

    pub fn orchestrator(&self) -> SharedOrchestrator {
        Arc::clone(&self.orchestrator)
    }

    /// Register every hook on `registry`.
    pub fn register(self, registry: &mut HookRegistry) -> saga_chat::Result<()> {
        let memory = &self.memory;
        registry.register(
            HookStack::Service,
            HELP,
            Hook::command(HelpCommand {
                quit_keywords: self.quit_keywords.clone(),
            }),
        )?;
        registry.register(
            HookStack::Service,
            INVENTORY,
            Hook::command(InventoryCommand {
                memory: Arc::clone(memory),
            }),
        )?;
        registry.register(
            HookStack::Service,
            STATS,
            Hook::command(StatsCommand {
                memory: Arc::clone(memory),
            }),
        )?;
        registry.register(
            HookStack::UserInput,
            PROCESS_INPUT,
            Hook::input(ProcessInput {
                orchestrator: self.orchestrator(),
            }),
        )?;
        registry.register(
            HookStack::UserInput,
            AI_RESPONSE,
            Hook::stream(Narrator {
                orchestrator: self.orchestrator(),
                client: Arc::clone(&self.narrator),
                world: self.world.clone(),
                options: self.options,
            }),
        )?;
        registry.register(
            HookStack::PostProcessing,
            RESPONSE_COMPLETE,
            Hook::command(ResponseComplete {
                orchestrator: self.orchestrator(),
            }),
        )?;
        registry.register(
            HookStack::PostProcessing,
            EXIT,
            Hook::command(ExitHook {
                memory: Arc::clone(memory),
            }),
        )?;
        info!("game hooks registered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use futures::TryStreamExt;
    use saga_store::{AI_RESPONSE as AI_ROLE, ItemDescriptor, PlayerState, TurnMessage};

    use super::*;
    use crate::actor::{ActorResponder, NpcResponse};
    use crate::describe::BlankDescriber;
    use crate::testing::ScriptedLlm;
    use crate::validator::InputValidator;
    use crate::verdict::Verdict;

    struct Quiet;

    #[async_trait]
    impl ActorResponder for Quiet {
        async fn respond(
            &self,
            actor: &str,
            _memory: &GameMemory,
        ) -> crate::error::Result<NpcResponse> {
            Ok(NpcResponse::action(format!("{actor} nods")))
        }
    }

    async fn registry(llm: Arc<ScriptedLlm>) -> (HookRegistry, Arc<GameMemory>) {
        registry_with(llm, None).await
    }

    async fn registry_with(
        llm: Arc<ScriptedLlm>,
        validator: Option<Arc<dyn InputValidator>>,
    ) -> (HookRegistry, Arc<GameMemory>) {
        let memory = GameMemory::open_in_memory(vec!["Aria".into()]).await.unwrap();
        memory
            .add_new_turn(&[TurnMessage::new(AI_ROLE, "Rain on the square.")], Some(0))
            .await
            .unwrap();
        let memory = Arc::new(memory);
        let mut orchestrator =
            TurnOrchestrator::new(memory.clone(), Arc::new(Quiet), Arc::new(BlankDescriber));
        if let Some(validator) = validator {
            orchestrator = orchestrator.with_validator(validator);
        }
        let hooks = GameHooks::new(orchestrator, llm).with_world("Grimmark");
        let mut registry = HookRegistry::new();
        hooks.register(&mut registry).unwrap();
        (registry, memory)
    }

    #[tokio::test]
    async fn every_hook_is_registered() {
        let (registry, _) = registry(Arc::new(ScriptedLlm::default())).await;
        assert_eq!(
            registry.commands(HookStack::Service),
            vec![HELP.to_string(), INVENTORY.to_string(), STATS.to_string()]
        );
        assert!(registry.input(PROCESS_INPUT).is_some());
        assert!(registry.stream(AI_RESPONSE).is_some());
        assert!(registry.contains(HookStack::PostProcessing, RESPONSE_COMPLETE));
        assert!(registry.contains(HookStack::PostProcessing, EXIT));
    }

    #[tokio::test]
    async fn narrator_streams_an_outline_of_the_turn() {
        let llm = Arc::new(ScriptedLlm::text(["The rain ", "stops."]));
        let (registry, _) = registry(llm.clone()).await;

        let input = registry.input(PROCESS_INPUT).unwrap();
        let mut responses = Vec::new();
        loop {
            let r = input.process("I raise my lantern").await.unwrap();
            let done = r.is_done();
            responses.push(r);
            if done {
                break;
            }
        }

        let stream = registry.stream(AI_RESPONSE).unwrap().open(responses).await.unwrap();
        let text: Vec<String> = stream.try_collect().await.unwrap();
        assert_eq!(text.concat(), "The rain stops.");

        let prompt = llm.last_prompt();
        assert!(prompt.contains("Situation: Rain on the square."));
        assert!(prompt.contains("The player: I raise my lantern"));
        assert!(prompt.contains("Aria: Aria nods"));
    }

    #[tokio::test]
    async fn completed_narration_becomes_the_next_turn() {
        let (registry, memory) = registry(Arc::new(ScriptedLlm::default())).await;
        let input = registry.input(PROCESS_INPUT).unwrap();
        while !input.process("wave").await.unwrap().is_done() {}

        let hook = registry
            .command(HookStack::PostProcessing, RESPONSE_COMPLETE)
            .unwrap();
        hook.call(vec!["The crowd waves back.".into()]).await.unwrap();

        let turn = memory.most_recent_turn_record().await.unwrap().unwrap();
        assert_eq!((turn.turn, turn.ai_response.as_str()), (1, "The crowd waves back."));
    }

    #[tokio::test]
    async fn inventory_command_lists_positive_counts() {
        let (registry, memory) = registry(Arc::new(ScriptedLlm::default())).await;
        let lut = BTreeMap::from([(
            "axe".to_string(),
            ItemDescriptor {
                item_type: "weapon".into(),
                ..ItemDescriptor::blank("axe")
            },
        )]);
        let counts = BTreeMap::from([("axe".to_string(), 2), ("coin".to_string(), 0)]);
        memory.add_inventory_items(HUMAN_PLAYER, &counts, &lut).await.unwrap();

        let hook = registry.command(HookStack::Service, INVENTORY).unwrap();
        let text = hook.call(vec![]).await.unwrap().unwrap();
        assert_eq!(text, "Inventory of human:\n- axe x2 (weapon)");

        let text = hook.call(vec!["Aria".into()]).await.unwrap().unwrap();
        assert_eq!(text, "Aria carries nothing.");
    }

    #[tokio::test]
    async fn stats_command_reports_turn_and_states() {
        let (registry, memory) = registry(Arc::new(ScriptedLlm::default())).await;
        let hook = registry.command(HookStack::Service, STATS).unwrap();
        assert_eq!(hook.call(vec![]).await.unwrap().unwrap(), "Turn: 0\nAria: no news");

        memory
            .set_player_state(&PlayerState {
                player: "Aria".into(),
                alive: true,
                mental: "calm".into(),
                physical: "wet".into(),
            })
            .await
            .unwrap();
        assert_eq!(
            hook.call(vec![]).await.unwrap().unwrap(),
            "Turn: 0\nAria: physical [wet], mental [calm]"
        );
    }

    #[tokio::test]
    async fn lore_questions_go_to_the_lore_keeper() {
        struct NeverGame;

        #[async_trait]
        impl InputValidator for NeverGame {
            async fn validate(
                &self,
                _: &str,
                _: &str,
                _: &[String],
                _: Option<&str>,
            ) -> crate::error::Result<Verdict> {
                Ok(Verdict::not_a_game_action("lore"))
            }
        }

        let llm = Arc::new(ScriptedLlm::text(["An old king."]));
        let (registry, _) = registry_with(llm.clone(), Some(Arc::new(NeverGame))).await;

        let input = registry.input(PROCESS_INPUT).unwrap();
        assert!(input.process("who rules here?").await.unwrap().is_done());
        let stream = registry.stream(AI_RESPONSE).unwrap().open(vec![]).await.unwrap();
        let _: Vec<String> = stream.try_collect().await.unwrap();

        let prompt = llm.last_prompt();
        assert!(prompt.contains("keeper of this world's lore"));
        assert!(prompt.contains("who rules here?"));
    }
}
