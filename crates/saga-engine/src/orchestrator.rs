//! Turn orchestration.
//!
//! [`TurnOrchestrator`] is the `process_input` step of the chat pipeline. It
//! is called repeatedly with the same player line:
//!
//! 1. the first call validates the line and, for a game action, shuffles
//!    the actors into a fresh queue;
//! 2. each following call lets the next actor respond and applies the
//!    response to game memory;
//! 3. once the queue is exhausted (or the line was not a game action) it
//!    answers `Done` and resets for the next line.

use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use saga_chat::{HookResponse, MessageStatus};
use saga_store::{AI_RESPONSE, GameMemory, HUMAN_PLAYER, HUMAN_RESPONSE, TurnMessage};
use tracing::{debug, error, info, instrument, warn};

use crate::actor::{ActorResponder, apply_response};
use crate::describe::ItemDescriber;
use crate::error::Result;
use crate::validator::InputValidator;
use crate::verdict::Verdict;

/// Progress through the current player line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnState {
    pub human_input_validated: bool,
    pub response_generated: bool,
    /// Actors in the order they respond to the current line.
    pub npc_queue: Vec<String>,
    /// Index of the next actor in `npc_queue`.
    pub cursor: usize,
    /// Verdict for the current (or latest) line.
    pub verdict: Verdict,
    /// The latest player line.
    pub last_input: String,
}

impl TurnState {
    pub fn queue_exhausted(&self) -> bool {
        self.cursor >= self.npc_queue.len()
    }
}

/// Per-session turn state machine.
pub struct TurnOrchestrator {
    memory: Arc<GameMemory>,
    validator: Option<Arc<dyn InputValidator>>,
    responder: Arc<dyn ActorResponder>,
    describer: Arc<dyn ItemDescriber>,
    human_name: String,
    rng: StdRng,
    state: TurnState,
}

impl TurnOrchestrator {
    pub fn new(
        memory: Arc<GameMemory>,
        responder: Arc<dyn ActorResponder>,
        describer: Arc<dyn ItemDescriber>,
    ) -> Self {
        Self {
            memory,
            validator: None,
            responder,
            describer,
            human_name: HUMAN_PLAYER.to_string(),
            rng: StdRng::from_entropy(),
            state: TurnState::default(),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn InputValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Deterministic actor order.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// The player's name as the actors know it.
    pub fn with_human_name(mut self, name: impl Into<String>) -> Self {
        self.human_name = name.into();
        self
    }

    pub fn state(&self) -> &TurnState {
        &self.state
    }

    pub fn memory(&self) -> &Arc<GameMemory> {
        &self.memory
    }

    /// Classify `input` against the latest narration and the player's
    /// inventory. Without a validator the verdict is permissive.
    pub async fn verify_user_input(&self, input: &str) -> Result<Verdict> {
        let Some(validator) = &self.validator else {
            debug!("no input validator, treating input as a game action");
            return Ok(Verdict::default());
        };
        let inventory = self.memory.list_inventory_items(HUMAN_PLAYER).await?;
        let context = self
            .memory
            .most_recent_turn_record()
            .await?
            .map(|t| t.ai_response)
            .unwrap_or_default();
        validator.validate(input, &context, &inventory, None).await
    }

    /// One step of processing `input`.
    ///
    /// A validator failure is returned as an error and leaves the state
    /// reset, so the same line is validated again on the next call.
    #[instrument(skip(self))]
    pub async fn process_input(&mut self, input: &str) -> Result<HookResponse> {
        if !self.state.human_input_validated {
            let verdict = match self.verify_user_input(input).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    self.reset();
                    return Err(e);
                }
            };
            self.begin(input, verdict).await;
        }

        if !self.state.verdict.is_game_action {
            info!(reasons = ?self.state.verdict.reasons, "not a game action");
            self.reset();
            return Ok(HookResponse::done());
        }

        if self.state.response_generated || self.state.queue_exhausted() {
            self.state.response_generated = true;
            self.reset();
            debug!("all actors responded");
            return Ok(HookResponse::done());
        }

        let actor = self.state.npc_queue[self.state.cursor].clone();
        self.state.cursor += 1;
        Ok(self.run_actor(&actor).await)
    }

    /// Store a finished narration as the opening of the next turn.
    ///
    /// Only narration that followed a game action is stored; returns the new
    /// turn number when it was.
    pub async fn record_ai_response(&self, text: &str) -> Result<Option<i64>> {
        if !self.state.verdict.is_game_action {
            debug!("narration did not follow a game action, not stored");
            return Ok(None);
        }
        let turn = self
            .memory
            .add_new_turn(&[TurnMessage::new(AI_RESPONSE, text)], None)
            .await?;
        info!(turn, "new turn opened");
        Ok(Some(turn))
    }

    /// Start processing a freshly validated line.
    async fn begin(&mut self, input: &str, verdict: Verdict) {
        if verdict.is_game_action && !verdict.valid {
            warn!(reasons = ?verdict.reasons, "game action flagged as invalid");
        }
        let is_game_action = verdict.is_game_action;

        let mut queue = self.memory.roster().to_vec();
        queue.shuffle(&mut self.rng);
        self.state = TurnState {
            human_input_validated: true,
            response_generated: false,
            npc_queue: queue,
            cursor: 0,
            verdict,
            last_input: input.to_string(),
        };
        debug!(queue = ?self.state.npc_queue, "actor queue drawn");

        if is_game_action {
            self.write_human_response(input).await;
        }
    }

    /// Put the player's line on the current turn, opening one if the
    /// history is empty.
    async fn write_human_response(&self, input: &str) {
        let message = [TurnMessage::new(HUMAN_RESPONSE, input)];
        let written = match self.memory.get_most_recent_turn().await {
            Ok((_, true)) => self.memory.update_turn(&message, None).await,
            Ok((_, false)) => self.memory.add_new_turn(&message, None).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            error!(error = %e, "could not record the player's action");
        }
    }

    async fn run_actor(&self, actor: &str) -> HookResponse {
        match self.responder.respond(actor, &self.memory).await {
            Ok(response) => {
                let report = apply_response(
                    &self.memory,
                    self.describer.as_ref(),
                    &self.human_name,
                    actor,
                    &response,
                )
                .await;
                let status = if report.is_clean() {
                    MessageStatus::Success
                } else {
                    MessageStatus::Warning
                };
                HookResponse::step(actor, response.action).with_status(status)
            }
            Err(e) => {
                error!(actor, error = %e, "actor could not respond");
                HookResponse::step(actor, format!("{actor} hesitates ({e})"))
                    .with_status(MessageStatus::Error)
            }
        }
    }

    /// Drop a half-played line: the next input is validated and gets a
    /// fresh actor queue.
    pub fn abandon(&mut self) {
        if self.state.human_input_validated {
            warn!(
                cursor = self.state.cursor,
                queued = self.state.npc_queue.len(),
                "abandoning unfinished turn"
            );
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.state.human_input_validated = false;
        self.state.npc_queue.clear();
        self.state.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use saga_chat::InputProcessingStatus;

    use super::*;
    use crate::actor::NpcResponse;
    use crate::describe::BlankDescriber;
    use crate::error::EngineError;

    /// Answers with a fixed line per actor and remembers who was asked.
    #[derive(Default)]
    struct EchoResponder {
        asked: Mutex<Vec<String>>,
        failing: Option<String>,
    }

    #[async_trait]
    impl ActorResponder for EchoResponder {
        async fn respond(&self, actor: &str, _memory: &GameMemory) -> Result<NpcResponse> {
            self.asked.lock().unwrap().push(actor.to_string());
            if self.failing.as_deref() == Some(actor) {
                return Err(EngineError::LlmRequestFailed {
                    reason: "timeout".into(),
                });
            }
            Ok(NpcResponse::action(format!("{actor} acts")))
        }
    }

    struct FixedValidator(std::result::Result<Verdict, ()>);

    #[async_trait]
    impl InputValidator for FixedValidator {
        async fn validate(
            &self,
            _action: &str,
            _context: &str,
            _inventory: &[String],
            _extra: Option<&str>,
        ) -> Result<Verdict> {
            self.0.clone().map_err(|()| EngineError::LlmRequestFailed {
                reason: "validator offline".into(),
            })
        }
    }

    fn roster() -> Vec<String> {
        ["Aria", "Borin", "Cade"].map(String::from).to_vec()
    }

    async fn memory() -> Arc<GameMemory> {
        let memory = GameMemory::open_in_memory(roster()).await.unwrap();
        memory
            .add_new_turn(&[TurnMessage::new(AI_RESPONSE, "Dawn.")], Some(0))
            .await
            .unwrap();
        Arc::new(memory)
    }

    fn orchestrator(memory: Arc<GameMemory>, responder: Arc<EchoResponder>) -> TurnOrchestrator {
        TurnOrchestrator::new(memory, responder, Arc::new(BlankDescriber)).with_seed(9)
    }

    #[tokio::test]
    async fn abandoned_line_is_revalidated() {
        let responder = Arc::new(EchoResponder::default());
        let mut orch = orchestrator(memory().await, responder.clone());

        let first = orch.process_input("I climb the wall").await.unwrap();
        assert!(!first.is_done());
        assert!(orch.state().human_input_validated);
        assert_eq!(orch.state().cursor, 1);

        orch.abandon();
        assert!(!orch.state().human_input_validated);
        assert!(orch.state().npc_queue.is_empty());

        orch.process_input("I wait").await.unwrap();
        assert_eq!(orch.state().last_input, "I wait");
        assert_eq!(orch.state().npc_queue.len(), 3);
        assert_eq!(orch.state().cursor, 1);
        assert_eq!(responder.asked.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn without_validator_every_actor_responds_once() {
        let responder = Arc::new(EchoResponder::default());
        let mut orch = orchestrator(memory().await, responder.clone());

        let mut lines = Vec::new();
        loop {
            let r = orch.process_input("I light a fire").await.unwrap();
            if r.is_done() {
                break;
            }
            assert_eq!(r.input_processing_status, InputProcessingStatus::Continue);
            assert_eq!(r.message, format!("{} acts", r.role));
            lines.push(r.role);
        }

        assert_eq!(lines.len(), 3);
        let unique: HashSet<_> = lines.iter().collect();
        assert_eq!(unique.len(), 3);
        assert_eq!(*responder.asked.lock().unwrap(), lines);
        assert!(!orch.state().human_input_validated);
        assert!(orch.state().verdict.is_game_action);
    }

    #[tokio::test]
    async fn first_step_draws_the_full_queue() {
        let mut orch = orchestrator(memory().await, Arc::new(EchoResponder::default()));
        orch.process_input("look around").await.unwrap();

        let state = orch.state();
        assert!(state.human_input_validated);
        assert!(!state.response_generated);
        assert_eq!(state.cursor, 1);
        let mut queue = state.npc_queue.clone();
        queue.sort();
        assert_eq!(queue, roster());
    }

    #[tokio::test]
    async fn actor_lines_and_human_action_land_on_the_current_turn() {
        let memory = memory().await;
        let mut orch = orchestrator(memory.clone(), Arc::new(EchoResponder::default()));
        while !orch.process_input("I open the gate").await.unwrap().is_done() {}

        let turn = memory.most_recent_turn_record().await.unwrap().unwrap();
        assert_eq!(turn.turn, 0);
        assert_eq!(turn.human_response, "I open the gate");
        for actor in roster() {
            assert_eq!(turn.message(&actor), Some(format!("{actor} acts").as_str()));
        }
    }

    #[tokio::test]
    async fn non_game_input_is_terminal_and_writes_nothing() {
        let memory = memory().await;
        let responder = Arc::new(EchoResponder::default());
        let mut orch = orchestrator(memory.clone(), responder.clone()).with_validator(Arc::new(
            FixedValidator(Ok(Verdict::not_a_game_action("lore"))),
        ));

        let r = orch.process_input("who is the king?").await.unwrap();
        assert!(r.is_done());
        assert!(r.message.is_empty());
        assert!(responder.asked.lock().unwrap().is_empty());
        assert_eq!(orch.state().cursor, 0);

        let turn = memory.most_recent_turn_record().await.unwrap().unwrap();
        assert_eq!(turn.human_response, "");
        assert_eq!(orch.record_ai_response("The king is old.").await.unwrap(), None);
        assert_eq!(memory.get_most_recent_turn().await.unwrap(), (0, true));
    }

    #[tokio::test]
    async fn validator_failure_is_an_error_and_revalidates() {
        let mut orch = orchestrator(memory().await, Arc::new(EchoResponder::default()))
            .with_validator(Arc::new(FixedValidator(Err(()))));

        let err = orch.process_input("jump").await.unwrap_err();
        assert!(matches!(err, EngineError::LlmRequestFailed { .. }));
        assert!(!orch.state().human_input_validated);
        assert!(orch.process_input("jump").await.is_err());
    }

    #[tokio::test]
    async fn failing_actor_is_reported_and_the_queue_moves_on() {
        let responder = Arc::new(EchoResponder {
            failing: Some("Borin".into()),
            ..EchoResponder::default()
        });
        let mut orch = orchestrator(memory().await, responder.clone());

        let mut statuses = Vec::new();
        loop {
            let r = orch.process_input("attack").await.unwrap();
            if r.is_done() {
                break;
            }
            statuses.push((r.role, r.message_status));
        }
        assert_eq!(statuses.len(), 3);
        assert!(statuses.contains(&("Borin".to_string(), MessageStatus::Error)));
        assert!(statuses.contains(&("Aria".to_string(), MessageStatus::Success)));
    }

    #[tokio::test]
    async fn same_seed_same_order() {
        let mut a = orchestrator(memory().await, Arc::new(EchoResponder::default()));
        let mut b = orchestrator(memory().await, Arc::new(EchoResponder::default()));
        a.process_input("x").await.unwrap();
        b.process_input("x").await.unwrap();
        assert_eq!(a.state().npc_queue, b.state().npc_queue);
    }

    #[tokio::test]
    async fn narration_after_a_game_action_opens_the_next_turn() {
        let memory = memory().await;
        let mut orch = orchestrator(memory.clone(), Arc::new(EchoResponder::default()));
        while !orch.process_input("I sing").await.unwrap().is_done() {}

        assert_eq!(orch.record_ai_response("The crowd cheers.").await.unwrap(), Some(1));
        let turn = memory.most_recent_turn_record().await.unwrap().unwrap();
        assert_eq!(turn.ai_response, "The crowd cheers.");
        assert_eq!(turn.human_response, "");
    }
}
