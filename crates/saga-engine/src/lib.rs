//! # saga-engine
//!
//! Game logic for saga: decides who acts each turn and writes the outcome to
//! game memory.
//!
//! ```text
//!   player line
//!       |
//!       v
//!   TurnOrchestrator --validate--> InputValidator
//!       |
//!       +-- shuffled actor queue --> ActorResponder --> apply_response --> GameMemory
//!       |
//!       v
//!   Narrator (stream) --> response_complete --> next turn
//! ```
//!
//! ## Modules
//!
//! - [`orchestrator`] -- per-session turn state machine
//! - [`actor`] -- actor response model, LLM responder and memory updates
//! - [`validator`] / [`verdict`] -- classification of player input
//! - [`describe`] -- catalog descriptions for new items
//! - [`hooks`] -- the engine registered as chat pipeline hooks
//! - [`lore`] -- game lore and session bootstrap
//! - [`generate`] -- lore generation with the model
//! - [`llm`] / [`dummy`] -- model interface and an offline stand-in
//! - [`config`] -- session tunables

pub mod actor;
pub mod config;
pub mod describe;
pub mod dummy;
pub mod error;
pub mod generate;
pub mod hooks;
pub mod llm;
pub mod lore;
pub mod orchestrator;
pub mod validator;
pub mod verdict;

#[cfg(test)]
mod testing;

pub use actor::{
    ActorProfile, ActorResponder, ActorState, ApplyReport, Cast, InventoryUpdate, LlmResponder,
    LocationUpdate, NpcResponse, apply_response,
};
pub use config::{GameConfig, LoreConfig, WorldKind};
pub use describe::{BlankDescriber, ItemDescriber, LlmDescriber};
pub use dummy::{DummyLlm, DummySettings};
pub use error::{EngineError, Result};
pub use generate::LoreGenerator;
pub use hooks::{GameHooks, SharedOrchestrator};
pub use llm::{
    ChatOptions, ChatResponse, LlmClient, Message, Role, StructuredResponse, Usage,
    structured_chat_as,
};
pub use lore::{CharacterCard, LORE_FILE, Lore, MEMORY_FILE, World, load_session, new_session};
pub use orchestrator::{TurnOrchestrator, TurnState};
pub use validator::{InputValidator, LlmValidator};
pub use verdict::{ActionType, Verdict};
