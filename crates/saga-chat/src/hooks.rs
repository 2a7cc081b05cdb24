//! Hook registry.
//!
//! Handlers are grouped in three stacks:
//!
//! - [`HookStack::Service`]: slash commands such as `/inventory`, matched
//!   before anything else.
//! - [`HookStack::UserInput`]: the `process_input` step and the
//!   `ai_response` stream.
//! - [`HookStack::PostProcessing`]: `exit` and `response_complete`.
//!
//! Each stack maps a command name to a typed [`Hook`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ChatError, Result};

/// Input step invoked repeatedly until it reports [`InputProcessingStatus::Done`].
pub const PROCESS_INPUT: &str = "process_input";
/// Stream hook producing the final response of a turn.
pub const AI_RESPONSE: &str = "ai_response";
/// Post-processing hook run when the session ends.
pub const EXIT: &str = "exit";
/// Post-processing hook receiving the full text of a completed stream.
pub const RESPONSE_COMPLETE: &str = "response_complete";

// ---------------------------------------------------------------------------
// Stacks
// ---------------------------------------------------------------------------

/// The three hook stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookStack {
    Service,
    UserInput,
    PostProcessing,
}

impl HookStack {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::UserInput => "user_input",
            Self::PostProcessing => "post_processing",
        }
    }
}

impl fmt::Display for HookStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookStack {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "service" => Ok(Self::Service),
            "user_input" => Ok(Self::UserInput),
            "post_processing" => Ok(Self::PostProcessing),
            other => Err(ChatError::UnknownStack(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Hook responses
// ---------------------------------------------------------------------------

/// How a message returned by an input step should be presented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Success,
    Warning,
    Error,
}

/// Whether input processing needs another step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputProcessingStatus {
    #[default]
    Continue,
    Done,
}

/// Result of one input-processing step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub message_status: MessageStatus,
    #[serde(default)]
    pub input_processing_status: InputProcessingStatus,
}

fn default_role() -> String {
    "GAME".to_string()
}

impl Default for HookResponse {
    fn default() -> Self {
        Self {
            message: String::new(),
            role: default_role(),
            message_status: MessageStatus::default(),
            input_processing_status: InputProcessingStatus::default(),
        }
    }
}

impl HookResponse {
    /// A non-terminal step carrying `message` from `role`.
    pub fn step(role: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            role: role.into(),
            ..Self::default()
        }
    }

    /// A terminal step with no message.
    pub fn done() -> Self {
        Self {
            input_processing_status: InputProcessingStatus::Done,
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.message_status = status;
        self
    }

    pub fn finished(mut self) -> Self {
        self.input_processing_status = InputProcessingStatus::Done;
        self
    }

    pub fn is_done(&self) -> bool {
        self.input_processing_status == InputProcessingStatus::Done
    }
}

// ---------------------------------------------------------------------------
// Handler traits
// ---------------------------------------------------------------------------

/// Fragments of a streamed response.
pub type FragmentStream = BoxStream<'static, Result<String>>;

/// Service and post-processing handler.
///
/// Receives the words following the command; an optional returned message
/// is shown to the player.
#[async_trait]
pub trait CommandHook: Send + Sync {
    async fn call(&self, args: Vec<String>) -> Result<Option<String>>;
}

#[async_trait]
impl<F> CommandHook for F
where
    F: Fn(Vec<String>) -> Result<Option<String>> + Send + Sync,
{
    async fn call(&self, args: Vec<String>) -> Result<Option<String>> {
        self(args)
    }
}

/// The `process_input` step.
#[async_trait]
pub trait InputHook: Send + Sync {
    async fn process(&self, input: &str) -> Result<HookResponse>;

    /// The pipeline gave up on the line before a `Done` response. Any
    /// per-line state should be dropped so the next line starts fresh.
    async fn abandon(&self) {}
}

/// The `ai_response` step.
///
/// `open` runs on the foreground task; the returned stream is then driven
/// by a background worker.
#[async_trait]
pub trait StreamHook: Send + Sync {
    async fn open(&self, responses: Vec<HookResponse>) -> Result<FragmentStream>;
}

/// A registered handler.
#[derive(Clone)]
pub enum Hook {
    Command(Arc<dyn CommandHook>),
    Input(Arc<dyn InputHook>),
    Stream(Arc<dyn StreamHook>),
}

impl Hook {
    pub fn command(hook: impl CommandHook + 'static) -> Self {
        Self::Command(Arc::new(hook))
    }

    /// Wrap a plain closure as a command hook.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Vec<String>) -> Result<Option<String>> + Send + Sync + 'static,
    {
        Self::Command(Arc::new(f))
    }

    pub fn input(hook: impl InputHook + 'static) -> Self {
        Self::Input(Arc::new(hook))
    }

    pub fn stream(hook: impl StreamHook + 'static) -> Self {
        Self::Stream(Arc::new(hook))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Command(_) => "command",
            Self::Input(_) => "input",
            Self::Stream(_) => "stream",
        }
    }

    /// Whether this hook kind may be registered as `command` on `stack`.
    fn fits(&self, stack: HookStack, command: &str) -> bool {
        match (stack, self) {
            (HookStack::Service | HookStack::PostProcessing, Self::Command(_)) => true,
            (HookStack::UserInput, Self::Input(_)) => command != AI_RESPONSE,
            (HookStack::UserInput, Self::Stream(_)) => command != PROCESS_INPUT,
            _ => false,
        }
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hook::{}", self.kind())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Stack → command → handler.
#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    stacks: HashMap<HookStack, HashMap<String, Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `hook` as `command` on `stack`, replacing any previous one.
    pub fn register(&mut self, stack: HookStack, command: impl Into<String>, hook: Hook) -> Result<()> {
        let command = command.into();
        if !hook.fits(stack, &command) {
            return Err(ChatError::HookKindMismatch {
                stack,
                command,
                kind: hook.kind(),
            });
        }

        let previous = self
            .stacks
            .entry(stack)
            .or_default()
            .insert(command.clone(), hook);
        if previous.is_some() {
            debug!(stack = %stack, command = %command, "hook replaced");
        } else {
            debug!(stack = %stack, command = %command, "hook registered");
        }
        Ok(())
    }

    /// Register using a stack name such as `"post_processing"`.
    pub fn register_named(&mut self, stack: &str, command: impl Into<String>, hook: Hook) -> Result<()> {
        self.register(stack.parse()?, command, hook)
    }

    pub fn get(&self, stack: HookStack, command: &str) -> Option<&Hook> {
        self.stacks.get(&stack)?.get(command)
    }

    pub fn contains(&self, stack: HookStack, command: &str) -> bool {
        self.get(stack, command).is_some()
    }

    pub fn command(&self, stack: HookStack, command: &str) -> Option<Arc<dyn CommandHook>> {
        match self.get(stack, command)? {
            Hook::Command(h) => Some(Arc::clone(h)),
            _ => None,
        }
    }

    pub fn input(&self, command: &str) -> Option<Arc<dyn InputHook>> {
        match self.get(HookStack::UserInput, command)? {
            Hook::Input(h) => Some(Arc::clone(h)),
            _ => None,
        }
    }

    pub fn stream(&self, command: &str) -> Option<Arc<dyn StreamHook>> {
        match self.get(HookStack::UserInput, command)? {
            Hook::Stream(h) => Some(Arc::clone(h)),
            _ => None,
        }
    }

    /// Command names registered on `stack`, sorted.
    pub fn commands(&self, stack: HookStack) -> Vec<String> {
        let mut names: Vec<String> = self
            .stacks
            .get(&stack)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}
