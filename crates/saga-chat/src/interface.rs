//! The interactive chat loop.
//!
//! Each submitted line goes through, in order:
//!
//! 1. quit keywords, which end the session;
//! 2. service commands (`/help`, `/inventory`, ...), dispatched to the
//!    service stack;
//! 3. the `process_input` step, repeated until it reports `Done`;
//! 4. the `ai_response` stream, shown while it is generated;
//! 5. the `response_complete` post-processing hook with the full text.
//!
//! Hook failures are shown inline and never end the session.

use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::display::{DisplaySurface, InputSource};
use crate::error::{ChatError, Result};
use crate::hooks::{
    AI_RESPONSE, EXIT, HookRegistry, HookResponse, HookStack, PROCESS_INPUT, RESPONSE_COMPLETE,
};
use crate::stream::{StreamOutcome, StreamSettings, display_streaming_response};

/// Behaviour of the chat loop.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// How long the foreground waits for a fragment before polling again.
    pub poll_interval: Duration,
    /// Capacity of the worker → foreground channel.
    pub queue_capacity: usize,
    /// Upper bound on `process_input` calls for one line.
    pub max_input_steps: usize,
    /// Lines (case-insensitive) that end the session.
    pub quit_keywords: Vec<String>,
    /// Built-in service prefixes; registered service commands are added.
    pub service_commands: Vec<String>,
    pub welcome: String,
    pub farewell: String,
    /// Title shown above streamed responses.
    pub stream_title: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            queue_capacity: 64,
            max_input_steps: 32,
            quit_keywords: ["--exit", "--quit", "!q:"].map(String::from).to_vec(),
            service_commands: ["/help", "/inventory", "/stats"].map(String::from).to_vec(),
            welcome: "Welcome to the RPG Chat!".into(),
            farewell: "Chat session ended.".into(),
            stream_title: "GAME".into(),
        }
    }
}

/// What handling one line amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// Blank line, nothing done.
    Ignored,
    /// A quit keyword.
    Quit,
    /// A service command (known or not).
    Service,
    /// A game turn; `None` when it stopped before streaming.
    Turn(Option<StreamOutcome>),
}

/// Hook-driven chat session over a display surface.
pub struct ChatInterface<D> {
    hooks: HookRegistry,
    display: D,
    config: ChatConfig,
}

impl<D: DisplaySurface> ChatInterface<D> {
    pub fn new(hooks: HookRegistry, display: D, config: ChatConfig) -> Self {
        Self {
            hooks,
            display,
            config,
        }
    }

    pub fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn into_display(self) -> D {
        self.display
    }

    /// Run until a quit keyword or the end of input.
    ///
    /// The `exit` post-processing hook runs on the way out if registered.
    pub async fn run<I>(&mut self, input: &mut I) -> Result<()>
    where
        I: InputSource + ?Sized,
    {
        self.display.system(&self.config.welcome)?;
        info!("chat loop started");

        loop {
            let Some(line) = input.next_line().await? else {
                info!("input closed");
                break;
            };
            if self.handle_line(&line).await? == LineOutcome::Quit {
                info!("quit requested");
                break;
            }
        }

        self.run_exit_hook().await?;
        self.display.system(&self.config.farewell)?;
        info!("chat loop ended");
        Ok(())
    }

    /// Handle one submitted line.
    pub async fn handle_line(&mut self, line: &str) -> Result<LineOutcome> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(LineOutcome::Ignored);
        }
        if self.is_quit(line) {
            return Ok(LineOutcome::Quit);
        }
        if self.is_service_command(line) {
            self.run_service_command(line).await?;
            return Ok(LineOutcome::Service);
        }
        Ok(LineOutcome::Turn(self.run_turn(line).await?))
    }

    fn is_quit(&self, line: &str) -> bool {
        let lower = line.to_lowercase();
        self.config.quit_keywords.iter().any(|k| *k == lower)
    }

    fn is_service_command(&self, line: &str) -> bool {
        self.config
            .service_commands
            .iter()
            .chain(&self.hooks.commands(HookStack::Service))
            .any(|prefix| line.starts_with(prefix.as_str()))
    }

    #[instrument(skip(self))]
    async fn run_service_command(&mut self, line: &str) -> Result<()> {
        let mut words = line.split_whitespace().map(String::from);
        let Some(command) = words.next() else {
            return Ok(());
        };
        let args: Vec<String> = words.collect();

        let Some(hook) = self.hooks.command(HookStack::Service, &command) else {
            self.display.error(&format!("Unknown command: {command}"))?;
            return Ok(());
        };
        match hook.call(args).await {
            Ok(Some(text)) => self.display.service(&text)?,
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "service command failed");
                self.display.error(&e.to_string())?;
            }
        }
        Ok(())
    }

    /// `process_input` until done, then the streamed response.
    #[instrument(skip(self))]
    async fn run_turn(&mut self, line: &str) -> Result<Option<StreamOutcome>> {
        let Some(responses) = self.process_input(line).await? else {
            return Ok(None);
        };

        let Some(hook) = self.hooks.stream(AI_RESPONSE) else {
            debug!("no ai_response hook registered");
            return Ok(None);
        };
        let fragments = match hook.open(responses).await {
            Ok(fragments) => fragments,
            Err(e) => {
                warn!(error = %e, "could not start response");
                self.display.error(&e.to_string())?;
                return Ok(None);
            }
        };

        let settings = StreamSettings {
            poll_interval: self.config.poll_interval,
            capacity: self.config.queue_capacity,
        };
        let outcome = display_streaming_response(
            &mut self.display,
            fragments,
            &self.config.stream_title,
            settings,
        )
        .await?;

        if outcome.is_complete() {
            self.run_response_complete(&outcome.text).await?;
        }
        Ok(Some(outcome))
    }

    /// Collect every step's response; `None` if processing failed.
    async fn process_input(&mut self, line: &str) -> Result<Option<Vec<HookResponse>>> {
        let Some(hook) = self.hooks.input(PROCESS_INPUT) else {
            debug!("no process_input hook, passing the line through");
            return Ok(Some(vec![HookResponse::step("human", line).finished()]));
        };

        let mut responses = Vec::new();
        for step in 0..self.config.max_input_steps {
            let response = match hook.process(line).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(step, error = %e, "input processing failed");
                    self.display.error(&e.to_string())?;
                    return Ok(None);
                }
            };
            if !response.message.is_empty() {
                self.display
                    .message(&response.role, &response.message, response.message_status)?;
            }
            let done = response.is_done();
            responses.push(response);
            if done {
                debug!(steps = step + 1, "input processed");
                return Ok(Some(responses));
            }
        }

        let err = ChatError::InputSteps(self.config.max_input_steps);
        warn!(error = %err, "giving up on input");
        hook.abandon().await;
        self.display.error(&err.to_string())?;
        Ok(None)
    }

    async fn run_response_complete(&mut self, text: &str) -> Result<()> {
        let Some(hook) = self.hooks.command(HookStack::PostProcessing, RESPONSE_COMPLETE) else {
            return Ok(());
        };
        match hook.call(vec![text.to_string()]).await {
            Ok(Some(note)) => self.display.service(&note)?,
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "response_complete hook failed");
                self.display.error(&e.to_string())?;
            }
        }
        Ok(())
    }

    async fn run_exit_hook(&mut self) -> Result<()> {
        let Some(hook) = self.hooks.command(HookStack::PostProcessing, EXIT) else {
            return Ok(());
        };
        match hook.call(Vec::new()).await {
            Ok(Some(note)) => self.display.service(&note)?,
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "exit hook failed");
                self.display.error(&e.to_string())?;
            }
        }
        Ok(())
    }
}
