//! Scripted model used by the unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use saga_chat::FragmentStream;
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::llm::{ChatOptions, ChatResponse, LlmClient, Message, StructuredResponse, Usage};

/// Replays canned answers and records every prompt it receives.
#[derive(Default)]
pub struct ScriptedLlm {
    structured: Mutex<VecDeque<Value>>,
    fragments: Vec<String>,
    prompts: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlm {
    /// Structured answers, returned in order.
    pub fn structured(answers: impl IntoIterator<Item = Value>) -> Self {
        Self {
            structured: Mutex::new(answers.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Text answers; `chat` returns their concatenation.
    pub fn text<S: Into<String>>(fragments: impl IntoIterator<Item = S>) -> Self {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Adds text answers to a scripted model.
    pub fn with_text<S: Into<String>>(mut self, fragments: impl IntoIterator<Item = S>) -> Self {
        self.fragments = fragments.into_iter().map(Into::into).collect();
        self
    }

    fn record(&self, messages: &[Message]) {
        self.prompts.lock().unwrap().push(messages.to_vec());
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    /// Contents of the latest prompt, joined by newlines.
    pub fn last_prompt(&self) -> String {
        self.prompts
            .lock()
            .unwrap()
            .last()
            .map(|m| {
                m.iter()
                    .map(|m| m.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(&self, messages: &[Message], _options: ChatOptions) -> Result<ChatResponse> {
        self.record(messages);
        Ok(ChatResponse {
            message: self.fragments.concat(),
            stats: Usage::default(),
        })
    }

    async fn stream_chat(
        &self,
        messages: &[Message],
        _options: ChatOptions,
    ) -> Result<FragmentStream> {
        self.record(messages);
        let fragments: Vec<saga_chat::Result<String>> =
            self.fragments.iter().cloned().map(Ok).collect();
        Ok(stream::iter(fragments).boxed())
    }

    async fn structured_chat(
        &self,
        messages: &[Message],
        _schema: &Value,
        _options: ChatOptions,
    ) -> Result<StructuredResponse> {
        self.record(messages);
        let next = self.structured.lock().unwrap().pop_front();
        match next {
            Some(message) => Ok(StructuredResponse {
                message,
                stats: Usage::default(),
            }),
            None => Err(EngineError::LlmRequestFailed {
                reason: "no scripted answer left".into(),
            }),
        }
    }
}
