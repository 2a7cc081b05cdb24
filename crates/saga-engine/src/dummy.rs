//! Offline stand-in for a language model.
//!
//! [`DummyLlm`] produces random sentences from a fixed word pool, streams
//! them in small chunks with a delay, and fills structured requests by
//! walking the JSON schema. It lets the whole game loop run without a
//! provider.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use saga_chat::FragmentStream;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::llm::{
    ChatOptions, ChatResponse, LlmClient, Message, StructuredResponse, Usage, prompt_words,
};

const WORD_POOL: &[&str] = &[
    "The", "quick", "brown", "fox", "jumps", "over", "the", "lazy", "dog", "sword", "castle",
    "torch", "whisper", "road", "ancient", "tavern", "shadow", "coin", "river", "hello", "world",
];

/// Tunables of [`DummyLlm`].
#[derive(Debug, Clone, Copy)]
pub struct DummySettings {
    /// Bounds (in characters) of a generated answer.
    pub min_length: usize,
    pub max_length: usize,
    /// Delay between streamed chunks.
    pub chunk_delay: Duration,
}

impl Default for DummySettings {
    fn default() -> Self {
        Self {
            min_length: 20,
            max_length: 80,
            chunk_delay: Duration::from_millis(50),
        }
    }
}

/// A fake model with random output.
pub struct DummyLlm {
    settings: DummySettings,
    rng: Mutex<StdRng>,
}

impl DummyLlm {
    pub fn new(settings: DummySettings) -> Self {
        Self {
            settings,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Reproducible output for a given seed.
    pub fn seeded(settings: DummySettings, seed: u64) -> Self {
        Self {
            settings,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut rng)
    }

    /// Random words until the target length is filled.
    fn sentence(&self) -> String {
        let min = self.settings.min_length.max(1);
        let max = self.settings.max_length.max(min);
        self.with_rng(|rng| {
            let mut remaining = rng.gen_range(min..=max);
            let mut words: Vec<&str> = Vec::new();
            let shortest = WORD_POOL.iter().map(|w| w.len()).min().unwrap_or(1);
            while remaining > shortest {
                let Some(word) = WORD_POOL.choose(rng) else { break };
                let cost = word.len() + usize::from(!words.is_empty());
                if cost <= remaining {
                    words.push(*word);
                    remaining -= cost;
                }
            }
            words.join(" ")
        })
    }

    /// Split `text` into chunks of 1 to 5 characters.
    fn chunks(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        self.with_rng(|rng| {
            let mut out = Vec::new();
            let mut position = 0;
            while position < chars.len() {
                let end = (position + rng.gen_range(1..=5)).min(chars.len());
                out.push(chars[position..end].iter().collect());
                position = end;
            }
            out
        })
    }

    fn usage(&self, messages: &[Message], answer: &str) -> Usage {
        let prompt_tokens = prompt_words(messages);
        self.with_rng(|rng| Usage {
            prompt_tokens,
            eval_tokens: u32::try_from(answer.split_whitespace().count()).unwrap_or(u32::MAX),
            prompt_eval_duration_ms: rng.gen_range(1..=100),
            eval_duration_ms: rng.gen_range(1..=100),
        })
    }

    /// A value shaped like `schema`.
    ///
    /// Booleans are always `true` so a dummy validator lets every action
    /// through as a valid game action.
    fn fake_value(&self, schema: &Value) -> Value {
        if let Some(options) = schema.get("enum").and_then(Value::as_array) {
            return self
                .with_rng(|rng| options.choose(rng).cloned())
                .unwrap_or(Value::Null);
        }
        match schema.get("type").and_then(Value::as_str) {
            Some("object") => {
                let mut object = Map::new();
                if let Some(props) = schema.get("properties").and_then(Value::as_object) {
                    for (name, prop) in props {
                        object.insert(name.clone(), self.fake_value(prop));
                    }
                }
                Value::Object(object)
            }
            Some("array") => {
                let bound = |key: &str| {
                    schema
                        .get(key)
                        .and_then(Value::as_u64)
                        .and_then(|n| usize::try_from(n).ok())
                };
                let min = bound("minItems").unwrap_or(0);
                let max = bound("maxItems").unwrap_or(min + 2).max(min);
                let n = self.with_rng(|rng| rng.gen_range(min..=max));
                let item = schema.get("items").cloned().unwrap_or(Value::Null);
                Value::Array((0..n).map(|_| self.fake_value(&item)).collect())
            }
            Some("boolean") => Value::Bool(true),
            Some("integer") => Value::from(self.with_rng(|rng| rng.gen_range(1..=3))),
            Some("number") => Value::from(self.with_rng(|rng| rng.gen_range(0.0..1.0))),
            Some("string") => Value::String(self.sentence()),
            _ => Value::Null,
        }
    }
}

impl Default for DummyLlm {
    fn default() -> Self {
        Self::new(DummySettings::default())
    }
}

#[async_trait]
impl LlmClient for DummyLlm {
    async fn chat(&self, messages: &[Message], _options: ChatOptions) -> Result<ChatResponse> {
        let message = self.sentence();
        let stats = self.usage(messages, &message);
        Ok(ChatResponse { message, stats })
    }

    async fn stream_chat(
        &self,
        _messages: &[Message],
        _options: ChatOptions,
    ) -> Result<FragmentStream> {
        let chunks = self.chunks(&self.sentence());
        let delay = self.settings.chunk_delay;
        let fragments = stream::iter(chunks).then(move |chunk| async move {
            tokio::time::sleep(delay).await;
            Ok::<_, saga_chat::ChatError>(chunk)
        });
        Ok(fragments.boxed())
    }

    async fn structured_chat(
        &self,
        messages: &[Message],
        schema: &Value,
        _options: ChatOptions,
    ) -> Result<StructuredResponse> {
        let message = self.fake_value(schema);
        let stats = self.usage(messages, &message.to_string());
        Ok(StructuredResponse { message, stats })
    }
}
