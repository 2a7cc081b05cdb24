//! Provider-agnostic LLM interface.
//!
//! The engine never talks to a provider directly. Every collaborator
//! (validator, actors, item describer, narrator) goes through
//! [`LlmClient`], so a real backend, the bundled [`crate::dummy::DummyLlm`]
//! or a test double can be swapped in.

use async_trait::async_trait;
use saga_chat::FragmentStream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The role of a participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single prompt message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// A system message asking for JSON that follows `schema`.
    pub fn json_schema(schema: &Value) -> Self {
        Self::system(format!(
            "Respond with a JSON object that strictly follows: {schema}"
        ))
    }
}

/// Per-call sampling options.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
}

impl ChatOptions {
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature: Some(temperature),
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Token and timing counters reported with a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub eval_tokens: u32,
    pub prompt_eval_duration_ms: u64,
    pub eval_duration_ms: u64,
}

/// A plain-text answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: String,
    #[serde(default)]
    pub stats: Usage,
}

/// A JSON answer produced against a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredResponse {
    pub message: Value,
    #[serde(default)]
    pub stats: Usage,
}

// ---------------------------------------------------------------------------
// Client trait
// ---------------------------------------------------------------------------

/// A language model backend.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// One complete answer.
    async fn chat(&self, messages: &[Message], options: ChatOptions) -> Result<ChatResponse>;

    /// The answer as a stream of text fragments.
    async fn stream_chat(
        &self,
        messages: &[Message],
        options: ChatOptions,
    ) -> Result<FragmentStream>;

    /// A JSON answer following `schema`.
    async fn structured_chat(
        &self,
        messages: &[Message],
        schema: &Value,
        options: ChatOptions,
    ) -> Result<StructuredResponse>;
}

/// [`LlmClient::structured_chat`] decoded into `T`.
///
/// A response that does not deserialize is reported as
/// [`EngineError::LlmParseFailed`].
pub async fn structured_chat_as<T>(
    client: &dyn LlmClient,
    messages: &[Message],
    schema: &Value,
    options: ChatOptions,
) -> Result<(T, Usage)>
where
    T: DeserializeOwned,
{
    let response = client.structured_chat(messages, schema, options).await?;
    // serde decodes structs from arrays positionally; an object schema must
    // get an object back.
    if schema.get("type").and_then(Value::as_str) == Some("object") && !response.message.is_object()
    {
        return Err(EngineError::parse(format!(
            "expected a JSON object, got {}",
            response.message
        )));
    }
    let value = serde_json::from_value(response.message).map_err(EngineError::parse)?;
    Ok((value, response.stats))
}

/// Rough word count of a prompt, used for reporting only.
pub fn prompt_words(messages: &[Message]) -> u32 {
    let words: usize = messages
        .iter()
        .map(|m| m.content.split_whitespace().count())
        .sum();
    u32::try_from(words).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialize_lowercase() {
        let m = Message::user("hi");
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hi");
    }

    #[test]
    fn schema_message_embeds_the_schema() {
        let schema = serde_json::json!({"type": "object"});
        let m = Message::json_schema(&schema);
        assert_eq!(m.role, Role::System);
        assert!(m.content.ends_with(r#"{"type":"object"}"#));
    }

    #[derive(Debug, Deserialize)]
    struct Pair {
        left: String,
        right: String,
    }

    #[tokio::test]
    async fn array_answer_to_an_object_schema_is_a_parse_error() {
        let schema = serde_json::json!({"type": "object"});
        let llm = crate::testing::ScriptedLlm::structured([serde_json::json!(["a", "b"])]);
        let err = structured_chat_as::<Pair>(&llm, &[], &schema, ChatOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::LlmParseFailed { .. }));
    }

    #[tokio::test]
    async fn object_answer_is_decoded() {
        let schema = serde_json::json!({"type": "object"});
        let llm = crate::testing::ScriptedLlm::structured([
            serde_json::json!({"left": "a", "right": "b"}),
        ]);
        let (pair, _) = structured_chat_as::<Pair>(&llm, &[], &schema, ChatOptions::default())
            .await
            .unwrap();
        assert_eq!((pair.left.as_str(), pair.right.as_str()), ("a", "b"));
    }

    #[test]
    fn prompt_words_counts_all_messages() {
        let messages = [Message::system("one two"), Message::user("three")];
        assert_eq!(prompt_words(&messages), 3);
    }
}
