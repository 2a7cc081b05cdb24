//! Input validation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::llm::{ChatOptions, LlmClient, Message, structured_chat_as};
use crate::verdict::Verdict;

/// Decides whether a line of player input is a game action and whether the
/// world allows it.
#[async_trait]
pub trait InputValidator: Send + Sync {
    /// `context` is the latest narration; `inventory` lists what the player
    /// holds.
    async fn validate(
        &self,
        action: &str,
        context: &str,
        inventory: &[String],
        extra: Option<&str>,
    ) -> Result<Verdict>;
}

/// Validator backed by a structured model call.
pub struct LlmValidator {
    client: Arc<dyn LlmClient>,
    world_rules: String,
    options: ChatOptions,
}

impl LlmValidator {
    pub fn new(client: Arc<dyn LlmClient>, world_rules: impl Into<String>) -> Self {
        Self {
            client,
            world_rules: world_rules.into(),
            options: ChatOptions::with_temperature(0.0),
        }
    }

    fn messages(
        &self,
        action: &str,
        context: &str,
        inventory: &[String],
        extra: Option<&str>,
    ) -> Vec<Message> {
        let schema = Verdict::schema();
        let system = format!(
            "You are the referee of a role-playing game. Decide whether the player's input \
             is an action inside the game world, and whether the world rules allow it.\n\
             World rules:\n{}",
            self.world_rules
        );
        let mut task = format!(
            "Situation: {context}\nPlayer inventory: {}\nPlayer input: {action}",
            if inventory.is_empty() {
                "(empty)".to_string()
            } else {
                inventory.join(", ")
            }
        );
        if let Some(extra) = extra {
            task.push_str("\nAdditional context: ");
            task.push_str(extra);
        }
        vec![Message::json_schema(&schema), Message::system(system), Message::user(task)]
    }
}

#[async_trait]
impl InputValidator for LlmValidator {
    #[instrument(skip(self, context, inventory, extra))]
    async fn validate(
        &self,
        action: &str,
        context: &str,
        inventory: &[String],
        extra: Option<&str>,
    ) -> Result<Verdict> {
        let messages = self.messages(action, context, inventory, extra);
        let (verdict, stats): (Verdict, _) = structured_chat_as(
            self.client.as_ref(),
            &messages,
            &Verdict::schema(),
            self.options,
        )
        .await?;
        debug!(
            is_game_action = verdict.is_game_action,
            valid = verdict.valid,
            prompt_tokens = stats.prompt_tokens,
            "input classified"
        );
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::EngineError;
    use crate::testing::ScriptedLlm;

    #[tokio::test]
    async fn decodes_the_model_verdict() {
        let llm = Arc::new(ScriptedLlm::structured([json!({
            "is_game_action": false,
            "valid": false,
            "reasons": ["lore question"]
        })]));
        let validator = LlmValidator::new(llm.clone(), "no magic");
        let verdict = validator
            .validate("who rules the north?", "a cold road", &["torch".into()], None)
            .await
            .unwrap();

        assert!(!verdict.is_game_action);
        assert_eq!(verdict.reasons, vec!["lore question".to_string()]);

        let prompt = llm.last_prompt();
        assert!(prompt.contains("no magic"));
        assert!(prompt.contains("Player inventory: torch"));
        assert!(prompt.contains("who rules the north?"));
    }

    #[tokio::test]
    async fn malformed_answer_is_a_parse_error() {
        let llm = Arc::new(ScriptedLlm::structured([json!({"valid": "maybe"})]));
        let validator = LlmValidator::new(llm, "");
        let err = validator.validate("jump", "", &[], None).await.unwrap_err();
        assert!(matches!(err, EngineError::LlmParseFailed { .. }));
    }
}
