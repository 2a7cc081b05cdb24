//! Catalog descriptions for items that appear mid-game.

use std::sync::Arc;

use async_trait::async_trait;
use saga_store::ItemDescriptor;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::llm::{ChatOptions, LlmClient, Message, structured_chat_as};

/// Produces an [`ItemDescriptor`] for an item name.
///
/// Never fails: when no description can be produced a blank descriptor
/// carrying only the name is returned.
#[async_trait]
pub trait ItemDescriber: Send + Sync {
    async fn describe(&self, item: &str) -> ItemDescriptor;
}

/// Always returns [`ItemDescriptor::blank`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BlankDescriber;

#[async_trait]
impl ItemDescriber for BlankDescriber {
    async fn describe(&self, item: &str) -> ItemDescriptor {
        ItemDescriptor::blank(item)
    }
}

/// Asks the model to describe the item.
pub struct LlmDescriber {
    client: Arc<dyn LlmClient>,
    options: ChatOptions,
}

impl LlmDescriber {
    pub fn new(client: Arc<dyn LlmClient>, temperature: f32) -> Self {
        Self {
            client,
            options: ChatOptions::with_temperature(temperature),
        }
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "description": "Object's name"},
                "type": {"type": "string", "description": "Type of the object"},
                "description": {"type": "string", "description": "Object description"},
                "action": {"type": "string", "description": "How this object works"},
                "strength": {"type": "string", "description": "Strength of the object"}
            },
            "required": ["name", "type"]
        })
    }
}

#[async_trait]
impl ItemDescriber for LlmDescriber {
    async fn describe(&self, item: &str) -> ItemDescriptor {
        let schema = Self::schema();
        let messages = [
            Message::json_schema(&schema),
            Message::system("You describe objects found in a role-playing game world."),
            Message::user(format!(
                "Describe the object \"{item}\": its type, what it looks like, how it works \
                 and how strong it is."
            )),
        ];
        let answer = structured_chat_as::<ItemDescriptor>(
            self.client.as_ref(),
            &messages,
            &schema,
            self.options,
        )
        .await;
        match answer {
            Ok((mut descriptor, _)) => {
                info!(item, kind = %descriptor.item_type, "item described");
                descriptor.name = item.to_string();
                descriptor
            }
            Err(e) => {
                warn!(item, error = %e, "could not describe item, using a blank descriptor");
                ItemDescriptor::blank(item)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedLlm;

    #[tokio::test]
    async fn model_description_keeps_the_requested_name() {
        let llm = Arc::new(ScriptedLlm::structured([json!({
            "name": "Rope",
            "type": "tool",
            "description": "hemp, ten paces"
        })]));
        let describer = LlmDescriber::new(llm, 0.25);
        let d = describer.describe("rope").await;
        assert_eq!(d.name, "rope");
        assert_eq!(d.item_type, "tool");
        assert_eq!(d.description, "hemp, ten paces");
        assert_eq!(d.strength, "");
    }

    #[tokio::test]
    async fn failure_falls_back_to_blank() {
        let llm = Arc::new(ScriptedLlm::structured([]));
        let describer = LlmDescriber::new(llm, 0.25);
        assert_eq!(describer.describe("lantern").await, ItemDescriptor::blank("lantern"));
    }

    #[tokio::test]
    async fn unparseable_description_falls_back_to_blank() {
        let llm = Arc::new(ScriptedLlm::structured([json!(["not", "an", "object"])]));
        let describer = LlmDescriber::new(llm, 0.25);
        assert_eq!(describer.describe("map").await, ItemDescriptor::blank("map"));
    }
}
