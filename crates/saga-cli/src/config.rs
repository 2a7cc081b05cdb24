//! Runtime configuration.
//!
//! Read from `config/saga.toml` (or `--config`). A missing file or section
//! leaves the defaults in place; a malformed file is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use saga_chat::ChatConfig;
use saga_engine::{ChatOptions, DummySettings, GameConfig, LoreConfig};
use serde::{Deserialize, Serialize};

/// Location of the configuration file when `--config` is not given.
pub const DEFAULT_CONFIG: &str = "config/saga.toml";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SagaConfig {
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
    pub game: GameConfig,
    /// Lore generation for `saga new` without `--lore`.
    pub lore: LoreConfig,
    pub chat: ChatSection,
    pub llm: LlmSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Saved games and their index.
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("game/saved_games"),
            log_dir: PathBuf::from("game/logs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSection {
    pub poll_interval_ms: u64,
    pub queue_capacity: usize,
    pub max_input_steps: usize,
    pub quit_keywords: Vec<String>,
}

impl Default for ChatSection {
    fn default() -> Self {
        let chat = ChatConfig::default();
        Self {
            poll_interval_ms: chat.poll_interval.as_millis() as u64,
            queue_capacity: chat.queue_capacity,
            max_input_steps: chat.max_input_steps,
            quit_keywords: chat.quit_keywords,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// Sampling temperature for actors and narration; provider default when
    /// unset.
    pub temperature: Option<f32>,
    /// Length bounds (characters) of the offline model's answers.
    pub min_length: usize,
    pub max_length: usize,
    pub chunk_delay_ms: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        let dummy = DummySettings::default();
        Self {
            temperature: None,
            min_length: dummy.min_length,
            max_length: dummy.max_length,
            chunk_delay_ms: dummy.chunk_delay.as_millis() as u64,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl SagaConfig {
    /// Load the configuration. An explicit path must exist; the default one
    /// may be absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = explicit.unwrap_or_else(|| Path::new(DEFAULT_CONFIG));
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if explicit.is_none() && e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        Self::parse(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn chat_config(&self) -> ChatConfig {
        ChatConfig {
            poll_interval: Duration::from_millis(self.chat.poll_interval_ms.max(1)),
            queue_capacity: self.chat.queue_capacity.max(1),
            max_input_steps: self.chat.max_input_steps.max(1),
            quit_keywords: self.chat.quit_keywords.clone(),
            ..ChatConfig::default()
        }
    }

    pub fn dummy_settings(&self) -> DummySettings {
        let min_length = self.llm.min_length.max(1);
        DummySettings {
            min_length,
            max_length: self.llm.max_length.max(min_length),
            chunk_delay: Duration::from_millis(self.llm.chunk_delay_ms),
        }
    }

    pub fn chat_options(&self) -> ChatOptions {
        ChatOptions {
            temperature: self.llm.temperature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = SagaConfig::parse("").unwrap();
        assert_eq!(config, SagaConfig::default());
        assert_eq!(config.chat_config().quit_keywords, ChatConfig::default().quit_keywords);
    }

    #[test]
    fn sections_override_only_their_keys() {
        let config = SagaConfig::parse(
            r#"
            [paths]
            data_dir = "/tmp/saga"

            [game]
            npc_turn_history = 3
            enable_validator = false

            [chat]
            poll_interval_ms = 25

            [llm]
            temperature = 0.7
            max_length = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.paths.data_dir, PathBuf::from("/tmp/saga"));
        assert_eq!(config.paths.log_dir, PathsConfig::default().log_dir);
        assert_eq!(config.game.npc_turn_history, 3);
        assert!(!config.game.enable_validator);
        assert_eq!(config.chat_config().poll_interval, Duration::from_millis(25));
        assert_eq!(config.chat_config().queue_capacity, 64);
        assert_eq!(config.chat_options().temperature, Some(0.7));

        let dummy = config.dummy_settings();
        assert_eq!(dummy.min_length, 20);
        assert_eq!(dummy.max_length, 20);
    }

    #[test]
    fn lore_section_tunes_generation() {
        let config = SagaConfig::parse(
            r#"
            [lore]
            world_setting = "steampunk"
            world_kind = "funny"
            companions = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.lore.world_setting, "steampunk");
        assert_eq!(config.lore.world_kind, saga_engine::WorldKind::Funny);
        assert_eq!(config.lore.companions, 1);
        assert_eq!(config.lore.kingdoms, LoreConfig::default().kingdoms);
        assert!(SagaConfig::parse("[lore]\nworld_kind = \"grim\"").is_err());
    }

    #[test]
    fn malformed_file_is_rejected() {
        assert!(SagaConfig::parse("[game\nnpc_turn_history = 1").is_err());
        assert!(SagaConfig::parse("[game]\nnpc_turn_history = \"ten\"").is_err());
    }

    #[test]
    fn explicit_config_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(SagaConfig::load(Some(&missing)).is_err());

        std::fs::write(&missing, "[logging]\nlevel = \"debug\"\n").unwrap();
        let config = SagaConfig::load(Some(&missing)).unwrap();
        assert_eq!(config.logging.level, "debug");
    }
}
