//! Index of saved games.
//!
//! `games.json` in the data directory lists every game; each game owns a
//! folder next to it holding the lore and the memory database.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

pub const INDEX_FILE: &str = "games.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEntry {
    pub id: String,
    pub datetime_utc: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
    /// Relative to the data directory.
    pub folder: PathBuf,
}

#[derive(Debug)]
pub struct GameIndex {
    data_dir: PathBuf,
    games: Vec<GameEntry>,
}

impl GameIndex {
    /// Read the index under `data_dir`, creating the directory if needed.
    pub fn load(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        if !data_dir.exists() {
            warn!(dir = %data_dir.display(), "data directory does not exist, creating it");
            std::fs::create_dir_all(&data_dir)
                .with_context(|| format!("failed to create {}", data_dir.display()))?;
        }

        let path = data_dir.join(INDEX_FILE);
        let games = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("corrupt game index {}", path.display()))?
        } else {
            Vec::new()
        };

        Ok(Self { data_dir, games })
    }

    pub fn games(&self) -> &[GameEntry] {
        &self.games
    }

    /// Register a new game, create its folder and persist the index.
    pub fn add_new_game(&mut self, description: &str) -> Result<GameEntry> {
        let id = Uuid::now_v7().simple().to_string();
        let entry = GameEntry {
            folder: PathBuf::from(&id),
            id,
            datetime_utc: Utc::now(),
            description: description.to_string(),
        };

        let folder = self.folder(&entry);
        std::fs::create_dir_all(&folder)
            .with_context(|| format!("failed to create {}", folder.display()))?;

        self.games.push(entry.clone());
        self.save()?;
        info!(id = %entry.id, "new game registered");
        Ok(entry)
    }

    /// Drop a game from the index. Its folder is left on disk.
    pub fn remove(&mut self, id: &str) -> Result<bool> {
        let before = self.games.len();
        self.games.retain(|g| g.id != id);
        if self.games.len() == before {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    /// The most recently created game.
    pub fn latest(&self) -> Option<&GameEntry> {
        self.games.iter().max_by_key(|g| g.datetime_utc)
    }

    /// Look a game up by id or by an unambiguous id prefix.
    pub fn find(&self, id: &str) -> Result<Option<&GameEntry>> {
        if let Some(exact) = self.games.iter().find(|g| g.id == id) {
            return Ok(Some(exact));
        }
        let mut matches = self.games.iter().filter(|g| g.id.starts_with(id));
        match (matches.next(), matches.next()) {
            (Some(entry), None) => Ok(Some(entry)),
            (None, _) => Ok(None),
            (Some(_), Some(_)) => bail!("game id prefix '{id}' is ambiguous"),
        }
    }

    pub fn folder(&self, entry: &GameEntry) -> PathBuf {
        self.data_dir.join(&entry.folder)
    }

    pub fn save(&self) -> Result<()> {
        let path = self.index_path();
        let content = serde_json::to_string_pretty(&self.games)?;
        std::fs::write(&path, content)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    fn index_path(&self) -> PathBuf {
        self.data_dir.join(INDEX_FILE)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}
