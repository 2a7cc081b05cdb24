//! Shared helpers for the CLI.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use saga_engine::Lore;
use saga_store::GameMemory;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Name of the log file for `date`; one file per day.
pub fn log_file_name(date: NaiveDate) -> String {
    format!("game-log_{}.log", date.format("%Y-%m-%d"))
}

/// Send tracing output to today's log file under `log_dir`.
///
/// The terminal belongs to the game, so nothing is logged to stdout.
pub fn init_tracing(log_dir: &Path, default_level: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;
    let path = log_dir.join(log_file_name(Local::now().date_naive()));
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .compact()
        .with_writer(Mutex::new(file))
        .init();

    Ok(path)
}

// ---------------------------------------------------------------------------
// Session display
// ---------------------------------------------------------------------------

/// Text shown before the first prompt: the world and the latest narration.
pub async fn opening_text(lore: &Lore, memory: &GameMemory) -> Result<String> {
    let mut text = format!("{}\n{}", lore.world.name, lore.world.description);
    if let Some(turn) = memory.most_recent_turn_record().await?
        && !turn.ai_response.is_empty()
    {
        text.push_str("\n\n");
        text.push_str(&turn.ai_response);
    }
    Ok(text)
}
