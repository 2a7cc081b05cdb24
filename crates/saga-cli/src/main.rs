//! CLI entry point for saga.
//!
//! The `saga` command starts, resumes and lists games. A session wires the
//! game memory, the turn orchestrator and the chat pipeline to the terminal.

mod cli;
mod config;
mod games;
mod helpers;
mod terminal;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use saga_chat::{ChatInterface, DisplaySurface, HookRegistry};
use saga_engine::{
    DummyLlm, GameHooks, LORE_FILE, LlmClient, LlmDescriber, LlmResponder, LlmValidator, Lore,
    LoreGenerator, MEMORY_FILE, TurnOrchestrator, load_session, new_session,
};
use saga_store::GameMemory;
use tracing::{error, info};

use crate::cli::{Cli, Commands};
use crate::config::SagaConfig;
use crate::games::GameIndex;
use crate::terminal::{StdinLines, TerminalDisplay};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = dotenvy::dotenv()
        && !e.not_found()
    {
        eprintln!("warning: could not read .env: {e}");
    }

    let config = SagaConfig::load(cli.config.as_deref())?;
    let log_file = helpers::init_tracing(&config.paths.log_dir, &config.logging.level)?;
    info!(log = %log_file.display(), "starting saga");

    let result = match cli.command {
        Commands::New { lore, description } => {
            cmd_new(&config, lore.as_deref(), &description).await
        }
        Commands::Load { id } => cmd_load(&config, id.as_deref()).await,
        Commands::List => cmd_list(&config),
    };
    if let Err(e) = &result {
        error!(error = %e, "saga stopped with an error");
    }
    result
}

// ---------------------------------------------------------------------------
// Subcommand: new
// ---------------------------------------------------------------------------

async fn cmd_new(config: &SagaConfig, lore_path: Option<&Path>, description: &str) -> Result<()> {
    let llm = model(config);
    let lore = match lore_path {
        Some(path) => Lore::load(path)
            .await
            .with_context(|| format!("failed to load lore from {}", path.display()))?,
        None => generate_lore(config, llm.clone()).await?,
    };
    let description = match description.trim() {
        "" => lore.title(),
        text => text.to_string(),
    };

    let mut index = GameIndex::load(&config.paths.data_dir)?;
    let entry = index.add_new_game(&description)?;
    let folder = index.folder(&entry);

    let created = async {
        lore.save(folder.join(LORE_FILE)).await?;
        new_session(&lore, &folder.join(MEMORY_FILE)).await
    }
    .await;
    let memory = match created {
        Ok(memory) => memory,
        Err(e) => {
            index.remove(&entry.id)?;
            return Err(e).context("failed to create the game session");
        }
    };

    info!(id = %entry.id, folder = %folder.display(), "new game created");
    play(config, llm, lore, memory).await
}

async fn generate_lore(config: &SagaConfig, llm: Arc<dyn LlmClient>) -> Result<Lore> {
    let describer = LlmDescriber::new(llm.clone(), config.game.describe_temperature);
    let mut generator = LoreGenerator::new(llm, Arc::new(describer), config.lore.clone());
    generator
        .generate(|stage| println!("{stage}"))
        .await
        .context("failed to generate the lore")
}

// ---------------------------------------------------------------------------
// Subcommand: load
// ---------------------------------------------------------------------------

async fn cmd_load(config: &SagaConfig, id: Option<&str>) -> Result<()> {
    let index = GameIndex::load(&config.paths.data_dir)?;
    let entry = match id {
        Some(id) => index
            .find(id)?
            .with_context(|| format!("no saved game with id '{id}'"))?,
        None => index.latest().context("no saved games; start one with `saga new`")?,
    };
    let folder = index.folder(entry);

    let lore = Lore::load(folder.join(LORE_FILE))
        .await
        .with_context(|| format!("failed to load lore of game {}", entry.id))?;
    let memory = load_session(&lore, &folder.join(MEMORY_FILE))
        .await
        .with_context(|| format!("failed to open game {}", entry.id))?;

    info!(id = %entry.id, "game loaded");
    play(config, model(config), lore, memory).await
}

// ---------------------------------------------------------------------------
// Subcommand: list
// ---------------------------------------------------------------------------

fn cmd_list(config: &SagaConfig) -> Result<()> {
    let index = GameIndex::load(&config.paths.data_dir)?;
    if index.games().is_empty() {
        println!("No saved games in {}.", index.data_dir().display());
        return Ok(());
    }

    let mut games = index.games().to_vec();
    games.sort_by(|a, b| b.datetime_utc.cmp(&a.datetime_utc));
    println!("{:<34} {:<20} DESCRIPTION", "ID", "CREATED (UTC)");
    for game in &games {
        println!(
            "{:<34} {:<20} {}",
            game.id,
            game.datetime_utc.format("%Y-%m-%d %H:%M:%S"),
            game.description
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The model behind every collaborator.
fn model(config: &SagaConfig) -> Arc<dyn LlmClient> {
    Arc::new(DummyLlm::new(config.dummy_settings()))
}

async fn play(
    config: &SagaConfig,
    llm: Arc<dyn LlmClient>,
    lore: Lore,
    memory: GameMemory,
) -> Result<()> {
    let memory = Arc::new(memory);
    let options = config.chat_options();

    let responder = LlmResponder::from_lore(llm.clone(), &lore, config.game.npc_turn_history)
        .with_options(options);
    let describer = LlmDescriber::new(llm.clone(), config.game.describe_temperature);

    let mut orchestrator =
        TurnOrchestrator::new(memory.clone(), Arc::new(responder), Arc::new(describer))
            .with_human_name(lore.human_name());
    if config.game.enable_validator {
        orchestrator =
            orchestrator.with_validator(Arc::new(LlmValidator::new(llm.clone(), lore.world_rules())));
    }
    if let Some(seed) = config.game.seed {
        orchestrator = orchestrator.with_seed(seed);
    }

    let world = format!(
        "{}. {}\n{}",
        lore.world.name,
        lore.world.description,
        lore.world_rules()
    );
    let chat_config = config.chat_config();
    let mut registry = HookRegistry::new();
    GameHooks::new(orchestrator, llm)
        .with_world(world)
        .with_options(options)
        .with_quit_keywords(chat_config.quit_keywords.clone())
        .register(&mut registry)?;

    let mut display = TerminalDisplay::stdout();
    display.system(&helpers::opening_text(&lore, &memory).await?)?;

    let mut chat = ChatInterface::new(registry, display, chat_config);
    chat.run(&mut StdinLines::new("> ")).await?;

    let (turn, _) = memory.get_most_recent_turn().await?;
    info!(turn, "session closed");
    Ok(())
}
