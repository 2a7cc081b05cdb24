//! CLI argument definitions for saga.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// saga -- a text role-playing game run by language models.
#[derive(Parser)]
#[command(
    name = "saga",
    version,
    about = "saga -- LLM-driven role-playing game",
    long_about = "Plays a role-playing session in the terminal. Every player line is checked, \
                  answered by the characters of the world and narrated, and the whole game \
                  state is saved so it can be resumed later."
)]
pub struct Cli {
    /// Configuration file. Defaults to `config/saga.toml` when present.
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a new game, from a lore file or with a freshly generated lore.
    New {
        /// JSON lore describing the world, its characters and the opening.
        /// Generated with the `[lore]` settings when omitted.
        #[arg(long, short)]
        lore: Option<PathBuf>,

        /// Free text shown in the list of saved games. Defaults to the world
        /// name and description.
        #[arg(long, short, default_value = "")]
        description: String,
    },

    /// Resume a saved game.
    Load {
        /// Game id (or a unique prefix of it). The latest game when omitted.
        #[arg(long)]
        id: Option<String>,
    },

    /// List saved games.
    List,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_new_game() {
        let cli = Cli::parse_from(["saga", "new", "--lore", "world.json", "-d", "first run"]);
        match cli.command {
            Commands::New { lore, description } => {
                assert_eq!(lore, Some(PathBuf::from("world.json")));
                assert_eq!(description, "first run");
            }
            _ => panic!("expected new"),
        }
        assert!(cli.config.is_none());
    }

    #[test]
    fn lore_file_is_optional() {
        let cli = Cli::parse_from(["saga", "new"]);
        assert!(matches!(
            cli.command,
            Commands::New { lore: None, ref description } if description.is_empty()
        ));
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::parse_from(["saga", "load", "--config", "alt.toml", "--id", "0192"]);
        assert_eq!(cli.config, Some(PathBuf::from("alt.toml")));
        assert!(matches!(cli.command, Commands::Load { id: Some(ref id) } if id == "0192"));
    }
}
