//! This module defines the command-line interface for the application using `clap`.
//!
//! It provides a `Cli` struct that represents the parsed command-line arguments,
//! and a `Commands` enum that represents the available subcommands and their
//! options. Running without a subcommand starts interactive mode.
//!
//! # Examples
//!
//! ```no_run
//! use clap::Parser;
//! use awful_rag::commands::{Cli, Commands};
//!
//! let cli = Cli::parse();
//! match cli.command.unwrap_or_default() {
//!     Commands::Query { query, .. } => println!("{query:?}"),
//!     _ => {}
//! }
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Settings file read at startup and appended to by `update_prompt`.
    #[arg(long = "env-file", alias = "env_file", global = true, default_value = ".env")]
    pub env_file: PathBuf,

    /// The parsed subcommand; `None` means interactive mode.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug, Clone, PartialEq, Default)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Index the documents in a directory into the vector store.
    #[clap(name = "index")]
    Index {
        /// Documents directory; defaults to `DOCUMENTS_DIR`.
        #[arg(long = "docs_dir", alias = "docs-dir")]
        docs_dir: Option<PathBuf>,

        /// Also index files in subdirectories.
        #[arg(long, short = 'r')]
        recursive: bool,
    },

    /// Ask the knowledge base a single question.
    #[clap(name = "query", alias = "q")]
    Query {
        #[arg(long, short = 'q')]
        query: Option<String>,

        /// Overrides `SYSTEM_PROMPT` for this query.
        #[arg(long = "system_prompt", alias = "system-prompt")]
        system_prompt: Option<String>,

        /// Query template name (under the config directory) or YAML file path.
        #[arg(long, short = 't')]
        template: Option<String>,
    },

    /// Persist a new system prompt to the settings file.
    #[clap(name = "update_prompt", alias = "update-prompt")]
    UpdatePrompt {
        #[arg(long = "system_prompt", alias = "system-prompt")]
        system_prompt: String,
    },

    /// Generate images from a prompt.
    #[clap(name = "generate_image", alias = "generate-image")]
    GenerateImage {
        #[arg(long, short = 'p')]
        prompt: String,

        /// e.g. 1024x1024, 1792x1024, 1024x1792; defaults to `IMAGE_SIZE`.
        #[arg(long)]
        size: Option<String>,

        /// standard or hd; defaults to `IMAGE_QUALITY`.
        #[arg(long)]
        quality: Option<String>,

        /// vivid or natural; defaults to `IMAGE_STYLE`.
        #[arg(long)]
        style: Option<String>,

        /// Number of images.
        #[arg(long = "n", short = 'n', default_value_t = 1)]
        n: u8,

        /// Rewrite the prompt with a chat model before generating.
        #[arg(long)]
        analyze: bool,
    },

    /// Interactive question answering (the default).
    #[clap(name = "interactive", alias = "i")]
    #[default]
    Interactive,
}
