//! # Awful RAG (library root)
//!
//! This crate provides the core plumbing for the **Awful RAG** CLI (`arag`):
//! - Configuration from a dotenv-style settings file (`config`).
//! - CLI parsing (`commands`) and the interactive loop (`interactive`).
//! - Document loading, chunking and embedding (`documents`, `chunker`, `embeddings`).
//! - A persisted vector index with exact cosine search (`vector_store`).
//! - Retrieval and answer synthesis over an OpenAI-compatible chat API (`query_engine`, `llm`).
//! - Query templates (`template`) and terminal rendering (`pretty`).
//! - Image generation with optional prompt enhancement (`image_generator`).
//!
//! ## Pipeline
//!
//! ```text
//! documents/*  --load-->  Document  --split-->  chunks  --embed-->  VectorIndex (persisted)
//!                                                                        |
//! question  --embed-->  top-K cosine search  --cutoff-->  context  --chat-->  Response
//! ```
//!
//! ## Modules
//! - [`chunker`], [`commands`], [`config`], [`documents`], [`embeddings`],
//!   [`image_generator`], [`interactive`], [`llm`], [`pretty`], [`query_engine`],
//!   [`template`], [`vector_store`]

use directories::ProjectDirs;
use std::error::Error;

pub mod chunker;
pub mod commands;
pub mod config;
pub mod documents;
pub mod embeddings;
pub mod image_generator;
pub mod interactive;
pub mod llm;
pub mod pretty;
pub mod query_engine;
pub mod template;
pub mod vector_store;

/// Return the per-platform configuration directory used by Awful RAG.
///
/// This uses [`directories::ProjectDirs`] with the application triple
/// `("com", "awful-sec", "arag")`, so you get the right place on each OS
/// (e.g., `~/Library/Application Support/com.awful-sec.arag` on macOS).
///
/// The directory is **not** created by this function. Query templates are looked up
/// under `templates/` inside it.
///
/// # Errors
/// Returns an error if the platform configuration directory cannot be determined
/// (which is rare but possible in heavily sandboxed environments).
///
/// # Examples
/// ```rust
/// let cfg = awful_rag::config_dir().expect("has a config dir");
/// println!("config at {}", cfg.display());
/// ```
pub fn config_dir() -> Result<std::path::PathBuf, Box<dyn Error>> {
    let proj_dirs = ProjectDirs::from("com", "awful-sec", "arag")
        .ok_or("Unable to determine config directory")?;
    let config_dir = proj_dirs.config_dir().to_path_buf();

    Ok(config_dir)
}
