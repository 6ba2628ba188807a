//! This module provides functionality for loading and persisting the application's settings.
//!
//! It defines the [`RagConfig`] struct, which holds every knob the indexing, query and image
//! pipelines need, and a [`load_config`] function that assembles it from three layers:
//!
//! 1. built-in defaults,
//! 2. a dotenv-style settings file (`.env` in the working directory unless `--env-file` says
//!    otherwise), where **later lines win** so appended updates take effect,
//! 3. process environment variables, which override the file.
//!
//! The config is built once at startup and handed to each component by reference. The only
//! writes go through [`persist_setting`], which appends a `KEY="value"` line and never rewrites
//! what is already in the file.
//!
//! # Examples
//!
//! ```no_run
//! use awful_rag::config::load_config;
//!
//! let config = load_config(std::path::Path::new(".env")).unwrap();
//! println!("{:?}", config.vector_store_dir);
//! ```

use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    env,
    error::Error,
    fmt,
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
};

use tracing::*;

/// Default system prompt used when `SYSTEM_PROMPT` is not set.
pub const DEFAULT_SYSTEM_PROMPT: &str = "你是一个有用的AI助手。
使用以下信息回答用户的问题。
如果你不知道答案，就说你不知道，不要编造信息。
基于提供的上下文给出详细的答案。
";

/// Settings key holding the API key.
pub const API_KEY_KEY: &str = "OPENAI_API_KEY";

/// Settings key holding the system prompt.
pub const SYSTEM_PROMPT_KEY: &str = "SYSTEM_PROMPT";

/// Where document and query embeddings are computed.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum EmbeddingBackend {
    /// The OpenAI-compatible `/embeddings` endpoint.
    #[serde(rename = "openai")]
    OpenAi,
    /// A local BERT sentence-embedding model run through candle.
    #[serde(rename = "local")]
    Local,
}

impl FromStr for EmbeddingBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "api" | "remote" => Ok(Self::OpenAi),
            "local" | "candle" => Ok(Self::Local),
            other => Err(format!("unsupported embedding backend: {other}")),
        }
    }
}

impl fmt::Display for EmbeddingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAi => f.write_str("openai"),
            Self::Local => f.write_str("local"),
        }
    }
}

/// Represents the application's configuration.
///
/// Every field maps to one settings key (see [`RagConfig::from_lookup`]). Components only
/// ever borrow it; nothing mutates it after startup.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct RagConfig {
    /// The API key used to authenticate requests to the API.
    pub api_key: String,

    /// The base URL of the OpenAI-compatible API.
    pub api_base: String,

    /// Chat model used to synthesize answers.
    pub model: String,

    /// Which embedding backend to use.
    pub embedding_backend: EmbeddingBackend,

    /// Remote embedding model name (ignored by the local backend).
    pub embedding_model: String,

    /// Directory holding the persisted vector index.
    pub vector_store_dir: PathBuf,

    /// Default directory scanned by `index`.
    pub documents_dir: PathBuf,

    // Number of chunks retrieved per query.
    pub top_k: usize,

    // Minimum cosine similarity a retrieved chunk must reach.
    pub similarity_threshold: f32,

    /// Instruction text substituted into every query prompt.
    pub system_prompt: String,

    // Splitter chunk size, in tokens.
    pub chunk_size: usize,

    // Tokens shared between consecutive chunks.
    pub chunk_overlap: usize,

    // Token budget of one synthesis prompt.
    pub context_window: usize,

    /// Chat model used to enhance image prompts.
    pub image_model: String,

    /// Image API model.
    pub image_generation_model: String,

    /// Directory generated images are written to.
    pub image_output_dir: PathBuf,

    pub image_size: String,

    pub image_quality: String,

    pub image_style: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            embedding_backend: EmbeddingBackend::OpenAi,
            embedding_model: "text-embedding-ada-002".to_string(),
            vector_store_dir: PathBuf::from("vector_store"),
            documents_dir: PathBuf::from("documents"),
            top_k: 3,
            similarity_threshold: 0.7,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            chunk_size: 1024,
            chunk_overlap: 20,
            context_window: 4096,
            image_model: "gpt-4o".to_string(),
            image_generation_model: "dall-e-3".to_string(),
            image_output_dir: PathBuf::from("generated_images"),
            image_size: "1024x1024".to_string(),
            image_quality: "standard".to_string(),
            image_style: "vivid".to_string(),
        }
    }
}

impl RagConfig {
    /// Build a config from a key lookup function, falling back to defaults for absent keys.
    ///
    /// Keys: `OPENAI_API_KEY`, `OPENAI_API_BASE`, `MODEL_NAME`, `EMBEDDING_BACKEND`,
    /// `EMBEDDING_MODEL`, `VECTOR_STORE_DIR`, `DOCUMENTS_DIR`, `TOP_K`,
    /// `SIMILARITY_THRESHOLD`, `SYSTEM_PROMPT`, `CHUNK_SIZE`, `CHUNK_OVERLAP`,
    /// `CONTEXT_WINDOW`, `IMAGE_MODEL`, `IMAGE_GENERATION_MODEL`, `IMAGE_OUTPUT_DIR`,
    /// `IMAGE_SIZE`, `IMAGE_QUALITY`, `IMAGE_STYLE`.
    ///
    /// # Errors
    /// Returns an error when a numeric key does not parse, the embedding backend is unknown,
    /// `TOP_K` is zero, or the chunk overlap is not smaller than the chunk size.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Box<dyn Error>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let string = |key: &str, default: String| lookup(key).unwrap_or(default);
        let path = |key: &str, default: PathBuf| lookup(key).map(PathBuf::from).unwrap_or(default);

        let config = Self {
            api_key: string(API_KEY_KEY, defaults.api_key),
            api_base: string("OPENAI_API_BASE", defaults.api_base),
            model: string("MODEL_NAME", defaults.model),
            embedding_backend: parse_key(&lookup, "EMBEDDING_BACKEND", defaults.embedding_backend)?,
            embedding_model: string("EMBEDDING_MODEL", defaults.embedding_model),
            vector_store_dir: path("VECTOR_STORE_DIR", defaults.vector_store_dir),
            documents_dir: path("DOCUMENTS_DIR", defaults.documents_dir),
            top_k: parse_key(&lookup, "TOP_K", defaults.top_k)?,
            similarity_threshold: parse_key(
                &lookup,
                "SIMILARITY_THRESHOLD",
                defaults.similarity_threshold,
            )?,
            system_prompt: string(SYSTEM_PROMPT_KEY, defaults.system_prompt),
            chunk_size: parse_key(&lookup, "CHUNK_SIZE", defaults.chunk_size)?,
            chunk_overlap: parse_key(&lookup, "CHUNK_OVERLAP", defaults.chunk_overlap)?,
            context_window: parse_key(&lookup, "CONTEXT_WINDOW", defaults.context_window)?,
            image_model: string("IMAGE_MODEL", defaults.image_model),
            image_generation_model: string(
                "IMAGE_GENERATION_MODEL",
                defaults.image_generation_model,
            ),
            image_output_dir: path("IMAGE_OUTPUT_DIR", defaults.image_output_dir),
            image_size: string("IMAGE_SIZE", defaults.image_size),
            image_quality: string("IMAGE_QUALITY", defaults.image_quality),
            image_style: string("IMAGE_STYLE", defaults.image_style),
        };

        if config.top_k == 0 {
            return Err("TOP_K must be at least 1".into());
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(format!(
                "CHUNK_OVERLAP ({}) must be smaller than CHUNK_SIZE ({})",
                config.chunk_overlap, config.chunk_size
            )
            .into());
        }

        Ok(config)
    }

    /// Return a copy of this config with a different API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    /// `true` when no usable API key is configured.
    pub fn missing_api_key(&self) -> bool {
        self.api_key.trim().is_empty()
    }
}

fn parse_key<F, T>(lookup: &F, key: &str, default: T) -> Result<T, Box<dyn Error>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| format!("invalid value for {key} ({raw:?}): {e}").into()),
        None => Ok(default),
    }
}

/// Read a dotenv-style settings file into a map.
///
/// Later assignments of the same key replace earlier ones. A missing file yields an
/// empty map; a malformed line is an error.
pub fn read_settings_file(path: &Path) -> Result<HashMap<String, String>, Box<dyn Error>> {
    let mut values = HashMap::new();
    if !path.exists() {
        debug!("Settings file {} not found, using defaults", path.display());
        return Ok(values);
    }

    for item in dotenvy::from_path_iter(path)? {
        let (key, value) = item?;
        values.insert(key, value);
    }
    debug!("Read {} settings from {}", values.len(), path.display());

    Ok(values)
}

/// Loads the application's configuration.
///
/// Process environment variables take precedence over the settings file at `env_file`,
/// which in turn takes precedence over built-in defaults.
///
/// # Errors
/// Propagates settings-file parse errors and the validation errors of
/// [`RagConfig::from_lookup`].
pub fn load_config(env_file: &Path) -> Result<RagConfig, Box<dyn Error>> {
    let file_values = read_settings_file(env_file)?;
    load_config_with(&file_values, |key| env::var(key).ok())
}

/// Same as [`load_config`] but with an explicit environment lookup.
pub fn load_config_with<F>(
    file_values: &HashMap<String, String>,
    environment: F,
) -> Result<RagConfig, Box<dyn Error>>
where
    F: Fn(&str) -> Option<String>,
{
    RagConfig::from_lookup(|key| environment(key).or_else(|| file_values.get(key).cloned()))
}

/// Append `KEY="value"` to the settings file, creating it if needed.
///
/// Existing content is never rewritten; because later lines win when the file is read,
/// the appended value becomes the effective one.
pub fn persist_setting(env_file: &Path, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(env_file)?;
    writeln!(file, "\n{key}=\"{}\"", escape_value(value))?;
    info!("Appended {key} to {}", env_file.display());
    Ok(())
}

/// Escape a value for a double-quoted dotenv assignment.
fn escape_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.replace("\r\n", "\n").chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '$' => escaped.push_str("\\$"),
            '\n' => escaped.push_str("\\n"),
            '\r' => {}
            _ => escaped.push(c),
        }
    }
    escaped
}
