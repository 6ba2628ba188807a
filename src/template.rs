//! # Query templates
//!
//! A [`QueryTemplate`] is the text sent to the chat model for every query. It carries three
//! placeholders that are filled at synthesis time:
//!
//! - `{system_prompt}`: the engine's active system prompt,
//! - `{context_str}`: the retrieved chunks, separated by blank lines,
//! - `{query_str}`: the user's question.
//!
//! Templates can be swapped at runtime through
//! [`QueryEngine::update_prompt`](crate::query_engine::QueryEngine::update_prompt). Custom
//! ones are small YAML documents stored per-user under the configuration directory:
//!
//! ```text
//! <config_dir>/templates/<name>.yaml
//! ```
//!
//! ## Minimal YAML example
//!
//! ```yaml
//! # ~/.config/arag/templates/terse.yaml
//! system_prompt: "Answer in one sentence."
//! template: |
//!   {system_prompt}
//!   Context:
//!   {context_str}
//!   Question: {query_str}
//!   Answer:
//! ```
//!
//! `system_prompt` is optional; when present it replaces the engine's prompt as well.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::{error::Error, fs, path::Path};

/// Text of the built-in query template.
pub const DEFAULT_QUERY_TEMPLATE: &str = "{system_prompt}

上下文信息:
{context_str}

用户问题: {query_str}

请基于上下文信息回答用户问题。如果上下文中没有足够的信息，请说明你无法回答此问题。
回答:
";

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{(system_prompt|context_str|query_str)\}").expect("valid regex"));

/// A prompt template with `{system_prompt}`, `{context_str}` and `{query_str}` slots.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct QueryTemplate {
    /// Optional system prompt shipped with the template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// The template body.
    pub template: String,
}

impl Default for QueryTemplate {
    fn default() -> Self {
        Self {
            system_prompt: None,
            template: DEFAULT_QUERY_TEMPLATE.to_string(),
        }
    }
}

impl QueryTemplate {
    /// Create a template from its body, validating the required placeholders.
    pub fn new(template: impl Into<String>) -> Result<Self, Box<dyn Error>> {
        let template = Self {
            system_prompt: None,
            template: template.into(),
        };
        template.validate()?;
        Ok(template)
    }

    /// A template must at least mention `{context_str}` and `{query_str}`.
    pub fn validate(&self) -> Result<(), Box<dyn Error>> {
        for required in ["{context_str}", "{query_str}"] {
            if !self.template.contains(required) {
                return Err(format!("query template is missing the {required} placeholder").into());
            }
        }
        Ok(())
    }

    /// Substitute all placeholders in one pass.
    ///
    /// Substituted values are never re-scanned, so a document that happens to contain
    /// `{query_str}` is left untouched.
    pub fn render(&self, system_prompt: &str, context_str: &str, query_str: &str) -> String {
        PLACEHOLDER
            .replace_all(&self.template, |caps: &Captures| match &caps[1] {
                "system_prompt" => system_prompt.to_string(),
                "context_str" => context_str.to_string(),
                _ => query_str.to_string(),
            })
            .into_owned()
    }

    /// Render with an empty context; used to measure how much room the context may take.
    pub fn render_without_context(&self, system_prompt: &str, query_str: &str) -> String {
        self.render(system_prompt, "", query_str)
    }
}

/// Load a query template by name or path.
///
/// If `name` points at an existing file it is read directly; otherwise the template is
/// resolved as `<config_dir>/templates/<name>.yaml`.
///
/// ### Errors
/// Returns an error if:
/// - the config directory cannot be determined,
/// - the template file does not exist or cannot be read,
/// - the YAML content cannot be deserialized into a `QueryTemplate`,
/// - the template lacks `{context_str}` or `{query_str}`.
pub fn load_template(name: &str) -> Result<QueryTemplate, Box<dyn Error>> {
    let direct = Path::new(name);
    let path = if direct.is_file() {
        direct.to_path_buf()
    } else {
        crate::config_dir()?.join(format!("templates/{name}.yaml"))
    };

    tracing::info!("Loading template: {}", path.display());

    let content = fs::read_to_string(&path)?;
    let template: QueryTemplate = serde_yaml::from_str(&content)?;
    template.validate()?;
    Ok(template)
}
