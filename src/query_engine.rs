//! # Query engine
//!
//! Answers questions against the persisted index: the question is embedded, the `TOP_K`
//! most similar chunks are retrieved, chunks scoring below `SIMILARITY_THRESHOLD` are
//! dropped, and the survivors are packed into the active [`QueryTemplate`] and sent to the
//! chat model in a single call.
//!
//! An engine is either [`EngineState::Ready`] with an index or
//! [`EngineState::Unavailable`]. An unavailable engine still answers every query, always
//! with [`ENGINE_UNAVAILABLE`], until [`QueryEngine::reload`] finds an index.

use crate::chunker::SentenceSplitter;
use crate::config::RagConfig;
use crate::documents::DocumentProcessor;
use crate::llm::Llm;
use crate::template::QueryTemplate;
use crate::vector_store::{NodeWithScore, VectorIndex};
use std::error::Error;
use tracing::{debug, error, info, warn};

/// Answer returned while no index is available.
pub const ENGINE_UNAVAILABLE: &str = "系统错误：查询引擎不可用。请确保已正确加载或创建索引。";

/// Answer returned when no chunk passes the similarity cutoff.
pub const NO_RELEVANT_INFORMATION: &str = "抱歉，我在知识库中没有找到与您问题相关的信息。";

/// Tokens kept free in the context window for the model's answer.
const ANSWER_TOKEN_RESERVE: usize = 256;

/// Synthesized answer plus the chunks it was grounded on.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub answer: String,
    /// Retrieved chunks that passed the cutoff, best first.
    pub source_nodes: Vec<NodeWithScore>,
}

impl std::fmt::Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.answer)
    }
}

#[derive(Debug)]
pub enum EngineState {
    Ready(VectorIndex),
    Unavailable,
}

#[derive(Debug)]
pub struct QueryEngine {
    processor: DocumentProcessor,
    llm: Llm,
    system_prompt: String,
    template: QueryTemplate,
    top_k: usize,
    similarity_threshold: f32,
    context_window: usize,
    tokens: SentenceSplitter,
    state: EngineState,
}

impl QueryEngine {
    /// Open an engine over the persisted index, building one from the documents
    /// directory if none exists yet.
    ///
    /// Failures in either step are logged and leave the engine
    /// [`Unavailable`](EngineState::Unavailable) instead of being returned.
    pub async fn open(config: &RagConfig, processor: DocumentProcessor, llm: Llm) -> Self {
        let mut engine = Self::with_index(config, processor, llm, None);
        engine.state = engine.find_index().await;
        engine
    }

    /// An engine over an already loaded index, or an unavailable one for `None`.
    pub fn with_index(
        config: &RagConfig,
        processor: DocumentProcessor,
        llm: Llm,
        index: Option<VectorIndex>,
    ) -> Self {
        Self {
            processor,
            llm,
            system_prompt: config.system_prompt.clone(),
            template: QueryTemplate::default(),
            top_k: config.top_k,
            similarity_threshold: config.similarity_threshold,
            context_window: config.context_window,
            tokens: SentenceSplitter::new(config.context_window, 0),
            state: index.map_or(EngineState::Unavailable, EngineState::Ready),
        }
    }

    async fn find_index(&self) -> EngineState {
        match self.processor.load_index() {
            Ok(Some(index)) => return EngineState::Ready(index),
            Ok(None) => info!("No existing index, building one from documents"),
            Err(e) => error!("Failed to load index: {}", e),
        }

        match self.processor.process_documents(None).await {
            Ok(Some(index)) => EngineState::Ready(index),
            Ok(None) => {
                warn!("Query engine unavailable: no documents to index");
                EngineState::Unavailable
            }
            Err(e) => {
                error!("Failed to build index: {}", e);
                EngineState::Unavailable
            }
        }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, EngineState::Ready(_))
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn template(&self) -> &QueryTemplate {
        &self.template
    }

    pub fn processor(&self) -> &DocumentProcessor {
        &self.processor
    }

    /// Swap the system prompt and/or the query template. A template that carries its own
    /// system prompt applies it unless `system_prompt` is given explicitly.
    pub fn update_prompt(&mut self, system_prompt: Option<String>, template: Option<QueryTemplate>) {
        if let Some(template) = template {
            if let Some(prompt) = &template.system_prompt {
                self.system_prompt = prompt.clone();
            }
            self.template = template;
        }
        if let Some(prompt) = system_prompt {
            self.system_prompt = prompt;
        }
        debug!("Active system prompt: {}", self.system_prompt);
    }

    /// Look for an index again (load, then build). Returns whether the engine is ready.
    pub async fn reload(&mut self) -> bool {
        self.state = self.find_index().await;
        self.is_ready()
    }

    /// Answer `text`, returning only the answer string.
    pub async fn query(&self, text: &str) -> Result<String, Box<dyn Error>> {
        Ok(self.query_with_sources(text).await?.answer)
    }

    /// Answer `text` and report which chunks the answer used.
    pub async fn query_with_sources(&self, text: &str) -> Result<Response, Box<dyn Error>> {
        let index = match &self.state {
            EngineState::Ready(index) => index,
            EngineState::Unavailable => {
                return Ok(Response {
                    answer: ENGINE_UNAVAILABLE.to_string(),
                    source_nodes: Vec::new(),
                });
            }
        };

        let query_vector = self.processor.embedder().embed_query(text).await?;
        let source_nodes: Vec<NodeWithScore> = index
            .search(&query_vector, self.top_k)?
            .into_iter()
            .filter(|hit| hit.score >= self.similarity_threshold)
            .collect();

        info!("Retrieved {} relevant chunks", source_nodes.len());

        if source_nodes.is_empty() {
            return Ok(Response {
                answer: NO_RELEVANT_INFORMATION.to_string(),
                source_nodes,
            });
        }

        let context_str = self.build_context(text, &source_nodes);
        let prompt = self.template.render(&self.system_prompt, &context_str, text);
        let answer = self.llm.complete(&prompt).await?;

        Ok(Response {
            answer,
            source_nodes,
        })
    }

    /// Join chunk texts with blank lines, stopping before the prompt would overflow
    /// the context window. The best chunk is always kept, cut down if it must be.
    fn build_context(&self, query: &str, nodes: &[NodeWithScore]) -> String {
        let frame = self
            .tokens
            .token_count(&self.template.render_without_context(&self.system_prompt, query));
        let budget = self
            .context_window
            .saturating_sub(frame + ANSWER_TOKEN_RESERVE)
            .max(1);

        let mut parts: Vec<String> = Vec::new();
        let mut used = 0;
        for hit in nodes {
            let cost = self.tokens.token_count(&hit.node.text) + if parts.is_empty() { 0 } else { 1 };
            if used + cost > budget {
                if parts.is_empty() {
                    let head = SentenceSplitter::new(budget, 0)
                        .split_text(&hit.node.text)
                        .into_iter()
                        .next()
                        .unwrap_or_default();
                    parts.push(head);
                }
                debug!("Context budget of {} tokens reached", budget);
                break;
            }
            used += cost;
            parts.push(hit.node.text.clone());
        }

        parts.join("\n\n")
    }
}
