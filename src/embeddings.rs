//! # Embeddings
//!
//! Turns chunk and query text into dense vectors. Two backends are available:
//!
//! - [`Embedder::Remote`]: the OpenAI compatible `/embeddings` endpoint, with texts sent in
//!   batches of [`EMBED_BATCH_SIZE`].
//! - [`Embedder::Local`]: `all-MiniLM-L6-v2` run in-process with Candle. Weights are
//!   fetched from the Hugging Face Hub on first use and cached afterwards.
//!
//! The backend is chosen with `EMBEDDING_BACKEND`. An index must be queried with the same
//! backend and model it was built with; the vector store records both.

use crate::config::{EmbeddingBackend, RagConfig};
use crate::llm::create_client;
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput},
};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use std::error::Error;
use tokenizers::Tokenizer;
use tracing::debug;

/// Texts per request when embedding remotely.
pub const EMBED_BATCH_SIZE: usize = 10;

/// Hugging Face model used by the local backend.
pub const LOCAL_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Produces embeddings with whichever backend the configuration selects.
#[derive(Debug)]
pub enum Embedder {
    Remote(RemoteEmbedder),
    Local(SentenceEmbeddingsModel),
}

impl Embedder {
    /// Build the backend named by `config.embedding_backend`.
    ///
    /// The local backend downloads its weights here if they are not cached yet.
    pub fn from_config(config: &RagConfig) -> Result<Self, Box<dyn Error>> {
        match config.embedding_backend {
            EmbeddingBackend::OpenAi => Ok(Self::Remote(RemoteEmbedder::new(
                create_client(config),
                config.embedding_model.clone(),
            ))),
            EmbeddingBackend::Local => Ok(Self::Local(SentenceEmbeddingsModel::load()?)),
        }
    }

    pub fn backend(&self) -> EmbeddingBackend {
        match self {
            Self::Remote(_) => EmbeddingBackend::OpenAi,
            Self::Local(_) => EmbeddingBackend::Local,
        }
    }

    pub fn model_name(&self) -> &str {
        match self {
            Self::Remote(remote) => &remote.model,
            Self::Local(_) => LOCAL_EMBEDDING_MODEL,
        }
    }

    /// Embed a batch of texts, preserving order.
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Box<dyn Error>> {
        match self {
            Self::Remote(remote) => remote.embed(texts).await,
            Self::Local(model) => texts.iter().map(|t| model.encode(t)).collect(),
        }
    }

    /// Embed a single query string.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, Box<dyn Error>> {
        let mut vectors = self.embed_texts(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| "embedding backend returned no vector".into())
    }
}

/// Embeddings from an OpenAI compatible API.
#[derive(Clone)]
pub struct RemoteEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl std::fmt::Debug for RemoteEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteEmbedder")
            .field("model", &self.model)
            .finish()
    }
}

impl RemoteEmbedder {
    pub fn new(client: Client<OpenAIConfig>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Box<dyn Error>> {
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            let request = CreateEmbeddingRequestArgs::default()
                .model(self.model.clone())
                .input(EmbeddingInput::StringArray(batch.to_vec()))
                .build()?;

            debug!("Embedding {} texts with {}", batch.len(), self.model);

            let mut response = self.client.embeddings().create(request).await?;
            if response.data.len() != batch.len() {
                return Err(format!(
                    "embedding API returned {} vectors for {} inputs",
                    response.data.len(),
                    batch.len()
                )
                .into());
            }
            response.data.sort_by_key(|e| e.index);
            vectors.extend(response.data.into_iter().map(|e| e.embedding));
        }

        Ok(vectors)
    }
}

/// Sentence embeddings model using Candle (pure Rust)
pub struct SentenceEmbeddingsModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl std::fmt::Debug for SentenceEmbeddingsModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentenceEmbeddingsModel")
            .field("model", &LOCAL_EMBEDDING_MODEL)
            .finish()
    }
}

impl SentenceEmbeddingsModel {
    /// Load the model from Hugging Face Hub
    pub fn load() -> Result<Self, Box<dyn Error>> {
        let device = Device::Cpu;

        let repo = Repo::with_revision(
            LOCAL_EMBEDDING_MODEL.to_string(),
            RepoType::Model,
            "main".to_string(),
        );
        let api_repo = Api::new()?.repo(repo);

        let config_filename = api_repo.get("config.json")?;
        let tokenizer_filename = api_repo.get("tokenizer.json")?;
        let weights_filename = api_repo.get("model.safetensors")?;

        let config: Config = serde_json::from_str(&std::fs::read_to_string(config_filename)?)?;

        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| format!("Failed to load tokenizer: {e}"))?;

        // SAFETY: the safetensors file is owned by the hub cache and not mutated while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device)? };
        let model = BertModel::load(vb, &config)?;

        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }

    /// Encode text into a normalized 384-d embedding. Input past 512 tokens is truncated
    /// by the tokenizer.
    pub fn encode(&self, text: &str) -> Result<Vec<f32>, Box<dyn Error>> {
        let tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| format!("Tokenization error: {e}"))?;

        let token_ids = Tensor::new(tokens.get_ids(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)?.unsqueeze(0)?;

        let output = self.model.forward(&token_ids, &token_type_ids, None)?;
        let pooled = self.mean_pooling(&output, tokens.get_attention_mask())?;

        Ok(normalize(&pooled)?.to_vec1::<f32>()?)
    }

    /// Mean of the token embeddings, ignoring padding.
    fn mean_pooling(&self, embeddings: &Tensor, attention_mask: &[u32]) -> Result<Tensor, Box<dyn Error>> {
        // [1, seq_len, 1] so it broadcasts over the hidden dimension
        let mask = Tensor::new(attention_mask, &self.device)?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?
            .unsqueeze(2)?;

        let sum = embeddings.broadcast_mul(&mask)?.sum(1)?;
        let count = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;

        Ok(sum.broadcast_div(&count)?.squeeze(0)?)
    }
}

/// L2 normalize a vector tensor.
fn normalize(tensor: &Tensor) -> Result<Tensor, Box<dyn Error>> {
    let norm = tensor.sqr()?.sum_all()?.sqrt()?;
    Ok(tensor.broadcast_div(&norm)?)
}
