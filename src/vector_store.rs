//! # VectorStore
//!
//! Persistent embedding index for document chunks.
//!
//! Every chunk is stored as a [`TextNode`] carrying its text, the metadata of the document
//! it came from and its embedding. Search is an exact cosine-similarity scan over all
//! nodes, which is plenty for a personal knowledge base and keeps results deterministic.
//!
//! ## On-disk layout
//!
//! ```text
//! <VECTOR_STORE_DIR>/
//!   docstore.bin       bincode encoded Vec<TextNode>
//!   index_store.yaml   IndexManifest (format version, embedding model, counts)
//! ```
//!
//! ## Quick Example
//! ```no_run
//! use awful_rag::vector_store::{TextNode, VectorIndex};
//! use std::collections::BTreeMap;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let node = TextNode::new("doc-1", 0, "Rust is great!", BTreeMap::new(), vec![1.0, 0.0]);
//! let index = VectorIndex::new("openai", "text-embedding-ada-002", vec![node])?;
//! index.persist("vector_store".as_ref())?;
//!
//! let hits = VectorIndex::load("vector_store".as_ref())?.search(&[0.9, 0.1], 3)?;
//! println!("Top match: {}", hits[0].node.text);
//! # Ok(()) }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::error::Error;
use std::fs;
use std::path::Path;
use tracing::info;

/// File holding the serialized nodes.
pub const DOCSTORE_FILE: &str = "docstore.bin";
/// File holding the [`IndexManifest`].
pub const MANIFEST_FILE: &str = "index_store.yaml";
/// Bumped whenever the on-disk node layout changes.
pub const FORMAT_VERSION: u32 = 1;

/// One embedded chunk of a document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TextNode {
    /// `<doc_id>-<chunk index>`
    pub id: String,
    pub doc_id: String,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
    pub embedding: Vec<f32>,
}

impl TextNode {
    pub fn new(
        doc_id: &str,
        chunk_index: usize,
        text: impl Into<String>,
        metadata: BTreeMap<String, String>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: format!("{doc_id}-{chunk_index}"),
            doc_id: doc_id.to_string(),
            text: text.into(),
            metadata,
            embedding,
        }
    }
}

/// Describes how an index was built.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IndexManifest {
    pub format_version: u32,
    pub embedding_backend: String,
    pub embedding_model: String,
    pub dimension: usize,
    pub node_count: usize,
    pub document_count: usize,
    pub created_at: String,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeWithScore {
    pub node: TextNode,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
}

/// In-memory index of embedded chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    manifest: IndexManifest,
    nodes: Vec<TextNode>,
}

impl VectorIndex {
    /// Build an index over `nodes`.
    ///
    /// # Errors
    /// Fails if the nodes do not all share one embedding dimension.
    pub fn new(
        embedding_backend: &str,
        embedding_model: &str,
        nodes: Vec<TextNode>,
    ) -> Result<Self, Box<dyn Error>> {
        let dimension = nodes.first().map_or(0, |n| n.embedding.len());
        if let Some(bad) = nodes.iter().find(|n| n.embedding.len() != dimension) {
            return Err(format!(
                "node {} has {} dimensions, expected {dimension}",
                bad.id,
                bad.embedding.len()
            )
            .into());
        }

        let document_count = nodes
            .iter()
            .map(|n| n.doc_id.as_str())
            .collect::<HashSet<_>>()
            .len();

        let manifest = IndexManifest {
            format_version: FORMAT_VERSION,
            embedding_backend: embedding_backend.to_string(),
            embedding_model: embedding_model.to_string(),
            dimension,
            node_count: nodes.len(),
            document_count,
            created_at: chrono::Local::now().to_rfc3339(),
        };

        Ok(Self { manifest, nodes })
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn nodes(&self) -> &[TextNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.manifest.dimension
    }

    /// Write the index into `dir`, creating it if needed and replacing any previous index.
    pub fn persist(&self, dir: &Path) -> Result<(), Box<dyn Error>> {
        fs::create_dir_all(dir)?;

        let bytes = bincode::serde::encode_to_vec(&self.nodes, bincode::config::standard())?;
        fs::write(dir.join(DOCSTORE_FILE), bytes)?;
        fs::write(dir.join(MANIFEST_FILE), serde_yaml::to_string(&self.manifest)?)?;

        info!(
            "Persisted {} nodes from {} documents to {}",
            self.manifest.node_count,
            self.manifest.document_count,
            dir.display()
        );
        Ok(())
    }

    /// Read an index previously written by [`persist`](Self::persist).
    pub fn load(dir: &Path) -> Result<Self, Box<dyn Error>> {
        let manifest: IndexManifest =
            serde_yaml::from_str(&fs::read_to_string(dir.join(MANIFEST_FILE))?)?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(format!(
                "unsupported index format version {} in {}",
                manifest.format_version,
                dir.display()
            )
            .into());
        }

        let bytes = fs::read(dir.join(DOCSTORE_FILE))?;
        let (nodes, _): (Vec<TextNode>, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;

        if nodes.len() != manifest.node_count {
            return Err(format!(
                "index in {} is corrupt: manifest lists {} nodes, docstore has {}",
                dir.display(),
                manifest.node_count,
                nodes.len()
            )
            .into());
        }

        info!("Loaded {} nodes from {}", nodes.len(), dir.display());
        Ok(Self { manifest, nodes })
    }

    /// Query the index for the `top_k` most similar nodes to `vector`.
    ///
    /// # Returns
    /// Hits sorted by decreasing similarity. Equal scores keep insertion order.
    ///
    /// # Errors
    /// `"dimension mismatch"` if `vector.len()` differs from the indexed embeddings.
    pub fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<NodeWithScore>, &'static str> {
        if self.nodes.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        if vector.len() != self.manifest.dimension {
            return Err("dimension mismatch");
        }

        let mut scored: Vec<(usize, f32)> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (i, cosine_similarity(vector, &node.embedding)))
            .collect();
        // stable sort keeps insertion order among ties
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| NodeWithScore {
                node: self.nodes[i].clone(),
                score,
            })
            .collect())
    }
}

/// True when `dir` exists and contains at least one entry.
pub fn index_dir_populated(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Cosine similarity of two equal-length vectors. Zero vectors score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
