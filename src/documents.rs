//! # Document processing
//!
//! [`DocumentProcessor`] turns a directory of files into a persisted [`VectorIndex`]:
//!
//! 1. [`load_documents`](DocumentProcessor::load_documents) reads every supported file,
//! 2. [`process_documents`](DocumentProcessor::process_documents) splits them into
//!    token-bounded chunks, embeds the chunks and writes the index to `VECTOR_STORE_DIR`,
//! 3. [`load_index`](DocumentProcessor::load_index) reopens a previously written index.
//!
//! Missing or empty inputs are not errors: they are logged and reported as "nothing to
//! do" (an empty collection or `None`). Unreadable files and embedding failures propagate.

use crate::chunker::SentenceSplitter;
use crate::config::RagConfig;
use crate::embeddings::{EMBED_BATCH_SIZE, Embedder};
use crate::vector_store::{TextNode, VectorIndex, index_dir_populated};
use chrono::{DateTime, Local};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::{DirEntry, WalkDir};

/// Extensions that are never read as text.
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "webp", "ico", "tiff", "zip", "gz", "tgz", "bz2", "xz",
    "7z", "rar", "tar", "exe", "dll", "so", "dylib", "bin", "o", "a", "class", "jar", "pyc",
    "mp3", "mp4", "wav", "mov", "avi", "mkv", "woff", "woff2", "ttf", "otf", "sqlite", "db",
];

/// A loaded source file.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub doc_id: String,
    pub text: String,
    /// `file_path`, `file_name`, `file_type`, `file_size`, `last_modified`
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    /// A document with no file behind it; the id is derived from the text alone.
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            doc_id: document_id("", &text),
            text,
            metadata: BTreeMap::new(),
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        self.metadata.get("file_name").map(String::as_str)
    }
}

/// Loads documents and owns creation and loading of the vector index.
#[derive(Debug)]
pub struct DocumentProcessor {
    documents_dir: PathBuf,
    vector_store_dir: PathBuf,
    recursive: bool,
    splitter: SentenceSplitter,
    embedder: Embedder,
}

impl DocumentProcessor {
    pub fn new(config: &RagConfig, embedder: Embedder) -> Self {
        Self {
            documents_dir: config.documents_dir.clone(),
            vector_store_dir: config.vector_store_dir.clone(),
            recursive: false,
            splitter: SentenceSplitter::new(config.chunk_size, config.chunk_overlap),
            embedder,
        }
    }

    /// Descend into subdirectories when loading.
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Replace the default documents directory.
    pub fn with_documents_dir(mut self, documents_dir: impl Into<PathBuf>) -> Self {
        self.documents_dir = documents_dir.into();
        self
    }

    pub fn documents_dir(&self) -> &Path {
        &self.documents_dir
    }

    pub fn vector_store_dir(&self) -> &Path {
        &self.vector_store_dir
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    /// Read every supported file in `directory` (the default documents directory when
    /// `None`), in file-name order.
    ///
    /// A missing or empty directory yields an empty collection and a warning.
    pub fn load_documents(&self, directory: Option<&Path>) -> Result<Vec<Document>, Box<dyn Error>> {
        let directory = directory.unwrap_or(self.documents_dir.as_path());

        if !directory.is_dir() {
            warn!("Documents directory {} does not exist", directory.display());
            return Ok(Vec::new());
        }

        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let walker = WalkDir::new(directory)
            .min_depth(1)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !is_hidden(entry));

        let mut documents = Vec::new();
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(document) = read_document(entry.path())? {
                documents.push(document);
            }
        }

        if documents.is_empty() {
            warn!("No documents found in {}", directory.display());
        } else {
            info!("Loaded {} documents from {}", documents.len(), directory.display());
        }
        Ok(documents)
    }

    /// Chunk, embed and persist `documents` (loaded from the default directory when
    /// `None`). Returns `None` when there is nothing to index.
    pub async fn process_documents(
        &self,
        documents: Option<Vec<Document>>,
    ) -> Result<Option<VectorIndex>, Box<dyn Error>> {
        let documents = match documents {
            Some(documents) => documents,
            None => self.load_documents(None)?,
        };

        if documents.is_empty() {
            warn!("No documents to index");
            return Ok(None);
        }

        let mut pending: Vec<(usize, usize, String)> = Vec::new();
        for (doc_index, document) in documents.iter().enumerate() {
            for (chunk_index, chunk) in self.splitter.split_text(&document.text).into_iter().enumerate() {
                pending.push((doc_index, chunk_index, chunk));
            }
        }

        if pending.is_empty() {
            warn!("Documents contain no text to index");
            return Ok(None);
        }

        info!(
            "Embedding {} chunks from {} documents with {}",
            pending.len(),
            documents.len(),
            self.embedder.model_name()
        );

        let progress = ProgressBar::new(pending.len() as u64);
        progress.set_style(
            ProgressStyle::default_bar().template("{bar:40.cyan/blue} {pos}/{len} chunks {msg}")?,
        );

        let mut nodes = Vec::with_capacity(pending.len());
        for batch in pending.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|(_, _, text)| text.clone()).collect();
            let embeddings = self.embedder.embed_texts(&texts).await?;

            for ((doc_index, chunk_index, text), embedding) in batch.iter().zip(embeddings) {
                let document = &documents[*doc_index];
                nodes.push(TextNode::new(
                    &document.doc_id,
                    *chunk_index,
                    text.clone(),
                    document.metadata.clone(),
                    embedding,
                ));
            }
            progress.inc(batch.len() as u64);
        }
        progress.finish_and_clear();

        let index = VectorIndex::new(
            &self.embedder.backend().to_string(),
            self.embedder.model_name(),
            nodes,
        )?;
        index.persist(&self.vector_store_dir)?;

        Ok(Some(index))
    }

    /// Open the persisted index, or `None` if the vector store directory is missing or
    /// empty.
    pub fn load_index(&self) -> Result<Option<VectorIndex>, Box<dyn Error>> {
        if !index_dir_populated(&self.vector_store_dir) {
            warn!("No index found in {}", self.vector_store_dir.display());
            return Ok(None);
        }

        let index = VectorIndex::load(&self.vector_store_dir)?;

        let manifest = index.manifest();
        if manifest.embedding_model != self.embedder.model_name() {
            warn!(
                "Index was built with {} but {} is configured; results may be meaningless",
                manifest.embedding_model,
                self.embedder.model_name()
            );
        }
        Ok(Some(index))
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

fn document_id(path: &str, text: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(path.as_bytes());
    hasher.update(&[0]);
    hasher.update(text.as_bytes());
    hasher.finalize().to_hex().as_str()[..16].to_string()
}

/// Read one file, or `None` when its type is not indexable.
fn read_document(path: &Path) -> Result<Option<Document>, Box<dyn Error>> {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if BINARY_EXTENSIONS.contains(&extension.as_str()) {
        warn!("Skipping binary file {}", path.display());
        return Ok(None);
    }

    let text = if extension == "pdf" {
        pdf_extract::extract_text(path)?
    } else {
        String::from_utf8_lossy(&fs::read(path)?).into_owned()
    };

    let file_meta = fs::metadata(path)?;
    let last_modified = file_meta
        .modified()
        .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d").to_string())
        .unwrap_or_default();

    let file_path = path.to_string_lossy().into_owned();
    let mut metadata = BTreeMap::new();
    metadata.insert(
        "file_name".to_string(),
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    );
    metadata.insert("file_type".to_string(), extension);
    metadata.insert("file_size".to_string(), file_meta.len().to_string());
    metadata.insert("last_modified".to_string(), last_modified);
    metadata.insert("file_path".to_string(), file_path.clone());

    Ok(Some(Document {
        doc_id: document_id(&file_path, &text),
        text,
        metadata,
    }))
}
