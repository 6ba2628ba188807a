//! # Token-aware text splitting
//!
//! Documents are cut into chunks of at most `chunk_size` tokens (counted with the
//! `cl100k_base` encoding) before they are embedded. Consecutive chunks share up to
//! `chunk_overlap` tokens of trailing text so that a sentence sitting on a boundary is
//! retrievable from either side.
//!
//! Splitting prefers natural boundaries and only falls back to finer ones when a piece is
//! still too large:
//!
//! 1. paragraphs (`\n\n`)
//! 2. sentences (`.` `!` `?` `。` `！` `？` and line breaks)
//! 3. whitespace-separated words
//! 4. single characters

use once_cell::sync::Lazy;
use regex::Regex;
use tiktoken_rs::CoreBPE;

static SENTENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[^.!?。！？\n]*[.!?。！？\n]+|[^.!?。！？\n]+").expect("valid regex")
});

/// Splits text into overlapping, token-bounded chunks.
#[derive(Clone)]
pub struct SentenceSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    bpe: &'static CoreBPE,
}

impl std::fmt::Debug for SentenceSplitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentenceSplitter")
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .finish()
    }
}

impl SentenceSplitter {
    /// `chunk_size` is clamped to at least one token and `chunk_overlap` to below it.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
            bpe: tiktoken_rs::cl100k_base_singleton(),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Number of `cl100k_base` tokens in `text`.
    pub fn token_count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    /// Split `text` into chunks. Whitespace-only chunks are dropped and every chunk is
    /// trimmed.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut pieces = Vec::new();
        self.split_to_fit(text, 0, &mut pieces);
        self.merge(pieces)
    }

    /// Recursively break `text` until every piece fits into one chunk.
    fn split_to_fit(&self, text: &str, level: usize, out: &mut Vec<(String, usize)>) {
        let tokens = self.token_count(text);
        if tokens <= self.chunk_size {
            out.push((text.to_string(), tokens));
            return;
        }

        let parts: Vec<&str> = match level {
            0 => text.split_inclusive("\n\n").collect(),
            1 => SENTENCE.find_iter(text).map(|m| m.as_str()).collect(),
            2 => text.split_inclusive(char::is_whitespace).collect(),
            _ => return self.split_chars(text, out),
        };

        if parts.len() <= 1 {
            return self.split_to_fit(text, level + 1, out);
        }
        for part in parts {
            self.split_to_fit(part, level + 1, out);
        }
    }

    fn split_chars(&self, text: &str, out: &mut Vec<(String, usize)>) {
        let mut current = String::new();
        let mut current_tokens = 0;
        for ch in text.chars() {
            current.push(ch);
            let tokens = self.token_count(&current);
            if tokens > self.chunk_size && current.chars().count() > 1 {
                current.pop();
                out.push((std::mem::take(&mut current), current_tokens));
                current.push(ch);
                current_tokens = self.token_count(&current);
            } else {
                current_tokens = tokens;
            }
        }
        if !current.is_empty() {
            out.push((current, current_tokens));
        }
    }

    /// Greedily pack pieces into chunks, carrying trailing pieces over as overlap.
    fn merge(&self, pieces: Vec<(String, usize)>) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: Vec<(String, usize)> = Vec::new();
        let mut window_tokens = 0;

        for (piece, tokens) in pieces {
            if window_tokens + tokens > self.chunk_size && !window.is_empty() {
                push_chunk(&mut chunks, &window);

                // keep the longest suffix that fits in the overlap and leaves room for `piece`
                let mut keep = 0;
                let mut kept_tokens = 0;
                for (_, t) in window.iter().rev() {
                    if kept_tokens + t > self.chunk_overlap
                        || kept_tokens + t + tokens > self.chunk_size
                    {
                        break;
                    }
                    kept_tokens += t;
                    keep += 1;
                }
                window.drain(..window.len() - keep);
                window_tokens = kept_tokens;
            }
            window_tokens += tokens;
            window.push((piece, tokens));
        }
        push_chunk(&mut chunks, &window);

        chunks
    }
}

fn push_chunk(chunks: &mut Vec<String>, window: &[(String, usize)]) {
    let text: String = window.iter().map(|(p, _)| p.as_str()).collect();
    let text = text.trim();
    if !text.is_empty() {
        chunks.push(text.to_string());
    }
}
