//! Token-budgeted chunking
//!
//! Splits long markdown text into ordered chunks that each fit a token
//! budget, cutting along structural boundaries (headings, list items,
//! reference markers, images) where possible.
//!
//! Joining the chunks of `chunk(text)` gives back `text` byte for byte.
//! Only a chunk holding a single word may exceed the budget.
//!
//! # Examples
//!
//! ```
//! use thinker_engine::chunker::Chunker;
//!
//! let chunker = Chunker::new(2000);
//! let chunks = chunker.chunk("# Title\nSome text\n- item\n");
//! assert_eq!(chunks.len(), 1);
//! ```

use regex::Regex;
use std::sync::{Arc, OnceLock};

/// Segments longer than this many characters are closed at the next line
const MAX_SEGMENT_CHARS: usize = 500;

static BOUNDARY_PATTERN: OnceLock<Regex> = OnceLock::new();
static PIECE_PATTERN: OnceLock<Regex> = OnceLock::new();

/// Line prefixes that start a new structural segment
fn boundary_pattern() -> &'static Regex {
    BOUNDARY_PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(?:#|[-*+]\s|\d+\.\s|\[\d+\]|!\[)").expect("Invalid boundary pattern")
    })
}

/// A word with its surrounding whitespace attached
fn piece_pattern() -> &'static Regex {
    PIECE_PATTERN.get_or_init(|| Regex::new(r"\s*\S+\s*").expect("Invalid piece pattern"))
}

/// Counts tokens in a piece of text
pub trait Tokenizer: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Model-agnostic token estimate: `max(ceil(bytes / 4), words)`
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproxTokenizer;

impl Tokenizer for ApproxTokenizer {
    fn count(&self, text: &str) -> usize {
        let by_bytes = text.len().div_ceil(4);
        let by_words = text.split_whitespace().count();
        by_bytes.max(by_words)
    }
}

/// Splits text into chunks within a token budget
#[derive(Clone)]
pub struct Chunker {
    tokenizer: Arc<dyn Tokenizer>,
    token_budget: usize,
}

impl std::fmt::Debug for Chunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunker")
            .field("token_budget", &self.token_budget)
            .finish()
    }
}

impl Chunker {
    /// Create a chunker using `ApproxTokenizer`. A zero budget is treated as 1.
    pub fn new(token_budget: usize) -> Self {
        Self::with_tokenizer(token_budget, Arc::new(ApproxTokenizer))
    }

    pub fn with_tokenizer(token_budget: usize, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            tokenizer,
            token_budget: token_budget.max(1),
        }
    }

    pub fn token_budget(&self) -> usize {
        self.token_budget
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.tokenizer.count(text)
    }

    /// Split `text` into ordered chunks. Empty text yields no chunks.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut current = String::new();

        for segment in segment(text) {
            if self.tokenizer.count(segment) > self.token_budget {
                flush(&mut chunks, &mut current);
                chunks.extend(self.split_oversized(segment));
                continue;
            }
            self.pack(&mut chunks, &mut current, segment);
        }

        flush(&mut chunks, &mut current);
        chunks
    }

    /// Split and wrap every chunk in `<start chunk i>` / `<end chunk i>` markers
    pub fn chunk_with_markers(&self, text: &str) -> Vec<String> {
        wrap_with_markers(&self.chunk(text))
    }

    /// Keep only the first chunk of text that exceeds the budget
    ///
    /// Returns the text unchanged when it already fits.
    pub fn truncate(&self, text: &str) -> String {
        if self.tokenizer.count(text) <= self.token_budget {
            return text.to_string();
        }

        let chunks = self.chunk(text);
        match chunks.split_first() {
            Some((first, rest)) if !rest.is_empty() => format!(
                "{}\n\n[... {} more chunk(s) omitted to fit a {}-token budget]",
                first.trim_end(),
                rest.len(),
                self.token_budget
            ),
            _ => text.to_string(),
        }
    }

    /// Greedy word-level repacking of a segment larger than the budget
    fn split_oversized(&self, segment: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();

        let pieces: Vec<&str> = piece_pattern()
            .find_iter(segment)
            .map(|m| m.as_str())
            .collect();

        // All-whitespace segment: nothing to split on
        if pieces.is_empty() {
            return vec![segment.to_string()];
        }

        for piece in pieces {
            self.pack(&mut chunks, &mut current, piece);
        }

        flush(&mut chunks, &mut current);
        chunks
    }

    fn pack(&self, chunks: &mut Vec<String>, current: &mut String, piece: &str) {
        if current.is_empty() {
            current.push_str(piece);
            return;
        }

        let mut candidate = String::with_capacity(current.len() + piece.len());
        candidate.push_str(current);
        candidate.push_str(piece);

        if self.tokenizer.count(&candidate) <= self.token_budget {
            *current = candidate;
        } else {
            flush(chunks, current);
            current.push_str(piece);
        }
    }
}

fn flush(chunks: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        chunks.push(std::mem::take(current));
    }
}

/// Split text into structural segments, line by line
fn segment(text: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut offset = 0;
    let mut current_chars = 0;

    for line in text.split_inclusive('\n') {
        let at_boundary = boundary_pattern().is_match(line);
        if offset > start && (at_boundary || current_chars > MAX_SEGMENT_CHARS) {
            segments.push(&text[start..offset]);
            start = offset;
            current_chars = 0;
        }
        offset += line.len();
        current_chars += line.chars().count();
    }

    if offset > start {
        segments.push(&text[start..offset]);
    }
    segments
}

/// Wrap chunks in 1-based `<start chunk i>` / `<end chunk i>` markers
pub fn wrap_with_markers(chunks: &[String]) -> Vec<String> {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            format!(
                "<start chunk {n}>\n{chunk}\n<end chunk {n}>",
                n = i + 1,
                chunk = chunk
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approx_tokenizer() {
        let t = ApproxTokenizer;
        assert_eq!(t.count(""), 0);
        assert_eq!(t.count("abcd"), 1);
        assert_eq!(t.count("abcde"), 2);
        // Many short words outweigh the byte estimate
        assert_eq!(t.count("a b c d e f"), 6);
    }

    #[test]
    fn test_segments_on_structure() {
        let text = "intro line\n# Heading\nbody\n- item one\n* item two\n1. numbered\n[3] ref\n![img](x)\nplain\n";
        let segments = segment(text);
        assert_eq!(
            segments,
            vec![
                "intro line\n",
                "# Heading\nbody\n",
                "- item one\n",
                "* item two\n",
                "1. numbered\n",
                "[3] ref\n",
                "![img](x)\nplain\n",
            ]
        );
    }

    #[test]
    fn test_long_segment_closed_after_limit() {
        let long_line = format!("{}\n", "x".repeat(MAX_SEGMENT_CHARS + 1));
        let text = format!("{}next\nafter\n", long_line);
        let segments = segment(&text);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1], "next\nafter\n");
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert!(Chunker::new(10).chunk("").is_empty());
    }

    #[test]
    fn test_packs_until_budget() {
        // Each item is 3 tokens by bytes
        let text = "- aaaaaaa\n- bbbbbbb\n- ccccccc\n";
        let chunks = Chunker::new(6).chunk(text);
        assert_eq!(chunks, vec!["- aaaaaaa\n- bbbbbbb\n", "- ccccccc\n"]);
    }

    #[test]
    fn test_oversized_segment_split_by_words() {
        let text = "alpha beta gamma delta epsilon zeta";
        let chunker = Chunker::new(3);
        let chunks = chunker.chunk(text);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), text);
        for chunk in &chunks {
            assert!(chunker.count_tokens(chunk) <= 3, "chunk over budget: {:?}", chunk);
        }
    }

    #[test]
    fn test_giant_word_emitted_alone() {
        let word = "z".repeat(100);
        let text = format!("short {} tail", word);
        let chunks = Chunker::new(2).chunk(&text);
        assert_eq!(chunks.concat(), text);
        assert!(chunks.iter().any(|c| c.trim() == word));
    }

    #[test]
    fn test_zero_budget_clamped() {
        let chunker = Chunker::new(0);
        assert_eq!(chunker.token_budget(), 1);
        let chunks = chunker.chunk("a b");
        assert_eq!(chunks.concat(), "a b");
    }

    #[test]
    fn test_markers_are_one_based() {
        let chunks = vec!["first".to_string(), "second".to_string()];
        let wrapped = wrap_with_markers(&chunks);
        assert_eq!(wrapped[0], "<start chunk 1>\nfirst\n<end chunk 1>");
        assert_eq!(wrapped[1], "<start chunk 2>\nsecond\n<end chunk 2>");
    }

    #[test]
    fn test_truncate_keeps_first_chunk() {
        let chunker = Chunker::new(4);
        let text = "# One\naaaa\n# Two\nbbbb\n# Three\ncccc\n";
        let cut = chunker.truncate(text);
        assert!(cut.starts_with("# One\naaaa"));
        assert!(cut.contains("more chunk(s) omitted"));

        assert_eq!(chunker.truncate("tiny"), "tiny");
    }
}
