//! Deterministic text chunker.
//!
//! Splits file content into bounded chunks at line boundaries with a
//! configurable overlap. Identical `(content, config)` always yields the
//! identical chunk sequence; chunk hashes are SHA-256 of the chunk text.
//!
//! An oversized single line is hard-split at the last whitespace (or, in
//! sentence mode, the last sentence break) that fits.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::hash::sha256_hex;

/// Preferred split boundary inside an oversized line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkBoundary {
    #[default]
    Line,
    Sentence,
}

/// Chunker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Maximum characters per chunk. Derived from the embedding provider's
    /// `max_tokens_per_text` (≈4 chars per token).
    pub max_chars: usize,
    /// Lines repeated from the end of one chunk at the start of the next.
    pub overlap_lines: usize,
    pub boundary: ChunkBoundary,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chars: 2000,
            overlap_lines: 2,
            boundary: ChunkBoundary::Line,
        }
    }
}

impl ChunkConfig {
    /// Size a config for a provider's token budget (≈4 chars per token).
    pub fn for_token_budget(max_tokens: usize) -> Self {
        Self {
            max_chars: max_tokens.saturating_mul(4).max(1),
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_chars == 0 {
            return Err(CoreError::InvalidChunkConfig(
                "max_chars must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// A bounded slice of a file, ready for embedding. Lines are 1-based and
/// inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: u32,
    pub total: u32,
    pub content: String,
    pub start_line: u32,
    pub end_line: u32,
    pub content_hash: String,
}

/// Split `content` into chunks. Empty (or whitespace-only) content yields an
/// empty vector.
pub fn chunk_text(content: &str, config: &ChunkConfig) -> Result<Vec<Chunk>> {
    config.validate()?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let lines: Vec<&str> = content.lines().collect();
    let mut pieces: Vec<(String, u32, u32)> = Vec::new();

    let mut i = 0usize;
    while i < lines.len() {
        let line = lines[i];

        // A single line over the budget is hard-split on its own.
        if line.chars().count() > config.max_chars {
            for part in split_long_line(line, config.max_chars, config.boundary) {
                pieces.push((part, (i + 1) as u32, (i + 1) as u32));
            }
            i += 1;
            continue;
        }

        let start = i;
        let mut char_count = 0usize;
        let mut j = i;
        while j < lines.len() {
            let candidate = lines[j].chars().count() + usize::from(j > start);
            if j > start && char_count + candidate > config.max_chars {
                break;
            }
            if lines[j].chars().count() > config.max_chars {
                break;
            }
            char_count += candidate;
            j += 1;
        }

        let text = lines[start..j].join("\n");
        pieces.push((text, (start + 1) as u32, j as u32));

        // Overlap the tail of this chunk into the next, always advancing.
        let next = j.saturating_sub(config.overlap_lines);
        i = if next > start { next } else { j };
        if j >= lines.len() {
            break;
        }
    }

    let total = pieces.len() as u32;
    Ok(pieces
        .into_iter()
        .enumerate()
        .map(|(index, (content, start_line, end_line))| Chunk {
            index: index as u32,
            total,
            content_hash: sha256_hex(content.as_bytes()),
            content,
            start_line,
            end_line,
        })
        .collect())
}

/// Split one oversized line into pieces of at most `max_chars` characters,
/// preferring the configured boundary, falling back to whitespace, then to a
/// hard character cut.
fn split_long_line(line: &str, max_chars: usize, boundary: ChunkBoundary) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = line;
    while !rest.is_empty() {
        let char_len = rest.chars().count();
        if char_len <= max_chars {
            out.push(rest.to_string());
            break;
        }
        // Byte offset of the max_chars-th character.
        let hard_cut = rest
            .char_indices()
            .nth(max_chars)
            .map(|(b, _)| b)
            .unwrap_or(rest.len());
        let window = &rest[..hard_cut];

        let cut = match boundary {
            ChunkBoundary::Sentence => window
                .rfind(". ")
                .map(|p| p + 2)
                .or_else(|| window.rfind(char::is_whitespace).map(|p| p + 1)),
            ChunkBoundary::Line => window.rfind(char::is_whitespace).map(|p| p + 1),
        }
        .filter(|&p| p > 0)
        .unwrap_or(hard_cut);

        out.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_content_yields_no_chunks() {
        let chunks = chunk_text("", &ChunkConfig::default()).unwrap();
        assert!(chunks.is_empty());
        let chunks = chunk_text("   \n\n", &ChunkConfig::default()).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn small_content_is_one_chunk() {
        let chunks = chunk_text("fn main() {}\n", &ChunkConfig::default()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].total, 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 1);
        assert_eq!(chunks[0].content, "fn main() {}");
    }

    #[test]
    fn splits_at_line_boundaries_with_overlap() {
        let content = (1..=10)
            .map(|i| format!("line number {i:02}"))
            .collect::<Vec<_>>()
            .join("\n");
        let config = ChunkConfig {
            max_chars: 50,
            overlap_lines: 1,
            boundary: ChunkBoundary::Line,
        };
        let chunks = chunk_text(&content, &config).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.content.chars().count() <= 50);
        }
        // Overlap: each later chunk starts on the previous chunk's last line.
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start_line, pair[0].end_line);
        }
        // Full line coverage.
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks.last().unwrap().end_line, 10);
    }

    #[test]
    fn deterministic() {
        let content = "alpha\nbeta\ngamma\ndelta\n".repeat(40);
        let config = ChunkConfig {
            max_chars: 64,
            overlap_lines: 2,
            boundary: ChunkBoundary::Line,
        };
        let one = chunk_text(&content, &config).unwrap();
        let two = chunk_text(&content, &config).unwrap();
        assert_eq!(one, two);
    }

    #[test]
    fn oversized_line_is_hard_split_at_whitespace() {
        let line = "word ".repeat(100);
        let config = ChunkConfig {
            max_chars: 40,
            overlap_lines: 0,
            boundary: ChunkBoundary::Line,
        };
        let chunks = chunk_text(line.trim_end(), &config).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.content.chars().count() <= 40);
            assert_eq!(chunk.start_line, 1);
            assert_eq!(chunk.end_line, 1);
        }
    }

    #[test]
    fn sentence_boundary_prefers_sentence_breaks() {
        let line = "First sentence is here. Second sentence follows. Third one closes.";
        let config = ChunkConfig {
            max_chars: 30,
            overlap_lines: 0,
            boundary: ChunkBoundary::Sentence,
        };
        let chunks = chunk_text(line, &config).unwrap();
        assert!(chunks[0].content.ends_with(". "));
    }

    #[test]
    fn hashes_identify_content() {
        let chunks = chunk_text("one\n", &ChunkConfig::default()).unwrap();
        assert_eq!(chunks[0].content_hash, crate::hash::sha256_hex(b"one"));
    }

    #[test]
    fn zero_max_chars_is_invalid() {
        let config = ChunkConfig {
            max_chars: 0,
            overlap_lines: 0,
            boundary: ChunkBoundary::Line,
        };
        assert!(matches!(
            chunk_text("x", &config),
            Err(CoreError::InvalidChunkConfig(_))
        ));
    }

    #[test]
    fn token_budget_sizing() {
        let config = ChunkConfig::for_token_budget(500);
        assert_eq!(config.max_chars, 2000);
    }
}
