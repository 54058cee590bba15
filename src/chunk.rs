//! Line chunking for request pacing.
//!
//! Each input line is split into bounded, order-preserving chunks before it
//! is sent, so no single synthesis request outgrows the wire frame. Chunk
//! boundaries count Unicode codepoints, never bytes, so a multi-byte
//! character is never torn apart and concatenating the chunks reproduces the
//! line exactly.

use once_cell::sync::Lazy;
use regex::Regex;

/// Floor applied to caller-supplied chunk lengths.
pub const MIN_CHUNK_LEN: usize = 100;

/// Matches any content worth synthesizing: a CJK ideograph or an ASCII
/// alphanumeric character.
static SYNTHESIZABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[\u{4e00}-\u{9fa5}a-z0-9]").expect("valid synthesizable pattern"));

/// Resolves the effective chunk length: `None` or anything below
/// [`MIN_CHUNK_LEN`] is clamped up to the floor.
pub fn effective_chunk_len(requested: Option<usize>) -> usize {
    requested.map_or(MIN_CHUNK_LEN, |n| n.max(MIN_CHUNK_LEN))
}

/// Splits a line into chunks of at most `max_chunk_len` codepoints.
///
/// Order is preserved and the concatenation of all chunks equals the input.
/// An empty line yields no chunks.
pub fn split_line(line: &str, max_chunk_len: usize) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    chars
        .chunks(max_chunk_len.max(1))
        .map(|piece| piece.iter().collect())
        .collect()
}

/// Returns true when the chunk contains nothing to synthesize.
///
/// Skippable chunks are never sent over the network; they resolve directly
/// to a zero-length audio result.
pub fn is_skippable(text: &str) -> bool {
    !SYNTHESIZABLE.is_match(text)
}
