//! A MapReduce-compatible implementation of word count.
//!
//! Tokens are runs of ASCII letters, optionally joined by single internal
//! apostrophes (`don't`, `o'clock`). Whitespace and a fixed punctuation set
//! separate tokens; anything else (digits, other symbols) disqualifies the
//! token it appears in.

use anyhow::Result;

use crate::*;

/// Punctuation that separates tokens. Apostrophes are deliberately absent.
pub const SEPARATORS: &[char] = &[
    '~', '!', '@', '#', '$', '%', '^', '&', '*', '(', ')', '-', '_', '+', '=', '{', '}', '[', ']',
    '|', ':', ';', '"', '<', '>', ',', '.', '?', '/',
];

pub fn is_separator(c: char) -> bool {
    c.is_whitespace() || SEPARATORS.contains(&c)
}

/// Byte-level view of [`is_separator`] for ASCII bytes. Never true for a byte
/// inside a multi-byte UTF-8 sequence.
pub fn is_separator_byte(b: u8) -> bool {
    b.is_ascii() && is_separator(b as char)
}

fn is_word(token: &str) -> bool {
    !token.is_empty()
        && token
            .split('\'')
            .all(|run| !run.is_empty() && run.bytes().all(|b| b.is_ascii_alphabetic()))
}

/// Every valid token of `content`, in order.
pub fn tokens(content: &str) -> impl Iterator<Item = &str> {
    content
        .split(is_separator)
        .map(|t| t.trim_matches('\''))
        .filter(|t| is_word(t))
}

pub fn map(content: &str) -> MapOutput {
    Ok(tokens(content)
        .map(|word| IntermediateRecord::new(word, 1))
        .collect())
}

/// Case-insensitive variant: keys are lower-cased.
pub fn map_folded(content: &str) -> MapOutput {
    Ok(tokens(content)
        .map(|word| IntermediateRecord::new(word.to_ascii_lowercase(), 1))
        .collect())
}

pub fn reduce(_key: &str, values: Box<dyn Iterator<Item = u64> + '_>) -> Result<u64> {
    Ok(values.sum())
}
