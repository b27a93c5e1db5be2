//! Token estimation for prompt budgeting.
//!
//! Provider-reported usage is authoritative for accounting; these counts
//! only drive packing and truncation decisions before the call. Counting
//! uses the `cl100k_base` encoding and falls back to a word heuristic when
//! the encoder cannot be built.

use once_cell::sync::Lazy;
use tiktoken_rs::{cl100k_base, CoreBPE};
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

const ELLIPSIS: char = '…';

static ENCODER: Lazy<Option<CoreBPE>> = Lazy::new(|| match cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        warn!(error = %e, "Tokenizer unavailable, using word heuristic");
        None
    }
});

/// Tokens `text` costs in the prompt.
pub fn estimate_tokens(text: &str) -> usize {
    match ENCODER.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => heuristic_tokens(text),
    }
}

/// ~1.3 tokens per word plus a small formatting overhead.
fn heuristic_tokens(text: &str) -> usize {
    let words = text.unicode_words().count();
    if words == 0 {
        return if text.trim().is_empty() { 0 } else { 1 };
    }
    ((words as f64 * 1.3) + 2.0).ceil() as usize
}

/// Cut `text` so it fits in `limit` tokens, marking the cut with `…`.
pub fn truncate_to_tokens(text: &str, limit: usize) -> String {
    if estimate_tokens(text) <= limit {
        return text.to_string();
    }
    if limit <= 1 {
        return String::new();
    }

    let mut truncated = match ENCODER.as_ref() {
        Some(bpe) => {
            let tokens = bpe.encode_with_special_tokens(text);
            decode_prefix(bpe, &tokens, limit - 1)
        }
        None => word_prefix(text, limit),
    };
    truncated.push(ELLIPSIS);

    // re-encoding across the cut can merge differently
    while estimate_tokens(&truncated) > limit {
        truncated.pop();
        if truncated.pop().is_none() {
            return String::new();
        }
        truncated = truncated.trim_end().to_string();
        truncated.push(ELLIPSIS);
    }
    truncated
}

/// Longest decodable prefix of at most `keep` tokens; a cut inside a
/// multi-byte character does not decode, so back off until it does.
fn decode_prefix(bpe: &CoreBPE, tokens: &[u32], keep: usize) -> String {
    let mut keep = keep.min(tokens.len());
    while keep > 0 {
        if let Ok(prefix) = bpe.decode(tokens[..keep].to_vec()) {
            return prefix.trim_end().to_string();
        }
        keep -= 1;
    }
    String::new()
}

fn word_prefix(text: &str, limit: usize) -> String {
    let max_words = (limit.saturating_sub(2) as f64 / 1.3).floor() as usize;
    let mut end = 0;
    for (count, (index, word)) in text.unicode_word_indices().enumerate() {
        if count == max_words {
            break;
        }
        end = index + word.len();
    }
    text[..end].trim_end().to_string()
}
