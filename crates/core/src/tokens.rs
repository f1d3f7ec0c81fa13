//! Token estimation fallback
//!
//! Used wherever no tokenizer adapter is injected. The estimate counts
//! grapheme clusters rather than bytes so multi-byte scripts are not
//! overcounted.

use unicode_segmentation::UnicodeSegmentation;

/// Estimate the token count of a text at roughly four characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    let graphemes = text.graphemes(true).count();
    (graphemes / 4).max(if graphemes > 0 { 1 } else { 0 })
}
