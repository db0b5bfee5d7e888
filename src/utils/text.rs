//! Text measurement and truncation helpers for narrative content.
//!
//! Lengths throughout the pipeline are measured in *glyphs* (Unicode scalar
//! values), not bytes, so word budgets behave the same for scripts with and
//! without whitespace-delimited words.

/// Sentence-ending punctuation recognized when truncating summaries.
const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', '。', '！', '？'];

/// Number of glyphs in a string.
#[must_use]
pub fn glyph_count(text: &str) -> usize {
    text.chars().count()
}

/// The first `max_glyphs` glyphs of `text`.
#[must_use]
pub fn glyph_prefix(text: &str, max_glyphs: usize) -> &str {
    match text.char_indices().nth(max_glyphs) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// The last `max_glyphs` glyphs of `text`.
#[must_use]
pub fn glyph_suffix(text: &str, max_glyphs: usize) -> &str {
    let total = glyph_count(text);
    if total <= max_glyphs {
        return text;
    }
    let skip = total - max_glyphs;
    match text.char_indices().nth(skip) {
        Some((byte_idx, _)) => &text[byte_idx..],
        None => text,
    }
}

/// Truncate to at most `max_glyphs`, preferring the last complete sentence.
///
/// If a sentence terminator appears after `min_glyphs`, the cut lands just
/// after it; otherwise the hard prefix is returned with an ellipsis. This is
/// how chapter summaries are derived from chapter openings.
///
/// # Examples
///
/// ```
/// use fableforge::utils::text::truncate_at_sentence;
///
/// let text = "The door opened. Rain fell on the threshold. Nobody entered the";
/// let cut = truncate_at_sentence(text, 45, 10);
/// assert_eq!(cut, "The door opened. Rain fell on the threshold.");
/// ```
#[must_use]
pub fn truncate_at_sentence(text: &str, max_glyphs: usize, min_glyphs: usize) -> String {
    let prefix = glyph_prefix(text, max_glyphs);
    let mut cut = None;
    for (glyph_idx, (byte_idx, ch)) in prefix.char_indices().enumerate() {
        if glyph_idx >= min_glyphs && SENTENCE_TERMINATORS.contains(&ch) {
            cut = Some(byte_idx + ch.len_utf8());
        }
    }
    match cut {
        Some(byte_idx) => prefix[..byte_idx].to_string(),
        None if glyph_count(text) <= max_glyphs => text.to_string(),
        None => format!("{prefix}..."),
    }
}

/// Whether the text ends in (or contains) sentence punctuation.
#[must_use]
pub fn has_sentence_punctuation(text: &str) -> bool {
    text.chars().any(|c| SENTENCE_TERMINATORS.contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_glyphs_not_bytes() {
        assert_eq!(glyph_count("naïve"), 5);
        assert_eq!(glyph_count("夜が明けた"), 5);
    }

    #[test]
    fn prefix_and_suffix_respect_glyph_boundaries() {
        assert_eq!(glyph_prefix("夜が明けた", 2), "夜が");
        assert_eq!(glyph_suffix("夜が明けた", 2), "けた");
        assert_eq!(glyph_suffix("ab", 10), "ab");
    }

    #[test]
    fn truncation_prefers_sentence_boundary() {
        let text = "He ran. She followed him into the dark and did not look back once";
        let cut = truncate_at_sentence(text, 40, 3);
        assert_eq!(cut, "He ran.");
    }

    #[test]
    fn truncation_falls_back_to_ellipsis() {
        let text = "a".repeat(300);
        let cut = truncate_at_sentence(&text, 200, 50);
        assert_eq!(glyph_count(&cut), 203);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn short_text_is_returned_whole() {
        assert_eq!(truncate_at_sentence("brief", 200, 50), "brief");
    }
}
