//! Splitting document text into provider-sized TTS chunks.
//!
//! Paragraphs (separated by blank lines) are packed greedily into a chunk
//! until the next one would overflow the budget; a chunk that is still too
//! long (a single huge paragraph) is then hard-sliced. Lengths are counted in
//! characters, which is what the provider limits, and slices never split a
//! character.

use once_cell::sync::Lazy;
use regex::Regex;

/// ElevenLabs accepts up to 5 000 characters per generation.
pub const DEFAULT_API_MAX_CHARS: usize = 5000;

/// Headroom kept below the provider limit.
pub const SAFETY_MARGIN_CHARS: usize = 200;

/// Smallest budget [`safe_max_chars`] will hand out.
pub const MIN_SEGMENT_CHARS: usize = 500;

const PARAGRAPH_JOINER: &str = "\n\n";

static RE_PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n+").unwrap());

/// Conservative per-request character budget for a provider limit.
///
/// `0` means "use the provider default".
pub fn safe_max_chars(api_max_chars: usize) -> usize {
    let api_max = if api_max_chars == 0 {
        DEFAULT_API_MAX_CHARS
    } else {
        api_max_chars
    };
    api_max.saturating_sub(SAFETY_MARGIN_CHARS).max(MIN_SEGMENT_CHARS)
}

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Empty or whitespace-only input yields no chunks. A `max_chars` of 0 is
/// treated as 1.
pub fn split_for_tts(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let text = normalize_newlines(text);

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for para in RE_PARAGRAPH_BREAK.split(&text) {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }
        let para_len = para.chars().count();

        if current.is_empty() {
            current.push_str(para);
            current_len = para_len;
            continue;
        }

        if current_len + PARAGRAPH_JOINER.len() + para_len <= max_chars {
            current.push_str(PARAGRAPH_JOINER);
            current.push_str(para);
            current_len += PARAGRAPH_JOINER.len() + para_len;
            continue;
        }

        chunks.push(std::mem::take(&mut current));
        current.push_str(para);
        current_len = para_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
        .into_iter()
        .flat_map(|chunk| hard_slice(chunk, max_chars))
        .collect()
}

/// Slice `chunk` into pieces of at most `max_chars` characters.
fn hard_slice(chunk: String, max_chars: usize) -> Vec<String> {
    if chunk.chars().count() <= max_chars {
        return vec![chunk];
    }
    let chars: Vec<char> = chunk.chars().collect();
    chars
        .chunks(max_chars)
        .map(|piece| piece.iter().collect())
        .collect()
}

fn normalize_newlines(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_within(chunks: &[String], max: usize) {
        for (i, c) in chunks.iter().enumerate() {
            let n = c.chars().count();
            assert!(n <= max, "chunk {i} has {n} chars > {max}");
            assert!(!c.is_empty(), "chunk {i} is empty");
        }
    }

    #[test]
    fn safe_max_chars_applies_margin_and_floor() {
        assert_eq!(safe_max_chars(0), 4800);
        assert_eq!(safe_max_chars(5000), 4800);
        assert_eq!(safe_max_chars(10_000), 9800);
        assert_eq!(safe_max_chars(600), MIN_SEGMENT_CHARS);
        assert_eq!(safe_max_chars(100), MIN_SEGMENT_CHARS);
    }

    #[test]
    fn empty_input_gives_no_chunks() {
        assert!(split_for_tts("", 100).is_empty());
        assert!(split_for_tts("  \n\n \r\n  ", 100).is_empty());
    }

    #[test]
    fn packs_paragraphs_up_to_budget() {
        let text = "aaaa\n\nbbbb\n\ncccc";
        // "aaaa\n\nbbbb" is 10 chars
        assert_eq!(split_for_tts(text, 10), vec!["aaaa\n\nbbbb", "cccc"]);
        assert_eq!(split_for_tts(text, 16), vec!["aaaa\n\nbbbb\n\ncccc"]);
        assert_eq!(split_for_tts(text, 9), vec!["aaaa", "bbbb", "cccc"]);
    }

    #[test]
    fn single_newlines_stay_inside_a_paragraph() {
        let chunks = split_for_tts("line one\nline two\n\nnext", 100);
        assert_eq!(chunks, vec!["line one\nline two\n\nnext"]);
    }

    #[test]
    fn crlf_and_whitespace_only_lines_break_paragraphs() {
        let text = "first\r\n\r\nsecond\n   \t\nthird";
        assert_eq!(split_for_tts(text, 6), vec!["first", "second", "third"]);
    }

    #[test]
    fn long_paragraph_is_hard_sliced() {
        let para = "x".repeat(25);
        let chunks = split_for_tts(&format!("ab\n\n{para}\n\ncd"), 10);
        assert_eq!(
            chunks,
            vec![
                "ab".to_string(),
                "x".repeat(10),
                "x".repeat(10),
                "x".repeat(5),
                "cd".to_string()
            ]
        );
    }

    #[test]
    fn slicing_counts_characters_not_bytes() {
        let para = "æøå".repeat(10); // 30 chars, 60 bytes
        let chunks = split_for_tts(&para, 7);
        assert_within(&chunks, 7);
        assert_eq!(chunks.concat(), para);
    }

    #[test]
    fn never_exceeds_budget() {
        let mut text = String::new();
        for i in 0..200 {
            let len = (i * 37) % 173 + 1;
            text.push_str(&"ord ".repeat(len));
            text.push_str(if i % 3 == 0 { "\n\n" } else { "\n \n\n" });
        }
        for max in [1, 5, 50, 500, 1234, 4800] {
            assert_within(&split_for_tts(&text, max), max);
        }
    }

    #[test]
    fn deterministic() {
        let text = "Et afsnit.\n\nEt andet afsnit, lidt længere.\n\nTredje.";
        assert_eq!(split_for_tts(text, 30), split_for_tts(text, 30));
    }
}
