//! Text preparation for TTS — sentence segmentation of generated replies.
//!
//! Pure functions, no I/O. The splitter is a heuristic: ellipses, quoted
//! dialogue and unlisted abbreviations fall through to the generic
//! `[.!?]+ whitespace` rule and may split in linguistically wrong places.

use regex::Regex;
use std::sync::LazyLock;

/// Stands in for an abbreviation's period while boundaries are located.
/// Private-use code point, so it never collides with generated text.
const SENTINEL: char = '\u{E000}';

// Compiled regexes — allocated once, reused across calls.
static RE_ABBREVIATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(Mr|Mrs|Ms|Dr|Prof|Sr|Jr|St|Mt|vs|etc|e\.g|i\.e)\.").unwrap()
});
static RE_BOUNDARY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]+\s+").unwrap());
static RE_TERMINAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[.!?]+["'”’)\]]*$"#).unwrap());

/// Split generated text into sentences suitable for independent synthesis.
///
/// Punctuation stays attached to the sentence it ends. Known abbreviations
/// (`Dr.`, `Mr.`, `etc.`, ...) do not end a sentence. A trailing fragment
/// without terminal punctuation is returned as the final sentence. Results
/// are trimmed; empty results are dropped.
pub fn split_sentences(text: &str) -> Vec<String> {
    let replacement = format!("${{1}}{SENTINEL}");
    let protected = RE_ABBREVIATION.replace_all(text, replacement.as_str());

    let mut sentences = Vec::new();
    let mut pending = String::new();
    let mut start = 0;

    for boundary in RE_BOUNDARY.find_iter(&protected) {
        // Keep the punctuation run, drop the whitespace after it.
        let end = boundary.start() + boundary.as_str().trim_end().len();
        accumulate(&mut sentences, &mut pending, &protected[start..end]);
        start = boundary.end();
    }
    accumulate(&mut sentences, &mut pending, &protected[start..]);

    if !pending.is_empty() {
        sentences.push(pending);
    }

    sentences
}

/// Append a fragment to the pending sentence, emitting it once it ends on
/// sentence-terminal punctuation.
fn accumulate(sentences: &mut Vec<String>, pending: &mut String, fragment: &str) {
    let restored = fragment.replace(SENTINEL, ".");
    let piece = restored.trim();
    if piece.is_empty() {
        return;
    }

    if !pending.is_empty() {
        pending.push(' ');
    }
    pending.push_str(piece);

    if RE_TERMINAL.is_match(pending) {
        sentences.push(std::mem::take(pending));
    }
}
