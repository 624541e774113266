//! Text helpers shared by the chunker, graph builder, ranker, and
//! synthesizer: byte-span sentence/paragraph splitting and term sets.

use std::collections::BTreeSet;

/// Words ignored when building term sets.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "have", "him", "his", "how", "its", "may", "new", "now", "old",
    "see", "two", "who", "did", "does", "get", "let", "say", "she", "too", "use", "that", "this",
    "with", "from", "they", "will", "would", "there", "their", "what", "about", "which", "when",
    "make", "like", "into", "than", "then", "them", "these", "some", "could", "other", "more",
    "also", "been", "were", "where", "while", "why", "your", "each", "only", "such", "very",
    "should", "over",
];

/// Titles that lead a person's name. A period after one does not end a sentence.
pub const HONORIFICS: &[&str] = &["Dr", "Mr", "Mrs", "Ms", "Prof"];

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
pub fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Byte index just past the char starting at `index`.
pub fn next_char_boundary(s: &str, index: usize) -> usize {
    s[index..]
        .chars()
        .next()
        .map(|c| index + c.len_utf8())
        .unwrap_or(s.len())
}

/// Shrink `[start, end)` so it excludes leading and trailing whitespace.
pub fn trim_span(s: &str, start: usize, end: usize) -> (usize, usize) {
    let slice = &s[start..end];
    let lead = slice.len() - slice.trim_start().len();
    let trail = slice.len() - slice.trim_end().len();
    if lead == slice.len() {
        return (start, start);
    }
    (start + lead, end - trail)
}

/// Split `[start, end)` of `text` into paragraph spans on blank lines.
///
/// Spans are trimmed; empty paragraphs are skipped.
pub fn paragraph_spans(text: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
    let region = &text[start..end];
    let mut spans = Vec::new();
    let mut cursor = 0;
    for (pos, sep) in region.match_indices("\n\n") {
        push_trimmed(text, start + cursor, start + pos, &mut spans);
        cursor = pos + sep.len();
    }
    push_trimmed(text, start + cursor, end, &mut spans);
    spans
}

/// Split `[start, end)` of `text` into sentence spans.
///
/// A sentence ends after `.`, `!`, or `?` when followed by whitespace or
/// the end of the region, except for the period of an honorific (`Dr.`).
/// Spans are trimmed; empty sentences are skipped.
pub fn sentence_spans(text: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
    let region = &text[start..end];
    let mut spans = Vec::new();
    let mut sentence_start = 0;
    let mut iter = region.char_indices().peekable();
    while let Some((i, c)) = iter.next() {
        if matches!(c, '.' | '!' | '?') {
            let at_break = match iter.peek() {
                None => true,
                Some((_, next)) => next.is_whitespace(),
            } && !(c == '.' && ends_with_honorific(&region[..i]));
            if at_break {
                let stop = i + c.len_utf8();
                push_trimmed(text, start + sentence_start, start + stop, &mut spans);
                sentence_start = stop;
            }
        }
    }
    push_trimmed(text, start + sentence_start, end, &mut spans);
    spans
}

fn ends_with_honorific(prefix: &str) -> bool {
    let word = prefix
        .rsplit(|c: char| !c.is_alphabetic())
        .next()
        .unwrap_or("");
    HONORIFICS.contains(&word)
}

fn push_trimmed(text: &str, start: usize, end: usize, out: &mut Vec<(usize, usize)>) {
    if start >= end {
        return;
    }
    let (s, e) = trim_span(text, start, end);
    if s < e {
        out.push((s, e));
    }
}

/// Split text into trimmed sentences.
pub fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    for (ps, pe) in paragraph_spans(text, 0, text.len()) {
        for (s, e) in sentence_spans(text, ps, pe) {
            out.push(&text[s..e]);
        }
    }
    out
}

/// Lowercase alphanumeric tokens, in order, including stopwords.
pub fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Content-bearing terms: tokens of length ≥ 3 that are not stopwords.
pub fn terms(text: &str) -> BTreeSet<String> {
    tokens(text)
        .into_iter()
        .filter(|t| t.chars().count() >= 3 && !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Jaccard similarity of two term sets; `0.0` when both are empty.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count();
    let union = a.len() + b.len() - inter;
    inter as f64 / union as f64
}

/// Lowercase and collapse internal whitespace.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// First `max_chars` characters of `text`, for excerpts and snippets.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
