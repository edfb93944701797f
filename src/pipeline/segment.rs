//! Best-effort text splitting for pages without positional blocks.
//!
//! Splits on blank lines first, then on single line breaks, then on
//! sentence boundaries, going finer only while there are too few pieces. Segments are handed out by order, so the result
//! is lossy by nature; callers must flag whatever they build from it.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());

static RE_SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]+\s+").unwrap());

/// Split `text` into exactly `n` segments in reading order.
///
/// Surplus pieces are merged into contiguous, evenly sized groups; missing
/// ones are padded with empty strings.
pub fn split_segments(text: &str, n: usize) -> Vec<String> {
    if n == 0 {
        return Vec::new();
    }

    let mut pieces = paragraphs(text);
    let refinements: [fn(&str) -> Vec<String>; 2] = [lines, sentences];
    for refine in refinements {
        if pieces.len() >= n {
            break;
        }
        let finer: Vec<String> = pieces.iter().flat_map(|p| refine(p)).collect();
        if finer.len() > pieces.len() {
            pieces = finer;
        }
    }

    let mut segments: Vec<String> = if pieces.len() > n {
        (0..n)
            .map(|k| {
                let start = k * pieces.len() / n;
                let end = (k + 1) * pieces.len() / n;
                pieces[start..end].join("\n")
            })
            .collect()
    } else {
        pieces
    };

    segments.resize(n, String::new());
    segments
}

fn paragraphs(text: &str) -> Vec<String> {
    let normalised = text.replace("\r\n", "\n");
    RE_BLANK_LINES
        .split(&normalised)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn lines(paragraph: &str) -> Vec<String> {
    paragraph
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn sentences(paragraph: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut last = 0;
    for m in RE_SENTENCE_END.find_iter(paragraph) {
        let s = paragraph[last..m.end()].trim();
        if !s.is_empty() {
            out.push(s.to_string());
        }
        last = m.end();
    }
    let rest = paragraph[last..].trim();
    if !rest.is_empty() {
        out.push(rest.to_string());
    }
    out
}
