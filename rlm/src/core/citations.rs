//! Source citations found in final answers.
//!
//! Answers are asked to cite evidence as `context[a:b]`, `context_lines[a:b]`,
//! `lines a-b` or `line n`. Each reference is bounds-checked against the
//! context and mapped to a file through the context's file index.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::context::Context;

/// What a citation points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationUnit {
    Chars,
    Lines,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// The reference as written in the answer.
    pub raw: String,
    pub unit: CitationUnit,
    /// Half-open range in `unit`s.
    pub start: usize,
    pub end: usize,
    /// First and last line covered, when the range is inside the context.
    pub first_line: Option<usize>,
    pub last_line: Option<usize>,
    /// Source file of `first_line`, when the context carries a file index.
    pub file: Option<String>,
    pub valid: bool,
}

static CHAR_SLICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:context|CONTEXT)\[\s*(\d+)\s*:\s*(\d+)\s*\]").expect("valid regex")
});
static LINE_SLICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:context_lines|CONTEXT_LINES|lines)\[\s*(\d+)\s*:\s*(\d+)\s*\]")
        .expect("valid regex")
});
static LINE_RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[Ll]ines?\s+(\d+)\s*(?:-|–|to)\s*(\d+)\b").expect("valid regex")
});
static SINGLE_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[Ll]ine\s+(\d+)\b").expect("valid regex"));

/// Extract citations from `answer`, in order of first appearance, without duplicates.
pub fn extract_citations(answer: &str, context: &Context) -> Vec<Citation> {
    // (position in answer, citation)
    let mut found: Vec<(usize, Citation)> = Vec::new();
    let mut covered: Vec<std::ops::Range<usize>> = Vec::new();

    let mut scan = |re: &Regex, unit: CitationUnit, inclusive: bool| {
        for caps in re.captures_iter(answer) {
            let Some(whole) = caps.get(0) else { continue };
            if covered.iter().any(|range| range.contains(&whole.start())) {
                continue;
            }
            let Some(start) = caps.get(1).and_then(|m| m.as_str().parse::<usize>().ok()) else {
                continue;
            };
            let end = match caps.get(2) {
                Some(m) => match m.as_str().parse::<usize>() {
                    Ok(end) if inclusive => end.saturating_add(1),
                    Ok(end) => end,
                    Err(_) => continue,
                },
                None => start.saturating_add(1),
            };
            covered.push(whole.range());
            found.push((
                whole.start(),
                resolve(whole.as_str().to_string(), unit, start, end, context),
            ));
        }
    };

    scan(&CHAR_SLICE_RE, CitationUnit::Chars, false);
    scan(&LINE_SLICE_RE, CitationUnit::Lines, false);
    scan(&LINE_RANGE_RE, CitationUnit::Lines, true);
    scan(&SINGLE_LINE_RE, CitationUnit::Lines, true);

    found.sort_by_key(|(pos, _)| *pos);
    let mut citations: Vec<Citation> = Vec::new();
    for (_, citation) in found {
        let duplicate = citations.iter().any(|existing| {
            existing.unit == citation.unit
                && existing.start == citation.start
                && existing.end == citation.end
        });
        if !duplicate {
            citations.push(citation);
        }
    }
    citations
}

fn resolve(raw: String, unit: CitationUnit, start: usize, end: usize, context: &Context) -> Citation {
    let (limit, lines) = match unit {
        CitationUnit::Chars => (
            context.char_len(),
            context
                .line_of_char(start)
                .zip(context.line_of_char(end.saturating_sub(1).max(start))),
        ),
        CitationUnit::Lines => (context.line_count(), Some((start, end.saturating_sub(1)))),
    };
    let valid = start < end && end <= limit;
    let (first_line, last_line) = match lines {
        Some((first, last)) if valid => (Some(first), Some(last.max(first))),
        _ => (None, None),
    };
    let file = first_line
        .and_then(|line| context.file_at_line(line))
        .map(|span| span.path.clone());
    Citation {
        raw,
        unit,
        start,
        end,
        first_line,
        last_line,
        file,
        valid,
    }
}
