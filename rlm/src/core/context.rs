//! The immutable text blob a session answers questions about.
//!
//! A [`Context`] is bound once per session and shared read-only by every
//! sandbox execution. Lines are split on `\n` exactly like the sandbox view
//! (`context.split("\n")`), so line numbers agree on both sides.

use serde::{Deserialize, Serialize};

const FILE_HEADER_PREFIX: &str = "=== File: ";
const FILE_HEADER_SUFFIX: &str = " ===";

/// Line span of one concatenated source file, `[start_line, end_line)`.
///
/// The span starts at the `=== File: <path> ===` header line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSpan {
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// Size summary used in prompts and persisted metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextStats {
    pub chars: usize,
    pub bytes: usize,
    pub lines: usize,
    pub files: usize,
}

#[derive(Debug, Clone)]
pub struct Context {
    text: String,
    char_len: usize,
    /// Byte offset where each line starts. Always non-empty.
    line_starts: Vec<usize>,
    files: Vec<FileSpan>,
}

impl Context {
    /// Bind a context string, indexing any `=== File: <path> ===` headers it contains.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let mut line_starts = vec![0];
        line_starts.extend(
            text.bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(idx, _)| idx + 1),
        );
        let char_len = text.chars().count();
        let mut context = Self {
            text,
            char_len,
            line_starts,
            files: Vec::new(),
        };
        context.files = context.index_file_headers();
        context
    }

    /// Concatenate files as `=== File: <path> ===` blocks separated by a blank line.
    pub fn from_files<I>(files: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let blocks: Vec<String> = files
            .into_iter()
            .map(|(path, content)| {
                let body = content.strip_suffix('\n').unwrap_or(&content);
                format!("{FILE_HEADER_PREFIX}{path}{FILE_HEADER_SUFFIX}\n{body}\n")
            })
            .collect();
        Self::new(blocks.join("\n"))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn char_len(&self) -> usize {
        self.char_len
    }

    pub fn byte_len(&self) -> usize {
        self.text.len()
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    pub fn stats(&self) -> ContextStats {
        ContextStats {
            chars: self.char_len,
            bytes: self.text.len(),
            lines: self.line_count(),
            files: self.files.len(),
        }
    }

    /// Line `index` (0-based) without its trailing newline.
    pub fn line(&self, index: usize) -> Option<&str> {
        let start = *self.line_starts.get(index)?;
        let end = self
            .line_starts
            .get(index + 1)
            .map(|next| next - 1)
            .unwrap_or(self.text.len());
        Some(&self.text[start..end])
    }

    /// Lines `[start, end)`, clamped to the available range.
    pub fn lines(&self, start: usize, end: usize) -> Vec<&str> {
        let end = end.min(self.line_count());
        (start..end).filter_map(|idx| self.line(idx)).collect()
    }

    pub fn files(&self) -> &[FileSpan] {
        &self.files
    }

    /// The file whose span contains `line`, if the context carries a file index.
    pub fn file_at_line(&self, line: usize) -> Option<&FileSpan> {
        let idx = self.files.partition_point(|span| span.start_line <= line);
        let span = self.files.get(idx.checked_sub(1)?)?;
        (line < span.end_line).then_some(span)
    }

    /// Line containing the character at `char_index` (a position equal to the
    /// length maps to the last line).
    pub fn line_of_char(&self, char_index: usize) -> Option<usize> {
        let byte = if char_index == self.char_len {
            self.text.len()
        } else {
            self.text.char_indices().nth(char_index)?.0
        };
        Some(self.line_starts.partition_point(|start| *start <= byte) - 1)
    }

    fn index_file_headers(&self) -> Vec<FileSpan> {
        let mut spans: Vec<FileSpan> = Vec::new();
        for idx in 0..self.line_count() {
            let Some(path) = self.line(idx).and_then(parse_file_header) else {
                continue;
            };
            if let Some(prev) = spans.last_mut() {
                prev.end_line = idx;
            }
            spans.push(FileSpan {
                path: path.to_string(),
                start_line: idx,
                end_line: self.line_count(),
            });
        }
        spans
    }
}

fn parse_file_header(line: &str) -> Option<&str> {
    let path = line
        .strip_prefix(FILE_HEADER_PREFIX)?
        .strip_suffix(FILE_HEADER_SUFFIX)?
        .trim();
    (!path.is_empty()).then_some(path)
}
