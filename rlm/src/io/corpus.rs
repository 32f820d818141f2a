//! Load a context from a file or a directory tree.

use std::fs;
use std::path::Path;

use anyhow::{Context as _, Result, bail};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::core::context::Context;

const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    "venv",
    ".venv",
    "build",
    "dist",
    "target",
];

const TEXT_EXTENSIONS: &[&str] = &[
    "py", "rs", "js", "jsx", "ts", "tsx", "go", "java", "kt", "c", "h", "cc", "cpp", "hpp", "cs",
    "rb", "php", "swift", "scala", "sh", "bash", "sql", "html", "css", "scss", "md", "rst", "txt",
    "json", "toml", "yaml", "yml", "ini", "cfg", "xml", "csv", "log",
];

/// Limits for directory loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorpusOptions {
    /// Files larger than this are skipped.
    pub max_file_bytes: u64,
    /// Loading stops once this many bytes have been read.
    pub max_total_bytes: u64,
}

impl Default for CorpusOptions {
    fn default() -> Self {
        Self {
            max_file_bytes: 10 * 1024 * 1024,
            max_total_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Read `path` as a context.
///
/// A file becomes the context verbatim. A directory is walked in sorted
/// order and its text files are concatenated under `=== File: <path> ===`
/// headers, which the resulting [`Context`] indexes.
pub fn load_context(path: &Path, options: &CorpusOptions) -> Result<Context> {
    let meta = fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    if meta.is_file() {
        let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
        return Ok(Context::new(String::from_utf8_lossy(&bytes).into_owned()));
    }
    if !meta.is_dir() {
        bail!("{} is neither a file nor a directory", path.display());
    }

    let mut files = Vec::new();
    let mut total = 0u64;
    let walker = WalkDir::new(path)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_skipped_dir(entry));
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", path.display()))?;
        if !entry.file_type().is_file() || !has_text_extension(entry.path()) {
            continue;
        }
        let size = entry
            .metadata()
            .with_context(|| format!("stat {}", entry.path().display()))?
            .len();
        if size > options.max_file_bytes {
            debug!(path = %entry.path().display(), size, "skipping large file");
            continue;
        }
        if total + size > options.max_total_bytes {
            warn!(
                max_total_bytes = options.max_total_bytes,
                "corpus byte budget reached, remaining files skipped"
            );
            break;
        }
        let bytes = fs::read(entry.path())
            .with_context(|| format!("read {}", entry.path().display()))?;
        total += size;
        let relative = entry
            .path()
            .strip_prefix(path)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        files.push((relative, String::from_utf8_lossy(&bytes).into_owned()));
    }

    if files.is_empty() {
        bail!("no text files found under {}", path.display());
    }
    info!(files = files.len(), bytes = total, "loaded corpus");
    Ok(Context::from_files(files))
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIP_DIRS.contains(&name))
}

fn has_text_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}
