//! Case file parsing and validation.
//!
//! Cases are TOML files pairing a question with a context and the checks an
//! answer must pass. See `eval/cases/` for examples.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;

/// A parsed case file containing question, config, and checks.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseFile {
    pub case: CaseMeta,
    #[serde(default)]
    pub config: CaseConfig,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub checks: Vec<Check>,
}

/// Case metadata: identifier, question and context location.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseMeta {
    /// Unique identifier (slug format: `[a-z0-9_-]+`).
    pub id: String,
    /// Question passed to `rlm ask`.
    pub question: String,
    /// File or directory to load, relative to the case file.
    pub context: PathBuf,
}

/// Session configuration overrides for the case.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct CaseConfig {
    /// Iterations before the session gives up.
    pub max_iterations: Option<u32>,
    /// Delegation depth available to sandboxed code.
    pub max_depth: Option<u32>,
    /// Wall-clock limit for the whole `rlm ask` process.
    pub timeout_secs: Option<u64>,
}

/// Verification check applied to the finished session.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Check {
    /// The session ended with a final answer.
    Answered,
    /// The answer contains `text` (case-insensitive).
    AnswerContains { text: String },
    /// The session used at most `turns` turns.
    MaxTurns { turns: u32 },
    /// At least one turn executed code.
    UsedCode,
    /// The answer cites at least one valid line or character range.
    CitesContext,
}

impl CaseFile {
    /// Load and validate a case file from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read case {}", path.display()))?;
        let case: CaseFile =
            toml::from_str(&contents).with_context(|| format!("parse case {}", path.display()))?;
        case.validate()
            .with_context(|| format!("validate case {}", path.display()))?;
        Ok(case)
    }

    #[cfg(test)]
    pub fn parse_str(contents: &str) -> Result<Self> {
        let case: CaseFile = toml::from_str(contents).context("parse case")?;
        case.validate()?;
        Ok(case)
    }

    /// Resolve the context path against the directory holding the case file.
    pub fn context_path(&self, case_path: &Path) -> PathBuf {
        if self.case.context.is_absolute() {
            return self.case.context.clone();
        }
        case_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&self.case.context)
    }

    fn validate(&self) -> Result<()> {
        validate_case_id(&self.case.id)?;
        if self.case.question.trim().is_empty() {
            bail!("case.question must be non-empty");
        }
        if self.case.context.as_os_str().is_empty() {
            bail!("case.context must be non-empty");
        }
        if let Some(max_iterations) = self.config.max_iterations
            && max_iterations == 0
        {
            bail!("config.max_iterations must be > 0");
        }
        if let Some(timeout_secs) = self.config.timeout_secs
            && timeout_secs == 0
        {
            bail!("config.timeout_secs must be > 0");
        }
        if self.checks.is_empty() {
            bail!("checks must be a non-empty array");
        }
        for (index, check) in self.checks.iter().enumerate() {
            check
                .validate()
                .with_context(|| format!("checks[{}] invalid", index))?;
        }
        for (key, value) in &self.env {
            if key.trim().is_empty() {
                bail!("env key must be non-empty");
            }
            if value.is_empty() {
                bail!("env {} must be non-empty", key);
            }
        }
        Ok(())
    }
}

impl Check {
    fn validate(&self) -> Result<()> {
        match self {
            Check::AnswerContains { text } => {
                if text.trim().is_empty() {
                    bail!("answer_contains.text must be non-empty");
                }
            }
            Check::MaxTurns { turns } => {
                if *turns == 0 {
                    bail!("max_turns.turns must be > 0");
                }
            }
            Check::Answered | Check::UsedCode | Check::CitesContext => {}
        }
        Ok(())
    }
}

/// Discover and load all case files from a directory.
///
/// Returns cases sorted by id. Errors if duplicate ids are found.
pub fn discover_cases(dir: &Path) -> Result<Vec<CaseFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut cases = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read cases dir {}", dir.display()))? {
        let entry = entry.context("read case entry")?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }
        cases.push(CaseFile::load(&path)?);
    }
    cases.sort_by(|left, right| left.case.id.cmp(&right.case.id));
    for pair in cases.windows(2) {
        if pair[0].case.id == pair[1].case.id {
            return Err(anyhow!("duplicate case.id {}", pair[0].case.id));
        }
    }
    Ok(cases)
}

fn validate_case_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        bail!("case.id must be non-empty");
    }
    if id.contains('/') || id.contains('\\') {
        bail!("case.id must not contain path separators");
    }
    if id.contains("..") {
        bail!("case.id must not contain '..'");
    }
    if !id
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
    {
        bail!("case.id must use [a-z0-9_-] only");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_valid_case() {
        let input = r#"
[case]
id = "greek-letters"
question = "Which line holds beta?"
context = "fixtures/greek.txt"

[config]
max_iterations = 6
max_depth = 2

[[checks]]
type = "answered"

[[checks]]
type = "answer_contains"
text = "beta"

[[checks]]
type = "max_turns"
turns = 4

[[checks]]
type = "used_code"

[[checks]]
type = "cites_context"
"#;
        let case = CaseFile::parse_str(input).expect("case parses");
        assert_eq!(case.case.id, "greek-letters");
        assert_eq!(case.config.max_depth, Some(2));
        assert_eq!(case.checks.len(), 5);
        assert_eq!(
            case.checks[1],
            Check::AnswerContains {
                text: "beta".to_string()
            }
        );
    }

    #[test]
    fn rejects_invalid_id() {
        let input = r#"
[case]
id = "bad/id"
question = "anything"
context = "notes.txt"

[[checks]]
type = "answered"
"#;
        let err = CaseFile::parse_str(input).expect_err("invalid id");
        assert!(err.to_string().contains("case.id"));
    }

    #[test]
    fn rejects_malformed_checks() {
        let input = r#"
[case]
id = "greek-letters"
question = "anything"
context = "notes.txt"

[[checks]]
type = "max_turns"
turns = 0
"#;
        let _err = CaseFile::parse_str(input).expect_err("invalid check");
    }

    #[test]
    fn rejects_blank_question() {
        let input = r#"
[case]
id = "greek-letters"
question = "  "
context = "notes.txt"

[[checks]]
type = "answered"
"#;
        let err = CaseFile::parse_str(input).expect_err("blank question");
        assert!(err.to_string().contains("case.question"));
    }

    #[test]
    fn context_resolves_relative_to_case_file() {
        let input = r#"
[case]
id = "greek-letters"
question = "anything"
context = "fixtures/greek.txt"

[[checks]]
type = "answered"
"#;
        let case = CaseFile::parse_str(input).expect("case parses");
        let resolved = case.context_path(Path::new("/repo/eval/cases/greek-letters.toml"));
        assert_eq!(
            resolved,
            PathBuf::from("/repo/eval/cases/fixtures/greek.txt")
        );
    }

    #[test]
    fn discover_sorts_by_id_and_skips_other_files() {
        let temp = tempdir().expect("tempdir");
        let body = |id: &str| {
            format!(
                "[case]\nid = \"{id}\"\nquestion = \"q\"\ncontext = \"c.txt\"\n\n[[checks]]\ntype = \"answered\"\n"
            )
        };
        fs::write(temp.path().join("b.toml"), body("beta")).expect("write b");
        fs::write(temp.path().join("a.toml"), body("alpha")).expect("write a");
        fs::write(temp.path().join("notes.md"), "not a case").expect("write notes");

        let cases = discover_cases(temp.path()).expect("discover");
        let ids: Vec<_> = cases.iter().map(|case| case.case.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "beta"]);
    }
}
