//! Response parsing: final-answer markers first, then an ordered list of code extractors.
//!
//! Every extractor is a pure `fn(&str) -> Option<String>`. Only the
//! ```` ```python ```` fence is advertised to the model; the remaining extractors
//! tolerate the other tool-call dialects models fall back to.

use std::sync::LazyLock;

use regex::Regex;

/// Final-answer markers in priority order.
pub const FINAL_ANSWER_MARKERS: &[&str] = &["FINAL_ANSWER:", "FINAL ANSWER:"];

/// Extracted fragments must be longer than this many characters.
pub const MIN_FRAGMENT_CHARS: usize = 10;

/// Classification of one raw model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedResponse {
    FinalAnswer(String),
    Code {
        fragment: String,
        extractor: &'static str,
    },
    None,
}

/// A named code extractor.
#[derive(Clone, Copy)]
pub struct Extractor {
    pub name: &'static str,
    pub extract: fn(&str) -> Option<String>,
}

/// Code extractors in priority order.
pub const EXTRACTORS: &[Extractor] = &[
    Extractor {
        name: "fenced_python",
        extract: fenced_python,
    },
    Extractor {
        name: "fenced_generic",
        extract: fenced_generic,
    },
    Extractor {
        name: "tilde_block",
        extract: tilde_block,
    },
    Extractor {
        name: "function_code_tag",
        extract: function_code_tag,
    },
    Extractor {
        name: "invoke_parameter",
        extract: invoke_parameter,
    },
    Extractor {
        name: "invoke_tag",
        extract: invoke_tag,
    },
    Extractor {
        name: "minimax_tool_call",
        extract: minimax_tool_call,
    },
    Extractor {
        name: "statement_lines",
        extract: statement_lines,
    },
];

/// Parse a model response into a final answer, a code fragment, or nothing.
pub fn parse(response: &str) -> ParsedResponse {
    if let Some(answer) = extract_final_answer(response) {
        return ParsedResponse::FinalAnswer(answer);
    }
    match extract_code(response) {
        Some((extractor, fragment)) => ParsedResponse::Code {
            fragment,
            extractor,
        },
        None => ParsedResponse::None,
    }
}

/// Text after the first occurrence of the highest-priority marker present, trimmed.
///
/// A marker followed only by whitespace does not count as an answer.
pub fn extract_final_answer(response: &str) -> Option<String> {
    FINAL_ANSWER_MARKERS.iter().find_map(|marker| {
        let (_, rest) = response.split_once(marker)?;
        let answer = rest.trim();
        (!answer.is_empty()).then(|| answer.to_string())
    })
}

/// First fragment produced by [`EXTRACTORS`], with the extractor's name.
pub fn extract_code(response: &str) -> Option<(&'static str, String)> {
    EXTRACTORS
        .iter()
        .find_map(|extractor| (extractor.extract)(response).map(|code| (extractor.name, code)))
}

static FENCED_PYTHON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[ \t]*(?:python3?|py|repl)[ \t]*\r?\n(.*?)```").expect("valid regex")
});
static FENCED_GENERIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[\w+-]*[ \t]*\r?\n?(.*?)```").expect("valid regex"));
static TILDE_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)~~~[ \t]*\w*[ \t]*\r?\n(.*?)~~~").expect("valid regex"));
static FUNCTION_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<function_code>(.*?)</function_code>").expect("valid regex")
});
static INVOKE_PARAMETER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<invoke\s+name=["'][^"']*["']\s*>.*?<parameter\s+name=["'](?:code|command|source|input|script)["']\s*>(.*?)</parameter>"#)
        .expect("valid regex")
});
static INVOKE_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<invoke\s+name=["'][^"']*["']\s*>(.*?)</invoke>"#).expect("valid regex")
});
static MINIMAX_TOOL_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<minimax:tool_call>(.*?)</minimax:tool_call>").expect("valid regex")
});
static MARKUP_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[A-Za-z][\w:-]*(?:\s+[^<>]*)?>").expect("valid regex"));

fn first_viable(re: &Regex, response: &str) -> Option<String> {
    re.captures_iter(response).find_map(|caps| {
        let fragment = caps.get(1)?.as_str().trim();
        (fragment.chars().count() > MIN_FRAGMENT_CHARS).then(|| fragment.to_string())
    })
}

pub fn fenced_python(response: &str) -> Option<String> {
    first_viable(&FENCED_PYTHON_RE, response)
}

pub fn fenced_generic(response: &str) -> Option<String> {
    first_viable(&FENCED_GENERIC_RE, response)
}

/// `~~~eval`, `~~~run_python`, `~~~REPL` and any other tag word.
pub fn tilde_block(response: &str) -> Option<String> {
    first_viable(&TILDE_BLOCK_RE, response)
}

pub fn function_code_tag(response: &str) -> Option<String> {
    first_viable(&FUNCTION_CODE_RE, response)
}

/// The code-like `<parameter>` inside an `<invoke>` call.
pub fn invoke_parameter(response: &str) -> Option<String> {
    first_viable(&INVOKE_PARAMETER_RE, response)
}

pub fn invoke_tag(response: &str) -> Option<String> {
    first_viable(&INVOKE_TAG_RE, response).map(|inner| strip_markup(&inner))
}

pub fn minimax_tool_call(response: &str) -> Option<String> {
    first_viable(&MINIMAX_TOOL_CALL_RE, response)
        .map(|inner| strip_markup(&inner))
        .filter(|code| code.chars().count() > MIN_FRAGMENT_CHARS)
}

fn strip_markup(fragment: &str) -> String {
    MARKUP_TAG_RE.replace_all(fragment, "").trim().to_string()
}

const STATEMENT_PREFIXES: &[&str] = &[
    "for ", "while ", "if ", "elif ", "else:", "try:", "except", "with ", "print(", "import ",
    "from ", "def ", "class ", "return ", "#", "context", "CONTEXT",
];

/// Heuristic fallback for unfenced code.
///
/// Collects lines that start with a statement keyword, plus indented lines
/// directly continuing a collected line. Accepted when at least two keyword
/// lines were found and at least one of them is not a comment.
pub fn statement_lines(response: &str) -> Option<String> {
    let mut collected: Vec<&str> = Vec::new();
    let mut keyword_lines = 0usize;
    let mut has_statement = false;
    let mut in_block = false;

    for line in response.lines() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() {
            in_block = false;
            continue;
        }
        let indented = trimmed.len() < line.len();
        if is_statement_line(trimmed) {
            collected.push(line.trim_end());
            keyword_lines += 1;
            if !trimmed.starts_with('#') {
                has_statement = true;
            }
            in_block = true;
        } else if indented && in_block {
            collected.push(line.trim_end());
        } else {
            in_block = false;
        }
    }

    if keyword_lines < 2 || !has_statement {
        return None;
    }
    let code = dedent(&collected);
    (code.chars().count() > MIN_FRAGMENT_CHARS).then_some(code)
}

fn is_statement_line(trimmed: &str) -> bool {
    if trimmed.starts_with("##") {
        return false;
    }
    if trimmed.starts_with("from ") && !trimmed.contains(" import ") {
        return false;
    }
    STATEMENT_PREFIXES
        .iter()
        .any(|prefix| trimmed.starts_with(prefix))
}

/// Remove the indentation shared by every collected line.
///
/// Only ASCII spaces and tabs count as indentation, so the cut always lands on
/// a char boundary.
fn dedent(lines: &[&str]) -> String {
    let common = lines
        .iter()
        .map(|line| line.len() - line.trim_start_matches([' ', '\t']).len())
        .min()
        .unwrap_or(0);
    lines
        .iter()
        .map(|line| &line[common..])
        .collect::<Vec<_>>()
        .join("\n")
}
