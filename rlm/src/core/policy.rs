//! Textual denylist applied to generated code before it reaches the interpreter.
//!
//! This is a first filter only. The sandbox process enforces the actual
//! capability surface (restricted builtins, import allowlist, quotas).

use std::sync::LazyLock;

use regex::Regex;

/// A named denylist pattern.
struct Rule {
    name: &'static str,
    pattern: &'static str,
}

const RULES: &[Rule] = &[
    Rule {
        name: "os-module",
        pattern: r"\b(?:import\s+os\b|from\s+os\b|os\.\w)",
    },
    Rule {
        name: "sys-module",
        pattern: r"\b(?:import\s+sys\b|from\s+sys\b|sys\.\w)",
    },
    Rule {
        name: "subprocess",
        pattern: r"\bsubprocess\b",
    },
    Rule {
        name: "dynamic-eval",
        pattern: r"\b(?:eval|exec|compile)\s*\(",
    },
    Rule {
        name: "dynamic-import",
        pattern: r"__import__|\bimportlib\b",
    },
    Rule {
        name: "file-access",
        pattern: r"\b(?:open|file)\s*\(",
    },
    Rule {
        name: "reflection",
        pattern: r"__(?:builtins|subclasses|globals|code|class|bases|mro|dict|getattribute|loader|spec)__",
    },
    Rule {
        name: "reflection-call",
        pattern: r"\b(?:getattr|setattr|delattr|globals|locals|vars|breakpoint)\s*\(",
    },
    Rule {
        name: "restricted-module",
        pattern: r"\b(?:import|from)\s+(?:shutil|socket|ctypes|signal|multiprocessing|threading|pty|pickle|marshal|pathlib|io|builtins|urllib|http|requests)\b",
    },
];

static COMPILED: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    RULES
        .iter()
        .map(|rule| (rule.name, Regex::new(rule.pattern).expect("valid regex")))
        .collect()
});

/// A denylist match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyViolation {
    pub rule: &'static str,
    pub matched: String,
}

impl PolicyViolation {
    /// The observation returned to the model in place of execution output.
    pub fn to_observation(&self) -> String {
        format!(
            "ERROR: PolicyViolation: code uses a denied operation (rule `{}`, matched `{}`). \
             Only the provided context helpers and pure modules are available.",
            self.rule, self.matched
        )
    }
}

/// Return the first denylist rule that matches `code`.
pub fn check(code: &str) -> Option<PolicyViolation> {
    COMPILED.iter().find_map(|(name, re)| {
        re.find(code).map(|found| PolicyViolation {
            rule: name,
            matched: found.as_str().to_string(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denies_shell_access_through_os() {
        let violation = check("import os; os.system('ls')").expect("violation");
        assert_eq!(violation.rule, "os-module");
        assert!(violation.to_observation().starts_with("ERROR: PolicyViolation:"));
    }

    #[test]
    fn denies_file_io_and_dynamic_code() {
        assert_eq!(
            check("data = open('/etc/passwd').read()").map(|v| v.rule),
            Some("file-access")
        );
        assert_eq!(check("exec('1+1')").map(|v| v.rule), Some("dynamic-eval"));
        assert_eq!(
            check("().__class__.__bases__[0].__subclasses__()").map(|v| v.rule),
            Some("reflection")
        );
        assert_eq!(
            check("m = __import__('os')").map(|v| v.rule),
            Some("dynamic-import")
        );
        assert_eq!(
            check("import subprocess").map(|v| v.rule),
            Some("subprocess")
        );
        assert_eq!(
            check("from socket import socket").map(|v| v.rule),
            Some("restricted-module")
        );
    }

    #[test]
    fn allows_ordinary_context_analysis() {
        let code = "import re\nhits = [i for i, l in enumerate(context_lines) if re.search(r'socket|signal', l)]\nprint(len(hits), positions)\nprint(context.count('evaluate('))";
        assert_eq!(check(code), None);
    }

    #[test]
    fn word_boundaries_avoid_substring_hits() {
        assert_eq!(check("reopen_count = 3\nprint(reopen_count)"), None);
        assert_eq!(check("kudos.append(1)"), None);
    }
}
