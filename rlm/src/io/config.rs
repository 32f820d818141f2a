//! Session configuration stored under `.rlm/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default location of the config file relative to the project root.
pub fn config_path(root: &Path) -> PathBuf {
    root.join(".rlm").join("config.toml")
}

/// Session configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values documented on each field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RlmConfig {
    /// Iterations before a session gives up without an answer.
    pub max_iterations: u32,

    /// Consecutive empty or failed model responses before a session is fatal.
    pub max_consecutive_empty: u32,

    /// Characters of execution output shown to the model per turn.
    pub observation_limit_chars: usize,

    /// Characters kept for each text field of a stored turn.
    pub trace_limit_chars: usize,

    /// Delegation depth available to sandboxed code (0 disables `sub_call`).
    pub max_depth: u32,

    /// Sub-calls allowed per session.
    pub max_sub_calls: u32,

    /// Iteration budget for nested sessions when `max_depth` > 1.
    pub sub_max_iterations: u32,

    /// Optional wall-clock budget for a whole session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_session_secs: Option<u64>,

    pub backend: BackendConfig,
    pub root: ModelProfile,
    pub sub: ModelProfile,
    pub sandbox: SandboxConfig,
}

/// OpenAI-compatible completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    /// Environment variable holding the bearer token.
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

/// Model and sampling settings for one instruction profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelProfile {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Limits for the code sandbox process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Python interpreter to launch.
    pub python: String,
    /// Wall-clock limit per execution, excluding time spent in sub-calls.
    pub timeout_secs: u64,
    /// CPU-time quota per execution.
    pub cpu_secs: u64,
    /// Address-space quota per execution.
    pub memory_mb: u64,
    /// Bytes of printed output kept per execution.
    pub output_limit_bytes: usize,
}

impl Default for RlmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_consecutive_empty: 3,
            observation_limit_chars: 800,
            trace_limit_chars: 4000,
            max_depth: 1,
            max_sub_calls: 50,
            sub_max_iterations: 5,
            max_session_secs: None,
            backend: BackendConfig::default(),
            root: ModelProfile::root_default(),
            sub: ModelProfile::sub_default(),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nano-gpt.com/api/v1".to_string(),
            api_key_env: "NANO_GPT_API_KEY".to_string(),
            timeout_secs: 120,
            max_retries: 3,
            retry_backoff_ms: 1000,
            max_backoff_ms: 30_000,
        }
    }
}

impl ModelProfile {
    pub fn root_default() -> Self {
        Self {
            model: "minimax/minimax-m2.5".to_string(),
            temperature: 0.7,
            max_tokens: 4096,
        }
    }

    pub fn sub_default() -> Self {
        Self {
            temperature: 0.3,
            ..Self::root_default()
        }
    }
}

impl Default for ModelProfile {
    fn default() -> Self {
        Self::root_default()
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            timeout_secs: 60,
            cpu_secs: 60,
            memory_mb: 1024,
            output_limit_bytes: 200_000,
        }
    }
}

impl RlmConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.max_consecutive_empty == 0 {
            return Err(anyhow!("max_consecutive_empty must be > 0"));
        }
        if self.observation_limit_chars == 0 {
            return Err(anyhow!("observation_limit_chars must be > 0"));
        }
        if self.trace_limit_chars == 0 {
            return Err(anyhow!("trace_limit_chars must be > 0"));
        }
        if self.sub_max_iterations == 0 {
            return Err(anyhow!("sub_max_iterations must be > 0"));
        }
        if self.max_session_secs == Some(0) {
            return Err(anyhow!("max_session_secs must be > 0 when set"));
        }
        if self.backend.base_url.trim().is_empty() {
            return Err(anyhow!("backend.base_url must be non-empty"));
        }
        if self.backend.timeout_secs == 0 {
            return Err(anyhow!("backend.timeout_secs must be > 0"));
        }
        self.root.validate("root")?;
        self.sub.validate("sub")?;
        if self.sandbox.python.trim().is_empty() {
            return Err(anyhow!("sandbox.python must be non-empty"));
        }
        if self.sandbox.timeout_secs == 0 {
            return Err(anyhow!("sandbox.timeout_secs must be > 0"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

impl ModelProfile {
    fn validate(&self, label: &str) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(anyhow!("{label}.model must be non-empty"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(anyhow!("{label}.temperature must be within [0, 2]"));
        }
        if self.max_tokens == 0 {
            return Err(anyhow!("{label}.max_tokens must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RlmConfig::default()`.
pub fn load_config(path: &Path) -> Result<RlmConfig> {
    if !path.exists() {
        let cfg = RlmConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RlmConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RlmConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
