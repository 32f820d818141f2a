//! Sandboxed execution of generated code against the session context.
//!
//! Every execution runs in a fresh Python process: new namespace, restricted
//! builtins, an import allowlist, CPU and address-space quotas, a cleared
//! environment, and a throwaway working directory. Code that matches the
//! textual denylist never reaches the interpreter.
//!
//! The host and the child talk over stdin/stdout with one JSON object per
//! line. The host sends the job first; the child answers with
//! `\x1eRLM {"kind":"sub_call",...}` frames (the host replies with
//! `{"text": ...}`) and ends with one `\x1eRLM {"kind":"result",...}` frame.

use std::path::Path;
use std::process::{Command, ExitStatus};
use std::time::Duration;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::context::Context;
use crate::core::policy;
use crate::io::config::SandboxConfig;
use crate::io::process::{LineAction, run_interactive_with_timeout};

/// Returned when code ran cleanly but produced nothing.
pub const NO_OUTPUT_PLACEHOLDER: &str = "Code executed successfully (no output)";

const PRELUDE: &str = include_str!("sandbox_prelude.py");
const FRAME_PREFIX: &str = "\u{1e}RLM ";

/// Capability handed to sandboxed code as `sub_call(prompt, chunk)`.
pub trait SubCall {
    /// Answer `prompt` about `chunk`. Failures come back as `ERROR: ...` text.
    fn call(&self, prompt: &str, chunk: &str) -> String;
}

/// Sub-call capability for executions where delegation is unavailable.
pub struct NoSubCall;

impl SubCall for NoSubCall {
    fn call(&self, _prompt: &str, _chunk: &str) -> String {
        "ERROR: DepthExceeded: sub_call is not available in this execution".to_string()
    }
}

/// Abstraction over code execution backends.
pub trait Sandbox {
    /// Execute `code` with `context` bound, returning the observation text.
    ///
    /// Never fails: errors are reported as `ERROR: <kind>: <message>` strings.
    fn execute(&self, code: &str, context: &Context, sub_call: &dyn SubCall) -> String;
}

impl<S: Sandbox + ?Sized> Sandbox for &S {
    fn execute(&self, code: &str, context: &Context, sub_call: &dyn SubCall) -> String {
        (**self).execute(code, context, sub_call)
    }
}

#[derive(Serialize)]
struct Job<'a> {
    code: &'a str,
    context: &'a str,
    limits: JobLimits,
}

#[derive(Serialize)]
struct JobLimits {
    cpu_secs: u64,
    memory_bytes: u64,
    output_chars: usize,
}

#[derive(Serialize)]
struct SubCallReply<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Frame {
    SubCall {
        prompt: String,
        #[serde(default)]
        chunk: String,
    },
    Result(ExecReport),
}

/// Structured result reported by the child.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExecReport {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stdout_dropped: usize,
    #[serde(default)]
    pub captured: Option<String>,
    #[serde(default)]
    pub error: Option<ExecError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExecError {
    pub kind: String,
    pub message: String,
}

/// Everything observed about one child process run.
#[derive(Debug)]
pub struct RawRun {
    pub report: Option<ExecReport>,
    pub stderr: String,
    pub timed_out: bool,
    pub status: ExitStatus,
}

/// Sandbox backed by a restricted Python child process.
pub struct PythonSandbox {
    config: SandboxConfig,
}

impl PythonSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    fn command(&self, workdir: &Path) -> Command {
        let mut cmd = Command::new(&self.config.python);
        cmd.args(["-I", "-S", "-B", "-c", PRELUDE])
            .current_dir(workdir)
            .env_clear();
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        cmd
    }

    /// Run `code` in a child process without the denylist pre-filter.
    #[instrument(skip_all, fields(code_len = code.len(), context_chars = context.char_len()))]
    pub fn run(&self, code: &str, context: &Context, sub_call: &dyn SubCall) -> Result<RawRun> {
        let workdir = tempfile::Builder::new()
            .prefix("rlm-sandbox-")
            .tempdir()
            .context("create sandbox working directory")?;

        let job = Job {
            code,
            context: context.text(),
            limits: JobLimits {
                cpu_secs: self.config.cpu_secs,
                memory_bytes: self.config.memory_mb.saturating_mul(1024 * 1024),
                output_chars: self.config.output_limit_bytes,
            },
        };
        let mut payload = serde_json::to_vec(&job).context("serialize sandbox job")?;
        payload.push(b'\n');

        let mut report = None;
        let mut sub_calls = 0u32;
        let output = run_interactive_with_timeout(
            self.command(workdir.path()),
            &payload,
            Duration::from_secs(self.config.timeout_secs),
            self.config.output_limit_bytes,
            |line| {
                let Some(frame) = line.strip_prefix(FRAME_PREFIX) else {
                    return Ok(LineAction::Keep);
                };
                match serde_json::from_str::<Frame>(frame).context("parse sandbox frame")? {
                    Frame::SubCall { prompt, chunk } => {
                        sub_calls += 1;
                        debug!(sub_calls, chunk_chars = chunk.chars().count(), "sandbox sub-call");
                        let text = sub_call.call(&prompt, &chunk);
                        let reply = serde_json::to_string(&SubCallReply { text: &text })
                            .context("serialize sub-call reply")?;
                        Ok(LineAction::Reply(reply))
                    }
                    Frame::Result(result) => {
                        report = Some(result);
                        Ok(LineAction::Consumed)
                    }
                }
            },
        )
        .with_context(|| format!("run {}", self.config.python))?;

        let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        stderr.push_str(&output.stderr_truncated_notice("sandbox"));
        if !output.stdout.is_empty() {
            // Anything the prelude did not frame is interpreter noise.
            stderr.push_str(&String::from_utf8_lossy(&output.stdout));
        }

        Ok(RawRun {
            report,
            stderr,
            timed_out: output.timed_out,
            status: output.status,
        })
    }
}

impl Sandbox for PythonSandbox {
    fn execute(&self, code: &str, context: &Context, sub_call: &dyn SubCall) -> String {
        if let Some(violation) = policy::check(code) {
            warn!(rule = violation.rule, "code rejected by denylist");
            return violation.to_observation();
        }
        match self.run(code, context, sub_call) {
            Ok(raw) => render_observation(&raw, self.config.timeout_secs),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "sandbox run failed");
                format!("ERROR: SandboxError: {err:#}")
            }
        }
    }
}

/// Turn a raw run into the observation text.
///
/// Precedence: captured variable, then stdout, then the no-output placeholder.
/// Errors are reported as `ERROR: <kind>: <message>` followed by any output
/// printed before the failure.
pub fn render_observation(raw: &RawRun, timeout_secs: u64) -> String {
    if raw.timed_out {
        return format!("ERROR: TimeoutError: execution exceeded the {timeout_secs}s time limit");
    }
    let Some(report) = &raw.report else {
        return missing_report(raw);
    };

    let stdout = report.stdout.trim_end_matches('\n');
    let mut out = match &report.error {
        Some(error) => {
            let mut text = format!("ERROR: {}: {}", error.kind, error.message);
            if !stdout.trim().is_empty() {
                text.push_str("\n--- output before error ---\n");
                text.push_str(stdout);
            }
            text
        }
        None => match &report.captured {
            Some(value) => value.clone(),
            None if !stdout.is_empty() => stdout.to_string(),
            None => NO_OUTPUT_PLACEHOLDER.to_string(),
        },
    };
    if report.stdout_dropped > 0 {
        out.push_str(&format!(
            "\n[output truncated {} chars]",
            report.stdout_dropped
        ));
    }
    let stderr = raw.stderr.trim();
    if !stderr.is_empty() {
        out.push_str("\n[stderr]\n");
        out.push_str(stderr);
    }
    out
}

fn missing_report(raw: &RawRun) -> String {
    let stderr = raw.stderr.trim();
    let detail = if stderr.is_empty() {
        String::new()
    } else {
        format!("\n[stderr]\n{stderr}")
    };
    if let Some(signal) = termination_signal(&raw.status) {
        return format!(
            "ERROR: ResourceLimit: sandbox process was terminated by signal {signal} (CPU or memory quota exceeded){detail}"
        );
    }
    format!(
        "ERROR: SandboxError: sandbox exited with status {:?} without a result{detail}",
        raw.status.code()
    )
}

#[cfg(unix)]
fn termination_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn termination_signal(_status: &ExitStatus) -> Option<i32> {
    None
}
