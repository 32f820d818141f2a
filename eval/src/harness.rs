use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::warn;
use wait_timeout::ChildExt;

/// Default wall-clock limit for one `rlm ask` process.
pub const DEFAULT_ASK_TIMEOUT: Duration = Duration::from_secs(900);

/// What the `rlm ask` process did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AskStatus {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

pub fn build_rlm_binary(repo_root: &Path) -> Result<PathBuf> {
    let output = Command::new("cargo")
        .arg("build")
        .arg("-p")
        .arg("rlm")
        .current_dir(repo_root)
        .output()
        .context("build rlm binary")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("rlm build failed: {}", stderr.trim());
    }
    Ok(rlm_binary_path(repo_root))
}

pub fn rlm_binary_path(repo_root: &Path) -> PathBuf {
    let binary = format!("rlm{}", std::env::consts::EXE_SUFFIX);
    repo_root.join("target").join("debug").join(binary)
}

/// Run `rlm ask` inside the workspace, logging stdout and stderr to `logs_dir`.
pub fn run_rlm_ask(
    rlm_path: &Path,
    workspace_root: &Path,
    context_path: &Path,
    question: &str,
    logs_dir: &Path,
    env_overrides: &BTreeMap<String, String>,
    timeout: Duration,
) -> Result<AskStatus> {
    fs::create_dir_all(logs_dir)
        .with_context(|| format!("create logs dir {}", logs_dir.display()))?;

    let context_arg = context_path.display().to_string();
    run_and_capture(
        rlm_path,
        workspace_root,
        &["ask", "--context", &context_arg, "--question", question],
        env_overrides,
        logs_dir,
        timeout,
    )
}

fn run_and_capture(
    rlm_path: &Path,
    workspace_root: &Path,
    args: &[&str],
    env_overrides: &BTreeMap<String, String>,
    logs_dir: &Path,
    timeout: Duration,
) -> Result<AskStatus> {
    let stdout_path = logs_dir.join("rlm.ask.stdout.log");
    let stderr_path = logs_dir.join("rlm.ask.stderr.log");
    let stdout = File::create(&stdout_path)
        .with_context(|| format!("create log {}", stdout_path.display()))?;
    let stderr = File::create(&stderr_path)
        .with_context(|| format!("create log {}", stderr_path.display()))?;

    let mut command = Command::new(rlm_path);
    command
        .args(args)
        .current_dir(workspace_root)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));
    for (key, value) in env_overrides {
        command.env(key, value);
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("run rlm {:?}", args))?;

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout)? {
        Some(status) => status,
        None => {
            timed_out = true;
            warn!(timeout_secs = timeout.as_secs(), "rlm ask timed out");
            child.kill().ok();
            child.wait().context("wait after kill")?
        }
    };

    Ok(AskStatus {
        exit_code: status.code(),
        timed_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rlm_binary_path_is_deterministic() {
        let root = Path::new("/repo/root");
        let path = rlm_binary_path(root);
        let expected = format!("/repo/root/target/debug/rlm{}", std::env::consts::EXE_SUFFIX);
        assert_eq!(path, PathBuf::from(expected));
    }

    #[cfg(unix)]
    #[test]
    fn captures_output_and_exit_code() {
        let temp = tempdir().expect("tempdir");
        let logs = temp.path().join("logs");
        fs::create_dir_all(&logs).expect("logs");
        let script = temp.path().join("fake-rlm.sh");
        fs::write(&script, "#!/bin/sh\necho \"$@\"\necho progress >&2\nexit 2\n").expect("script");

        let status = run_and_capture(
            Path::new("sh"),
            temp.path(),
            &[script.to_str().expect("utf8 path"), "ask", "--question", "q"],
            &BTreeMap::new(),
            &logs,
            Duration::from_secs(10),
        )
        .expect("run");

        assert_eq!(
            status,
            AskStatus {
                exit_code: Some(2),
                timed_out: false
            }
        );
        let stdout = fs::read_to_string(logs.join("rlm.ask.stdout.log")).expect("stdout");
        assert_eq!(stdout, "ask --question q\n");
        let stderr = fs::read_to_string(logs.join("rlm.ask.stderr.log")).expect("stderr");
        assert_eq!(stderr, "progress\n");
    }

    #[cfg(unix)]
    #[test]
    fn kills_processes_that_exceed_the_timeout() {
        let temp = tempdir().expect("tempdir");
        let status = run_and_capture(
            Path::new("sh"),
            temp.path(),
            &["-c", "exec sleep 10"],
            &BTreeMap::new(),
            temp.path(),
            Duration::from_millis(200),
        )
        .expect("run");
        assert!(status.timed_out);
        assert_eq!(status.exit_code, None);
    }
}
