//! Helpers for running an interactive child process with a timeout and bounded output.
//!
//! The child's stdout is read line by line on a reader thread and handed to a
//! caller-supplied handler on the calling thread, which may answer on the
//! child's stdin. Time spent inside the handler does not count toward the
//! timeout, so a child blocked on a slow reply is not killed for it.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// What to do with one stdout line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineAction {
    /// Keep the line as ordinary output.
    Keep,
    /// The handler consumed the line.
    Consumed,
    /// The handler consumed the line and this reply goes to the child's stdin.
    Reply(String),
}

/// Captured output of an interactive child process.
#[derive(Debug)]
pub struct InteractiveOutput {
    pub status: ExitStatus,
    /// Lines the handler kept, in order.
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    /// Time spent inside the line handler.
    pub handler_time: Duration,
}

impl InteractiveOutput {
    pub fn stderr_truncated_notice(&self, label: &str) -> String {
        if self.stderr_truncated > 0 {
            format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            )
        } else {
            String::new()
        }
    }
}

/// Run `cmd`, write `stdin_prelude` to its stdin, and feed each stdout line to `on_line`.
///
/// Stdin stays open so the handler can reply. `output_limit_bytes` bounds the
/// kept stdout and the stderr stored in memory (bytes beyond it are drained
/// and counted). On timeout the child is killed.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_interactive_with_timeout<F>(
    mut cmd: Command,
    stdin_prelude: &[u8],
    timeout: Duration,
    output_limit_bytes: usize,
    mut on_line: F,
) -> Result<InteractiveOutput>
where
    F: FnMut(&str) -> Result<LineAction>,
{
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("stdin was not piped"))?;

    let (line_tx, line_rx) = mpsc::channel::<std::io::Result<String>>();
    let stdout_handle = thread::spawn(move || {
        let mut reader = BufReader::new(stdout);
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if line_tx.send(Ok(line)).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = line_tx.send(Err(err));
                    break;
                }
            }
        }
    });
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    if let Err(err) = stdin
        .write_all(stdin_prelude)
        .and_then(|()| stdin.flush())
    {
        // The child may have exited before reading; its status tells the story.
        warn!(err = %err, "failed to write child stdin");
    }

    let mut kept = Vec::new();
    let mut stdout_truncated = 0usize;
    let mut handler_time = Duration::ZERO;
    let mut deadline = Instant::now() + timeout;
    let mut timed_out = false;
    let mut handler_error = None;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            timed_out = true;
            break;
        }
        let line = match line_rx.recv_timeout(remaining) {
            Ok(Ok(line)) => line,
            Ok(Err(err)) => {
                warn!(err = %err, "failed to read child stdout");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                timed_out = true;
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let started = Instant::now();
        let action = on_line(line.trim_end_matches(['\n', '\r']));
        let spent = started.elapsed();
        handler_time += spent;
        deadline += spent;

        match action {
            Ok(LineAction::Keep) => {
                keep_limited(&mut kept, &mut stdout_truncated, line.as_bytes(), output_limit_bytes);
            }
            Ok(LineAction::Consumed) => {}
            Ok(LineAction::Reply(reply)) => write_reply(&mut stdin, &reply),
            Err(err) => {
                handler_error = Some(err);
                break;
            }
        }
    }

    drop(stdin);
    let status = if timed_out || handler_error.is_some() {
        if timed_out {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
        }
        kill_and_wait(&mut child)?
    } else {
        match child
            .wait_timeout(Duration::from_secs(5))
            .context("wait for command")?
        {
            Some(status) => status,
            None => {
                warn!("command did not exit after closing stdout, killing");
                kill_and_wait(&mut child)?
            }
        }
    };

    if stdout_handle.join().is_err() {
        return Err(anyhow!("output reader thread panicked"));
    }
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if let Some(err) = handler_error {
        return Err(err.context("handle child output"));
    }
    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(InteractiveOutput {
        status,
        stdout: kept,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        handler_time,
    })
}

fn write_reply(stdin: &mut ChildStdin, reply: &str) {
    let result = stdin
        .write_all(reply.as_bytes())
        .and_then(|()| {
            if reply.ends_with('\n') {
                Ok(())
            } else {
                stdin.write_all(b"\n")
            }
        })
        .and_then(|()| stdin.flush());
    if let Err(err) = result {
        warn!(err = %err, "failed to write reply to child stdin");
    }
}

fn kill_and_wait(child: &mut Child) -> Result<ExitStatus> {
    if let Err(err) = child.kill() {
        // Already exited.
        debug!(err = %err, "kill failed");
    }
    child.wait().context("wait command after kill")
}

fn keep_limited(buf: &mut Vec<u8>, truncated: &mut usize, chunk: &[u8], limit: usize) {
    let remaining = limit.saturating_sub(buf.len());
    let keep = chunk.len().min(remaining);
    buf.extend_from_slice(&chunk[..keep]);
    *truncated += chunk.len() - keep;
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        keep_limited(&mut buf, &mut truncated, &chunk[..n], limit);
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn keeps_lines_and_answers_requests() {
        let script = r#"read first; echo "got $first"; echo "ASK ping"; read reply; echo "reply $reply""#;
        let output = run_interactive_with_timeout(
            sh(script),
            b"hello\n",
            Duration::from_secs(5),
            1024,
            |line| {
                Ok(match line.strip_prefix("ASK ") {
                    Some(question) => LineAction::Reply(format!("{question}-pong")),
                    None => LineAction::Keep,
                })
            },
        )
        .expect("run");

        assert!(output.status.success());
        assert!(!output.timed_out);
        assert_eq!(
            String::from_utf8_lossy(&output.stdout),
            "got hello\nreply ping-pong\n"
        );
    }

    #[test]
    fn kills_child_on_timeout() {
        let output = run_interactive_with_timeout(
            sh("echo start; exec sleep 5"),
            b"",
            Duration::from_millis(300),
            1024,
            |_| Ok(LineAction::Keep),
        )
        .expect("run");

        assert!(output.timed_out);
        assert_eq!(String::from_utf8_lossy(&output.stdout), "start\n");
    }

    #[test]
    fn handler_time_does_not_count_toward_timeout() {
        let output = run_interactive_with_timeout(
            sh("echo ASK; read reply; echo done"),
            b"",
            Duration::from_millis(500),
            1024,
            |line| {
                if line == "ASK" {
                    thread::sleep(Duration::from_millis(800));
                    Ok(LineAction::Reply("ok".to_string()))
                } else {
                    Ok(LineAction::Keep)
                }
            },
        )
        .expect("run");

        assert!(!output.timed_out);
        assert!(output.handler_time >= Duration::from_millis(800));
        assert_eq!(String::from_utf8_lossy(&output.stdout), "done\n");
    }

    #[test]
    fn bounds_kept_output_and_stderr() {
        let output = run_interactive_with_timeout(
            sh("printf 'abcdef\\n'; printf 'xyz123' >&2"),
            b"",
            Duration::from_secs(5),
            4,
            |_| Ok(LineAction::Keep),
        )
        .expect("run");

        assert_eq!(output.stdout, b"abcd");
        assert_eq!(output.stdout_truncated, 3);
        assert_eq!(output.stderr, b"xyz1");
        assert_eq!(output.stderr_truncated, 2);
        assert!(output.stderr_truncated_notice("sandbox").contains("2 bytes"));
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let err = run_interactive_with_timeout(
            Command::new("/definitely/not/a/binary"),
            b"",
            Duration::from_secs(1),
            16,
            |_| Ok(LineAction::Keep),
        )
        .expect_err("spawn should fail");
        assert!(format!("{err:#}").contains("spawn command"));
    }
}
