//! Sandbox tests against a real Python interpreter.
//!
//! Each test skips itself when `python3` is not on PATH.

use std::process::Command;

use rlm::core::context::Context;
use rlm::io::config::{RlmConfig, SandboxConfig};
use rlm::io::sandbox::{NO_OUTPUT_PLACEHOLDER, NoSubCall, PythonSandbox, Sandbox};
use rlm::session::{SessionRequest, run_session};
use rlm::test_support::{RecordingSubCall, ScriptedBackend};

fn python_available() -> bool {
    let available = Command::new("python3")
        .arg("--version")
        .output()
        .is_ok_and(|output| output.status.success());
    if !available {
        eprintln!("python3 not found, skipping");
    }
    available
}

fn sandbox() -> PythonSandbox {
    PythonSandbox::new(SandboxConfig::default())
}

fn context() -> Context {
    Context::new("alpha\nbeta\ngamma")
}

#[test]
fn prints_are_the_observation() {
    if !python_available() {
        return;
    }
    let out = sandbox().execute("print(context_lines[1])", &context(), &NoSubCall);
    assert_eq!(out, "beta");
}

#[test]
fn helpers_and_preimported_modules_are_bound() {
    if !python_available() {
        return;
    }
    let code = "print(len(CONTEXT), get_line(2), get_lines(0, 2).replace('\\n', ','))\n\
                print(len(re.findall('a', context)), math.sqrt(16), json.dumps([1]))";
    let out = sandbox().execute(code, &context(), &NoSubCall);
    assert_eq!(out, "16 gamma alpha,beta\n5 4.0 [1]");
}

#[test]
fn capture_takes_precedence_over_stdout() {
    if !python_available() {
        return;
    }
    let code = "print('noise')\ncount = sum(1 for l in context_lines if 'a' in l)\ncapture('count')";
    let out = sandbox().execute(code, &context(), &NoSubCall);
    assert_eq!(out, "3");
}

#[test]
fn silent_code_gets_the_placeholder() {
    if !python_available() {
        return;
    }
    let out = sandbox().execute("x = len(context)", &context(), &NoSubCall);
    assert_eq!(out, NO_OUTPUT_PLACEHOLDER);
}

#[test]
fn exceptions_become_error_results_with_partial_output() {
    if !python_available() {
        return;
    }
    let out = sandbox().execute("print('before')\n1 / 0", &context(), &NoSubCall);
    assert_eq!(
        out,
        "ERROR: ZeroDivisionError: division by zero\n--- output before error ---\nbefore"
    );
}

#[test]
fn denylisted_code_is_never_executed() {
    if !python_available() {
        return;
    }
    let temp = tempfile::tempdir().expect("tempdir");
    let marker = temp.path().join("marker.txt");
    let code = format!("open({:?}, 'w').write('x')", marker.display().to_string());
    let out = sandbox().execute(&code, &context(), &NoSubCall);
    assert!(out.starts_with("ERROR: PolicyViolation:"), "{out}");
    assert!(!marker.exists());
}

#[test]
fn imports_are_limited_to_pure_modules() {
    if !python_available() {
        return;
    }
    let ok = sandbox().execute(
        "import collections\nprint(collections.Counter(context)['a'])",
        &context(),
        &NoSubCall,
    );
    assert_eq!(ok, "5");

    let denied = sandbox().execute("import csv\nprint(csv)", &context(), &NoSubCall);
    assert!(denied.starts_with("ERROR: ImportError:"), "{denied}");
}

#[test]
fn process_control_through_loaded_modules_is_sealed() {
    if !python_available() {
        return;
    }
    let temp = tempfile::tempdir().expect("tempdir");
    let marker = temp.path().join("shell.txt");
    // Reaches the real `sys` through `re` without tripping the denylist.
    let code = format!(
        "s = re.enum.sys\no = s.modules['o' + 's']\no.system('touch {}')\nprint('ran')",
        marker.display()
    );
    let out = sandbox().execute(&code, &context(), &NoSubCall);
    assert!(out.starts_with("ERROR: PermissionError:"), "{out}");
    assert!(!marker.exists());

    let denied = sandbox().execute("import operator\nprint(operator)", &context(), &NoSubCall);
    assert!(denied.starts_with("ERROR: ImportError:"), "{denied}");
}

#[test]
fn files_cannot_be_written_through_loaded_modules() {
    if !python_available() {
        return;
    }
    let temp = tempfile::tempdir().expect("tempdir");
    let marker = temp.path().join("written.txt");
    let code = format!(
        "s = re.enum.sys\nb = s.modules['built' + 'ins']\nf = b.open\nf({:?}, 'w').write('x')",
        marker.display().to_string()
    );
    let out = sandbox().execute(&code, &context(), &NoSubCall);
    assert!(out.starts_with("ERROR: PermissionError:"), "{out}");
    assert!(!marker.exists());
}

#[test]
fn modules_outside_the_sandbox_cannot_be_loaded() {
    if !python_available() {
        return;
    }
    let code = "s = re.enum.sys\nm = s.modules['_frozen_importlib']\nm._gcd_import('csv')\nprint('loaded')";
    let out = sandbox().execute(code, &context(), &NoSubCall);
    assert!(out.starts_with("ERROR: ModuleNotFoundError:"), "{out}");
    assert!(!out.contains("loaded"), "{out}");
}

#[test]
fn builtins_exclude_file_and_reflection_helpers() {
    if !python_available() {
        return;
    }
    // `input` is neither denylisted nor part of the allowed builtins.
    let out = sandbox().execute("print(input)", &context(), &NoSubCall);
    assert!(out.starts_with("ERROR: NameError:"), "{out}");
}

#[test]
fn state_does_not_persist_between_executions() {
    if !python_available() {
        return;
    }
    let sandbox = sandbox();
    assert_eq!(
        sandbox.execute("answer = 42", &context(), &NoSubCall),
        NO_OUTPUT_PLACEHOLDER
    );
    let out = sandbox.execute("print(answer)", &context(), &NoSubCall);
    assert!(out.starts_with("ERROR: NameError:"), "{out}");
}

#[test]
fn executions_are_idempotent() {
    if !python_available() {
        return;
    }
    let sandbox = sandbox();
    let code = "print(sorted(set(context.split())))";
    let first = sandbox.execute(code, &context(), &NoSubCall);
    let second = sandbox.execute(code, &context(), &NoSubCall);
    assert_eq!(first, second);
    assert_eq!(first, "['alpha', 'beta', 'gamma']");
}

#[test]
fn sub_calls_are_proxied_to_the_host() {
    if !python_available() {
        return;
    }
    let recorder = RecordingSubCall::new("two greek letters");
    let code = "answer = sub_call('Summarize', get_lines(0, 2))\nprint(answer.upper())\nprint(llm_query('again'))";
    let out = sandbox().execute(code, &context(), &recorder);
    assert_eq!(out, "TWO GREEK LETTERS\ntwo greek letters");
    assert_eq!(
        recorder.calls(),
        vec![
            ("Summarize".to_string(), "alpha\nbeta".to_string()),
            ("again".to_string(), String::new()),
        ]
    );
}

#[test]
fn printed_output_is_capped() {
    if !python_available() {
        return;
    }
    let sandbox = PythonSandbox::new(SandboxConfig {
        output_limit_bytes: 50,
        ..SandboxConfig::default()
    });
    let out = sandbox.execute("print('a' * 100)", &context(), &NoSubCall);
    assert_eq!(out, format!("{}\n[output truncated 51 chars]", "a".repeat(50)));
}

#[test]
fn wall_clock_timeout_kills_the_child() {
    if !python_available() {
        return;
    }
    let sandbox = PythonSandbox::new(SandboxConfig {
        timeout_secs: 1,
        ..SandboxConfig::default()
    });
    let out = sandbox.execute("while True:\n    pass", &context(), &NoSubCall);
    assert_eq!(out, "ERROR: TimeoutError: execution exceeded the 1s time limit");
}

#[cfg(unix)]
#[test]
fn cpu_quota_is_a_resource_limit() {
    if !python_available() {
        return;
    }
    let sandbox = PythonSandbox::new(SandboxConfig {
        timeout_secs: 20,
        cpu_secs: 1,
        ..SandboxConfig::default()
    });
    let out = sandbox.execute("while True:\n    pass", &context(), &NoSubCall);
    assert!(out.starts_with("ERROR: ResourceLimit:"), "{out}");
}

/// Scenario: code turn, then answer, with the real sandbox in the loop.
#[test]
fn session_with_python_sandbox_answers() {
    if !python_available() {
        return;
    }
    let context = context();
    let backend = ScriptedBackend::new([
        "```python\nprint(context_lines[1])\n```",
        "FINAL_ANSWER: beta is line index 1",
    ]);
    let cfg = RlmConfig::default();
    let sandbox = PythonSandbox::new(cfg.sandbox.clone());

    let outcome = run_session(
        &SessionRequest::new("Which word is on line 1?", &context, &cfg),
        &backend,
        &sandbox,
        |_| {},
    )
    .expect("session");

    assert_eq!(outcome.turns.len(), 2);
    assert_eq!(outcome.turns[0].output.as_deref(), Some("beta"));
    assert_eq!(outcome.answer(), Some("beta is line index 1"));
}
