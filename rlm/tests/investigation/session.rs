//! Investigation tests for full sessions against a live model.
//!
//! Requires `python3` and API credentials.
//!
//! # Running
//!
//! ```bash
//! NANO_GPT_API_KEY=... cargo test -p rlm --test investigation_llm session -- --ignored
//! ```

use rlm::core::context::Context;
use rlm::io::backend::HttpBackend;
use rlm::io::config::RlmConfig;
use rlm::io::sandbox::PythonSandbox;
use rlm::session::{SessionRequest, run_session};

/// Verifies a live session finds a needle in a synthetic haystack.
#[test]
#[ignore]
fn live_session_finds_the_needle() {
    let mut lines: Vec<String> = (0..2000)
        .map(|i| format!("record {i}: status=ok latency={}ms", (i * 37) % 500))
        .collect();
    lines[1234] = "record 1234: status=FAILED code=E42 latency=999ms".to_string();
    let context = Context::new(lines.join("\n"));

    let cfg = RlmConfig::default();
    let backend = HttpBackend::from_config(&cfg.backend).expect("backend");
    let sandbox = PythonSandbox::new(cfg.sandbox.clone());
    let outcome = run_session(
        &SessionRequest::new("Which record failed, and with which error code?", &context, &cfg),
        &backend,
        &sandbox,
        |turn| println!("[{}] {:?}", turn.iteration, turn.kind),
    )
    .expect("session");

    let answer = outcome.answer().expect("answered");
    println!("answer: {answer}");
    assert!(answer.contains("1234"));
    assert!(answer.contains("E42"));
}
