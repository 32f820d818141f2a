//! Investigation tests for the HTTP completion backend.
//!
//! # Running
//!
//! ```bash
//! NANO_GPT_API_KEY=... cargo test -p rlm --test investigation_llm backend -- --ignored
//! ```

use rlm::core::parser::{ParsedResponse, parse};
use rlm::core::types::Message;
use rlm::io::backend::{Backend, CompletionRequest, HttpBackend};
use rlm::io::config::RlmConfig;
use rlm::io::prompt::PromptEngine;

/// Verifies the configured endpoint answers a trivial chat request.
#[test]
#[ignore]
fn backend_answers_a_simple_prompt() {
    let cfg = RlmConfig::default();
    let backend = HttpBackend::from_config(&cfg.backend).expect("backend");
    let messages = [
        Message::system("Reply with a single word."),
        Message::user("Say hello."),
    ];
    let text = backend
        .complete(&CompletionRequest {
            profile: &cfg.sub,
            messages: &messages,
        })
        .expect("completion");

    println!("response: {text}");
    assert!(!text.trim().is_empty());
}

/// Verifies the root instructions make the model reply with code or an answer.
#[test]
#[ignore]
fn root_profile_replies_in_protocol() {
    let cfg = RlmConfig::default();
    let backend = HttpBackend::from_config(&cfg.backend).expect("backend");
    let prompts = PromptEngine::new().expect("prompts");
    let messages = [
        Message::system(
            prompts
                .system(&rlm::io::prompt::SystemPromptInfo {
                    chars: 16,
                    lines: 3,
                    files: 0,
                    observation_limit: cfg.observation_limit_chars,
                    max_depth: cfg.max_depth,
                    max_sub_calls: cfg.max_sub_calls,
                })
                .expect("system prompt"),
        ),
        Message::user(prompts.question("Which word is on line 1?").expect("question")),
    ];
    let text = backend
        .complete(&CompletionRequest {
            profile: &cfg.root,
            messages: &messages,
        })
        .expect("completion");

    println!("response:\n{text}");
    assert!(!matches!(parse(&text), ParsedResponse::None));
}
