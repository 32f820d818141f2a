//! The orchestration loop: prompt, parse, execute, observe, repeat.
//!
//! A session starts from the system instruction and the fenced question and
//! runs one model completion per iteration. A final-answer marker ends it;
//! extracted code runs in the sandbox and its truncated output goes back to
//! the model; anything else earns a corrective nudge. The loop stops
//! `exhausted` when the iteration or time budget runs out and `fatal` after
//! too many consecutive empty responses.

use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::budget::{deadline_after, remaining_budget};
use crate::core::citations::{Citation, extract_citations};
use crate::core::context::{Context, ContextStats};
use crate::core::parser::{ParsedResponse, parse};
use crate::core::text::truncate_chars;
use crate::core::types::{ExhaustReason, Message, SessionStop, Turn, TurnKind};
use crate::delegate::{Delegate, SubCallBudget};
use crate::exit_codes;
use crate::io::backend::{Backend, CompletionRequest};
use crate::io::config::{ModelProfile, RlmConfig};
use crate::io::prompt::{PromptEngine, SystemPromptInfo};
use crate::io::sandbox::Sandbox;

/// Answer reported when a session ends without one.
pub const NO_ANSWER_SENTINEL: &str = "No answer found within the iteration budget";

/// Input for one top-level session.
#[derive(Debug, Clone)]
pub struct SessionRequest<'a> {
    pub session_id: String,
    pub question: &'a str,
    pub context: &'a Context,
    pub config: &'a RlmConfig,
    pub max_iterations: u32,
}

impl<'a> SessionRequest<'a> {
    pub fn new(question: &'a str, context: &'a Context, config: &'a RlmConfig) -> Self {
        Self {
            session_id: new_session_id(),
            question,
            context,
            config,
            max_iterations: config.max_iterations,
        }
    }
}

/// Result of a session; serialized as the persisted trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub session_id: String,
    pub question: String,
    pub context: ContextStats,
    pub root_model: String,
    pub sub_model: String,
    pub stop: SessionStop,
    pub turns: Vec<Turn>,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub sub_call_count: u32,
    pub started_at: String,
    pub duration_ms: u64,
}

impl SessionOutcome {
    pub fn answer(&self) -> Option<&str> {
        match &self.stop {
            SessionStop::Answered { answer } => Some(answer),
            _ => None,
        }
    }

    /// The answer, or a sentinel describing why there is none.
    pub fn answer_or_sentinel(&self) -> String {
        match &self.stop {
            SessionStop::Answered { answer } => answer.clone(),
            SessionStop::Exhausted { .. } => NO_ANSWER_SENTINEL.to_string(),
            SessionStop::Fatal { reason } => format!("Session failed: {reason}"),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.stop {
            SessionStop::Answered { .. } => exit_codes::OK,
            SessionStop::Exhausted { .. } => exit_codes::EXHAUSTED,
            SessionStop::Fatal { .. } => exit_codes::FATAL,
        }
    }
}

/// `rlm-<UTC timestamp>-<4 hex>`, unique enough for trace directories.
pub fn new_session_id() -> String {
    let suffix: u16 = rand::random();
    format!("rlm-{}-{suffix:04x}", Utc::now().format("%Y%m%d_%H%M%S"))
}

/// Answer `question` about `context`, returning the answer (or sentinel) and the turns.
pub fn run<B: Backend, S: Sandbox>(
    context: &Context,
    question: &str,
    max_iterations: u32,
    config: &RlmConfig,
    backend: &B,
    sandbox: &S,
) -> Result<(String, Vec<Turn>)> {
    let request = SessionRequest {
        max_iterations,
        ..SessionRequest::new(question, context, config)
    };
    let outcome = run_session(&request, backend, sandbox, |_| {})?;
    Ok((outcome.answer_or_sentinel(), outcome.turns))
}

/// Run one session to a terminal state, calling `on_turn` as each turn is recorded.
///
/// Model failures and sandbox errors are part of the session; an `Err` only
/// means the session could not be set up or its prompts failed to render.
#[instrument(skip_all, fields(session_id = %request.session_id, max_iterations = request.max_iterations))]
pub fn run_session<B: Backend, S: Sandbox, F: FnMut(&Turn)>(
    request: &SessionRequest<'_>,
    backend: &B,
    sandbox: &S,
    mut on_turn: F,
) -> Result<SessionOutcome> {
    let started = Instant::now();
    let started_at = Utc::now().to_rfc3339();
    let config = request.config;
    let prompts = PromptEngine::new()?;
    let budget = SubCallBudget::new(config.max_sub_calls);
    let env = SessionEnv {
        backend,
        sandbox,
        config,
        prompts: &prompts,
        budget: &budget,
        deadline: deadline_after(started, config.max_session_secs),
    };

    let result = env.run_loop(
        request.question,
        request.context,
        &config.root,
        request.max_iterations,
        config.max_depth,
        &mut on_turn,
    )?;

    let citations = match &result.stop {
        SessionStop::Answered { answer } => extract_citations(answer, request.context),
        _ => Vec::new(),
    };
    info!(
        status = result.stop.label(),
        turns = result.turns.len(),
        sub_calls = budget.used(),
        "session finished"
    );

    Ok(SessionOutcome {
        session_id: request.session_id.clone(),
        question: request.question.to_string(),
        context: request.context.stats(),
        root_model: config.root.model.clone(),
        sub_model: config.sub.model.clone(),
        stop: result.stop,
        turns: result.turns,
        citations,
        sub_call_count: budget.used(),
        started_at,
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

pub(crate) struct LoopResult {
    pub stop: SessionStop,
    pub turns: Vec<Turn>,
}

/// Collaborators shared by a session and the nested sessions it delegates to.
pub(crate) struct SessionEnv<'a, B, S> {
    pub backend: &'a B,
    pub sandbox: &'a S,
    pub config: &'a RlmConfig,
    pub prompts: &'a PromptEngine,
    pub budget: &'a SubCallBudget,
    pub deadline: Option<Instant>,
}

impl<B: Backend, S: Sandbox> SessionEnv<'_, B, S> {
    fn time_exhausted(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| remaining_budget(deadline).is_err())
    }

    /// The loop itself; `depth` is the delegation depth for code run in this loop.
    pub(crate) fn run_loop(
        &self,
        question: &str,
        context: &Context,
        profile: &ModelProfile,
        max_iterations: u32,
        depth: u32,
        on_turn: &mut dyn FnMut(&Turn),
    ) -> Result<LoopResult> {
        let config = self.config;
        let stats = context.stats();
        let mut messages = vec![
            Message::system(self.prompts.system(&SystemPromptInfo {
                chars: stats.chars,
                lines: stats.lines,
                files: stats.files,
                observation_limit: config.observation_limit_chars,
                max_depth: depth,
                max_sub_calls: config.max_sub_calls,
            })?),
            Message::user(self.prompts.question(question)?),
        ];
        let mut turns: Vec<Turn> = Vec::new();
        let mut consecutive_empty = 0u32;

        for iteration in 1..=max_iterations {
            if self.time_exhausted() {
                info!(iteration, "session time budget exhausted");
                return Ok(LoopResult {
                    stop: SessionStop::Exhausted {
                        reason: ExhaustReason::Time,
                    },
                    turns,
                });
            }

            let started = Instant::now();
            let request = CompletionRequest {
                profile,
                messages: &messages,
            };
            let (response, backend_failed) = match self.backend.complete(&request) {
                Ok(text) => (text, false),
                Err(err) => {
                    warn!(iteration, err = %format!("{err:#}"), "completion failed, treating as empty response");
                    (String::new(), true)
                }
            };
            let empty = response.trim().is_empty();
            consecutive_empty = if empty { consecutive_empty + 1 } else { 0 };

            let mut turn = Turn {
                iteration,
                kind: TurnKind::NoCode,
                model_output: truncate_chars(&response, config.trace_limit_chars),
                extractor: None,
                code: None,
                output: None,
                final_answer: None,
                sub_calls: Vec::new(),
                backend_failed,
                duration_ms: 0,
            };

            match parse(&response) {
                ParsedResponse::FinalAnswer(answer) => {
                    debug!(iteration, answer_chars = answer.chars().count(), "final answer");
                    turn.kind = TurnKind::FinalAnswer;
                    turn.final_answer = Some(answer.clone());
                    turn.duration_ms = started.elapsed().as_millis() as u64;
                    on_turn(&turn);
                    turns.push(turn);
                    return Ok(LoopResult {
                        stop: SessionStop::Answered { answer },
                        turns,
                    });
                }
                ParsedResponse::Code {
                    fragment,
                    extractor,
                } => {
                    debug!(iteration, extractor, code_chars = fragment.chars().count(), "executing code");
                    let delegate = Delegate::new(self, depth);
                    let raw = self.sandbox.execute(&fragment, context, &delegate);
                    let output = truncate_chars(&raw, config.observation_limit_chars);

                    turn.kind = TurnKind::CodeExecution;
                    turn.extractor = Some(extractor.to_string());
                    turn.code = Some(truncate_chars(&fragment, config.trace_limit_chars));
                    turn.output = Some(truncate_chars(&output, config.trace_limit_chars));
                    turn.sub_calls = delegate.into_records();

                    messages.push(Message::assistant(response));
                    messages.push(Message::user(self.prompts.observation(
                        iteration,
                        max_iterations,
                        &output,
                    )?));
                }
                ParsedResponse::None => {
                    debug!(iteration, empty, backend_failed, "no code or answer in response");
                    if !empty {
                        messages.push(Message::assistant(response));
                    }
                    messages.push(Message::user(self.prompts.nudge(empty)?));
                }
            }

            turn.duration_ms = started.elapsed().as_millis() as u64;
            on_turn(&turn);
            turns.push(turn);

            if consecutive_empty >= config.max_consecutive_empty {
                warn!(consecutive_empty, "too many empty responses");
                return Ok(LoopResult {
                    stop: SessionStop::Fatal {
                        reason: format!("{consecutive_empty} consecutive empty model responses"),
                    },
                    turns,
                });
            }
        }

        Ok(LoopResult {
            stop: SessionStop::Exhausted {
                reason: ExhaustReason::Iterations,
            },
            turns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_prefixed_and_distinct() {
        let a = new_session_id();
        let b = new_session_id();
        assert!(a.starts_with("rlm-"));
        assert_eq!(a.len(), "rlm-20260101_000000-0a1f".len());
        let suffix = &a[a.len() - 4..];
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(b.starts_with("rlm-"));
    }

    fn outcome(stop: SessionStop) -> SessionOutcome {
        SessionOutcome {
            session_id: "rlm-test".to_string(),
            question: "q".to_string(),
            context: Context::new("abc").stats(),
            root_model: "root-model".to_string(),
            sub_model: "sub-model".to_string(),
            stop,
            turns: Vec::new(),
            citations: Vec::new(),
            sub_call_count: 0,
            started_at: "2026-01-01T00:00:00Z".to_string(),
            duration_ms: 1,
        }
    }

    #[test]
    fn sentinel_and_exit_code_follow_the_stop_state() {
        let answered = outcome(SessionStop::Answered {
            answer: "beta".to_string(),
        });
        assert_eq!(answered.answer(), Some("beta"));
        assert_eq!(answered.exit_code(), exit_codes::OK);

        let exhausted = outcome(SessionStop::Exhausted {
            reason: ExhaustReason::Iterations,
        });
        assert_eq!(exhausted.answer(), None);
        assert_eq!(exhausted.answer_or_sentinel(), NO_ANSWER_SENTINEL);
        assert_eq!(exhausted.exit_code(), exit_codes::EXHAUSTED);

        let fatal = outcome(SessionStop::Fatal {
            reason: "3 consecutive empty model responses".to_string(),
        });
        assert!(fatal.answer_or_sentinel().starts_with("Session failed:"));
        assert_eq!(fatal.exit_code(), exit_codes::FATAL);
    }

    #[test]
    fn outcome_serializes_with_tagged_stop() {
        let json = serde_json::to_value(outcome(SessionStop::Exhausted {
            reason: ExhaustReason::Time,
        }))
        .expect("serialize");
        assert_eq!(json["stop"]["status"], "exhausted");
        assert_eq!(json["stop"]["reason"], "time");
        assert_eq!(json["context"]["chars"], 3);
    }
}
