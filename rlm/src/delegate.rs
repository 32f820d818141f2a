//! Sub-call delegation from sandboxed code back to the model backend.

use std::cell::{Cell, RefCell};
use std::time::Instant;

use tracing::{debug, instrument, warn};

use crate::core::context::Context;
use crate::core::text::truncate_chars;
use crate::core::types::{Message, SessionStop, SubCallRecord};
use crate::io::backend::{Backend, CompletionRequest};
use crate::io::sandbox::{Sandbox, SubCall};
use crate::session::SessionEnv;

/// Sub-calls left in a session, shared by every delegate and nested session.
#[derive(Debug)]
pub struct SubCallBudget {
    limit: u32,
    used: Cell<u32>,
}

impl SubCallBudget {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            used: Cell::new(0),
        }
    }

    /// Reserve one call, returning `false` once the limit is reached.
    pub fn try_take(&self) -> bool {
        let used = self.used.get();
        if used >= self.limit {
            return false;
        }
        self.used.set(used + 1);
        true
    }

    pub fn used(&self) -> u32 {
        self.used.get()
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

/// [`SubCall`] implementation bound to one sandbox execution.
///
/// `depth` is the delegation depth remaining for calls made through this
/// delegate. Every call is recorded so the triggering turn can report it.
pub struct Delegate<'a, B, S> {
    env: &'a SessionEnv<'a, B, S>,
    depth: u32,
    records: RefCell<Vec<SubCallRecord>>,
}

impl<'a, B: Backend, S: Sandbox> Delegate<'a, B, S> {
    pub(crate) fn new(env: &'a SessionEnv<'a, B, S>, depth: u32) -> Self {
        Self {
            env,
            depth,
            records: RefCell::new(Vec::new()),
        }
    }

    pub fn into_records(self) -> Vec<SubCallRecord> {
        self.records.into_inner()
    }

    fn respond(&self, prompt: &str, chunk: &str) -> String {
        if self.depth == 0 {
            return "ERROR: DepthExceeded: maximum delegation depth reached; answer from the chunk directly"
                .to_string();
        }
        if !self.env.budget.try_take() {
            warn!(limit = self.env.budget.limit(), "sub-call budget exhausted");
            return format!(
                "ERROR: SubCallLimit: the session allows at most {} sub-calls",
                self.env.budget.limit()
            );
        }
        if self.depth == 1 {
            self.complete_once(prompt, chunk)
        } else {
            self.nested_session(prompt, chunk)
        }
    }

    fn complete_once(&self, prompt: &str, chunk: &str) -> String {
        let messages = match (self.env.prompts.sub_system(), self.env.prompts.sub_user(prompt, chunk)) {
            (Ok(system), Ok(user)) => [Message::system(system), Message::user(user)],
            (Err(err), _) | (_, Err(err)) => return format!("ERROR: BackendError: {err:#}"),
        };
        let request = CompletionRequest {
            profile: &self.env.config.sub,
            messages: &messages,
        };
        match self.env.backend.complete(&request) {
            Ok(text) => text.trim().to_string(),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "sub-call completion failed");
                format!("ERROR: BackendError: {err:#}")
            }
        }
    }

    fn nested_session(&self, prompt: &str, chunk: &str) -> String {
        let context = Context::new(chunk);
        let result = self.env.run_loop(
            prompt,
            &context,
            &self.env.config.sub,
            self.env.config.sub_max_iterations,
            self.depth - 1,
            &mut |_| {},
        );
        match result {
            Ok(result) => match result.stop {
                SessionStop::Answered { answer } => answer,
                stop => format!(
                    "ERROR: NoAnswer: nested session ended {} after {} turns",
                    stop.label(),
                    result.turns.len()
                ),
            },
            Err(err) => format!("ERROR: NoAnswer: nested session failed: {err:#}"),
        }
    }
}

impl<B: Backend, S: Sandbox> SubCall for Delegate<'_, B, S> {
    #[instrument(skip_all, fields(depth = self.depth, chunk_chars = chunk.chars().count()))]
    fn call(&self, prompt: &str, chunk: &str) -> String {
        let started = Instant::now();
        let response = self.respond(prompt, chunk);
        let duration_ms = started.elapsed().as_millis() as u64;
        debug!(duration_ms, error = response.starts_with("ERROR:"), "sub-call finished");

        let limit = self.env.config.trace_limit_chars;
        self.records.borrow_mut().push(SubCallRecord {
            depth: self.depth,
            prompt: truncate_chars(prompt, limit),
            chunk_chars: chunk.chars().count(),
            response: truncate_chars(&response, limit),
            duration_ms,
        });
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_stops_at_the_limit() {
        let budget = SubCallBudget::new(2);
        assert!(budget.try_take());
        assert!(budget.try_take());
        assert!(!budget.try_take());
        assert_eq!(budget.used(), 2);
    }

    #[test]
    fn zero_budget_refuses_everything() {
        let budget = SubCallBudget::new(0);
        assert!(!budget.try_take());
        assert_eq!(budget.used(), 0);
    }
}
