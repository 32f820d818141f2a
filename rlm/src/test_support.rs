//! Test-only doubles for the backend, sandbox and sub-call seams.

use std::cell::RefCell;
use std::collections::VecDeque;

use anyhow::{Result, anyhow};

use crate::core::context::Context;
use crate::core::types::Message;
use crate::io::backend::{Backend, CompletionRequest};
use crate::io::sandbox::{Sandbox, SubCall};

/// One completion request as the backend saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub model: String,
    pub messages: Vec<Message>,
}

/// Backend that replays canned responses in order.
///
/// `Err` entries simulate a call that failed after retries. Once the script
/// runs out every call returns an empty response.
#[derive(Default)]
pub struct ScriptedBackend {
    responses: RefCell<VecDeque<Result<String, String>>>,
    requests: RefCell<Vec<RecordedRequest>>,
}

impl ScriptedBackend {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_results(responses.into_iter().map(|r| Ok(r.into())))
    }

    pub fn from_results<I>(results: I) -> Self
    where
        I: IntoIterator<Item = Result<String, String>>,
    {
        Self {
            responses: RefCell::new(results.into_iter().collect()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Backend whose first `count` calls fail.
    pub fn failing(count: usize) -> Self {
        Self::from_results((0..count).map(|i| Err(format!("HTTP 503: outage {i}"))))
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.borrow().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl Backend for ScriptedBackend {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String> {
        self.requests.borrow_mut().push(RecordedRequest {
            model: request.profile.model.clone(),
            messages: request.messages.to_vec(),
        });
        match self.responses.borrow_mut().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(String::new()),
        }
    }
}

/// Sandbox that returns canned observations without running anything.
///
/// Each execution first issues the configured sub-calls; the observation is
/// the next canned output, or the sub-call responses joined by newlines when
/// no output is queued.
#[derive(Default)]
pub struct ScriptedSandbox {
    outputs: RefCell<VecDeque<String>>,
    sub_calls: Vec<(String, String)>,
    executed: RefCell<Vec<String>>,
}

impl ScriptedSandbox {
    pub fn new<I, S>(outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            outputs: RefCell::new(outputs.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn with_sub_calls(mut self, calls: &[(&str, &str)]) -> Self {
        self.sub_calls = calls
            .iter()
            .map(|(prompt, chunk)| (prompt.to_string(), chunk.to_string()))
            .collect();
        self
    }

    /// Code fragments executed so far.
    pub fn executed(&self) -> Vec<String> {
        self.executed.borrow().clone()
    }
}

impl Sandbox for ScriptedSandbox {
    fn execute(&self, code: &str, _context: &Context, sub_call: &dyn SubCall) -> String {
        self.executed.borrow_mut().push(code.to_string());
        let responses: Vec<String> = self
            .sub_calls
            .iter()
            .map(|(prompt, chunk)| sub_call.call(prompt, chunk))
            .collect();
        self.outputs
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| responses.join("\n"))
    }
}

/// Sub-call capability that records calls and answers with a fixed reply.
pub struct RecordingSubCall {
    reply: String,
    calls: RefCell<Vec<(String, String)>>,
}

impl RecordingSubCall {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.borrow().clone()
    }
}

impl SubCall for RecordingSubCall {
    fn call(&self, prompt: &str, chunk: &str) -> String {
        self.calls
            .borrow_mut()
            .push((prompt.to_string(), chunk.to_string()));
        self.reply.clone()
    }
}
