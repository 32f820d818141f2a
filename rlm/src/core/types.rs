//! Shared deterministic types for the session loop.
//!
//! These types define stable contracts between the loop, the parser, the
//! sandbox, and the persisted trace. They do not depend on external state.

use serde::{Deserialize, Serialize};

/// Speaker of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged entry of the session conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Classification of a single loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    /// A code fragment was extracted and executed.
    CodeExecution,
    /// The response carried a final-answer marker.
    FinalAnswer,
    /// Neither code nor an answer could be extracted.
    NoCode,
}

/// One delegated sub-model invocation made from sandboxed code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubCallRecord {
    /// Remaining delegation depth at the time of the call.
    pub depth: u32,
    pub prompt: String,
    pub chunk_chars: usize,
    pub response: String,
    pub duration_ms: u64,
}

/// Immutable record of one loop iteration.
///
/// Text fields are truncated for storage; the conversation itself keeps the
/// full model output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// 1-based iteration index.
    pub iteration: u32,
    pub kind: TurnKind,
    pub model_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extractor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_calls: Vec<SubCallRecord>,
    /// The backend call failed after retries and was treated as empty.
    #[serde(default)]
    pub backend_failed: bool,
    pub duration_ms: u64,
}

/// Why a session ended without an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustReason {
    Iterations,
    Time,
}

/// Terminal state of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionStop {
    Answered { answer: String },
    Exhausted { reason: ExhaustReason },
    Fatal { reason: String },
}

impl SessionStop {
    pub fn label(&self) -> &'static str {
        match self {
            SessionStop::Answered { .. } => "answered",
            SessionStop::Exhausted { .. } => "exhausted",
            SessionStop::Fatal { .. } => "fatal",
        }
    }
}
