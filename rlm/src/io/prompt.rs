//! Instruction templates for the root and sub profiles.

use anyhow::{Context as _, Result};
use minijinja::{Environment, context};
use serde::Serialize;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const QUESTION_TEMPLATE: &str = include_str!("prompts/question.md");
const OBSERVATION_TEMPLATE: &str = include_str!("prompts/observation.md");
const NUDGE_TEMPLATE: &str = include_str!("prompts/nudge.md");
const SUB_SYSTEM_TEMPLATE: &str = include_str!("prompts/sub_system.md");
const SUB_USER_TEMPLATE: &str = include_str!("prompts/sub_user.md");

/// Facts about the session shown in the system instruction.
#[derive(Debug, Clone, Serialize)]
pub struct SystemPromptInfo {
    pub chars: usize,
    pub lines: usize,
    pub files: usize,
    pub observation_limit: usize,
    pub max_depth: u32,
    pub max_sub_calls: u32,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        for (name, source) in [
            ("system", SYSTEM_TEMPLATE),
            ("question", QUESTION_TEMPLATE),
            ("observation", OBSERVATION_TEMPLATE),
            ("nudge", NUDGE_TEMPLATE),
            ("sub_system", SUB_SYSTEM_TEMPLATE),
            ("sub_user", SUB_USER_TEMPLATE),
        ] {
            env.add_template(name, source)
                .with_context(|| format!("load {name} template"))?;
        }
        Ok(Self { env })
    }

    pub fn system(&self, info: &SystemPromptInfo) -> Result<String> {
        let template = self.env.get_template("system")?;
        Ok(template.render(info)?)
    }

    /// The user's question, fenced as data.
    pub fn question(&self, question: &str) -> Result<String> {
        let template = self.env.get_template("question")?;
        Ok(template.render(context! {
            question => fence_question(question),
        })?)
    }

    pub fn observation(&self, iteration: u32, max_iterations: u32, output: &str) -> Result<String> {
        let template = self.env.get_template("observation")?;
        Ok(template.render(context! {
            iteration => iteration,
            max_iterations => max_iterations,
            remaining => max_iterations.saturating_sub(iteration),
            output => output,
        })?)
    }

    /// Corrective message after a reply with neither code nor an answer.
    pub fn nudge(&self, empty: bool) -> Result<String> {
        let template = self.env.get_template("nudge")?;
        Ok(template.render(context! { empty => empty })?)
    }

    pub fn sub_system(&self) -> Result<String> {
        let template = self.env.get_template("sub_system")?;
        Ok(template.render(context! {})?)
    }

    pub fn sub_user(&self, prompt: &str, chunk: &str) -> Result<String> {
        let template = self.env.get_template("sub_user")?;
        Ok(template.render(context! {
            prompt => prompt.trim(),
            chunk => chunk,
        })?)
    }
}

/// Trim the question and break any closing tag inside it.
fn fence_question(question: &str) -> String {
    question.trim().replace("</question>", "</ question>")
}
