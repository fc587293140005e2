#[cfg(test)]
#[path = "generator_test.rs"]
mod tests;

use crate::config::constants::MARKDOWN_INSTRUCTION;
use crate::models::Message;

/// A generation request: the conversation history so far plus the new user
/// prompt. The history excludes the prompt itself.
pub struct GeneratePrompt {
    text: String,
    history: Vec<Message>,
}

impl GeneratePrompt {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            history: vec![],
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Flatten the request into the single text payload sent upstream:
    /// `role: content` blocks joined by blank lines, then the new prompt
    /// under a `user:` label, then the fixed markdown instruction.
    pub fn flatten(&self) -> String {
        let mut blocks = self
            .history
            .iter()
            .map(|msg| format!("{}: {}", msg.role(), msg.content()))
            .collect::<Vec<_>>();
        blocks.push(format!("user: {}", self.text));
        blocks.push(format!("assistant: {}", MARKDOWN_INSTRUCTION));
        blocks.join("\n\n")
    }
}

/// One streamed fragment of a reply. Concatenating the `text` of every
/// fragment of a generation yields the full reply; `done` marks the last
/// fragment.
#[derive(Debug, Clone)]
pub struct GeneratorResponse {
    pub id: String,
    pub text: String,
    pub done: bool,
}
