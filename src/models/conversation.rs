#[cfg(test)]
#[path = "conversation_test.rs"]
mod tests;

use crate::config::constants::TRANSCRIPT_LABEL;
use crate::models::{Message, message::Role};

/// One video transcript paired with an ordered message history. The first
/// message is always the system message carrying the transcript verbatim,
/// seeded exactly once at creation.
#[derive(Debug, Clone)]
pub struct Conversation {
    id: String,
    owner_id: String,
    video_id: String,
    video_title: String,
    video_thumbnail: String,
    video_url: String,
    messages: Vec<Message>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Conversation {
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_owner_id(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self
    }

    pub fn with_video_id(mut self, video_id: impl Into<String>) -> Self {
        self.video_id = video_id.into();
        self
    }

    pub fn with_video_title(mut self, title: impl Into<String>) -> Self {
        self.video_title = title.into();
        self
    }

    pub fn with_video_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.video_thumbnail = thumbnail.into();
        self
    }

    pub fn with_video_url(mut self, url: impl Into<String>) -> Self {
        self.video_url = url.into();
        self
    }

    /// Seed the transcript system message. Only effective on an empty
    /// message list, so the first message can never be replaced later.
    pub fn with_transcript(mut self, transcript: &str) -> Self {
        if self.messages.is_empty() {
            self.messages
                .push(Message::new_system(format!("{TRANSCRIPT_LABEL}{transcript}")));
        }
        self
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_created_at(mut self, timestamp: chrono::DateTime<chrono::Utc>) -> Self {
        self.created_at = timestamp;
        if self.updated_at.is_none() {
            self.updated_at = Some(timestamp);
        }
        self
    }

    pub fn with_updated_at(mut self, timestamp: chrono::DateTime<chrono::Utc>) -> Self {
        self.updated_at = Some(timestamp);
        self
    }

    pub fn append_message(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Some(chrono::Utc::now());
    }

    /// Replace the full message list. The store counterpart is a
    /// full-document replace-write, so the local copy mirrors it wholesale.
    pub fn set_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.updated_at = Some(chrono::Utc::now());
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn video_title(&self) -> &str {
        &self.video_title
    }

    pub fn video_thumbnail(&self) -> &str {
        &self.video_thumbnail
    }

    pub fn video_url(&self) -> &str {
        &self.video_url
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }

    /// The transcript text this conversation was created with, recovered
    /// from the seeded system message.
    pub fn transcript(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|msg| msg.role() == Role::System)
            .map(|msg| {
                msg.content()
                    .strip_prefix(TRANSCRIPT_LABEL)
                    .unwrap_or(msg.content())
            })
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self {
            id: "".to_string(),
            owner_id: "".to_string(),
            video_id: "".to_string(),
            video_title: "".to_string(),
            video_thumbnail: "".to_string(),
            video_url: "".to_string(),
            messages: vec![],
            created_at: chrono::Utc::now(),
            updated_at: None,
        }
    }
}
