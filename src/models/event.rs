use std::sync::Arc;

use tokio::sync::mpsc;

use super::{Conversation, GeneratorResponse, NoticeMessage};

#[derive(Debug)]
pub enum Event {
    Notice(NoticeMessage),

    /// One fragment from the streaming generator. Internal to the
    /// controller/generator exchange.
    GeneratorResponse(GeneratorResponse),

    /// The accumulated partial reply for an in-flight generation. This is
    /// the only place partial, non-durable state becomes externally visible.
    StreamingUpdate {
        conversation_id: String,
        buffer: String,
    },

    ConversationCreated(Conversation),
    ConversationUpdated(Conversation),
    ConversationsRefreshed(Vec<Conversation>),
}

#[async_trait::async_trait]
pub trait EventTx {
    async fn send(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>>;
}

#[async_trait::async_trait]
impl EventTx for mpsc::Sender<Event> {
    async fn send(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>> {
        self.send(event).await
    }
}

#[async_trait::async_trait]
impl EventTx for mpsc::UnboundedSender<Event> {
    async fn send(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>> {
        self.send(event)
    }
}

pub type ArcEventTx = Arc<dyn EventTx + Send + Sync>;
