pub mod sqlite;

use std::sync::Arc;

use crate::{
    config::StoreConfig,
    models::{Conversation, Message},
};
use async_trait::async_trait;
use eyre::Result;
use sqlite::Sqlite;

#[cfg(test)]
use mockall::{automock, predicate::*};

/// Fields of a conversation about to be created. The store assigns the id
/// and timestamps and seeds the transcript system message.
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub owner_id: String,
    pub video_id: String,
    pub video_title: String,
    pub video_thumbnail: String,
    pub video_url: String,
    pub transcript: String,
}

/// Durable conversation store. Every operation is an atomic single-document
/// read or replace; there is no partial-failure mode and no delete.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait Store {
    /// All conversations owned by `owner_id`, most recently updated first.
    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>>;

    async fn create_conversation(&self, request: NewConversation) -> Result<Conversation>;

    /// Full replace-write of a conversation's message list. Refreshes
    /// `updated_at` as a side effect.
    async fn replace_messages(&self, conversation_id: &str, messages: &[Message]) -> Result<()>;
}

pub type ArcStore = Arc<dyn Store + Send + Sync>;

pub async fn new_store(config: &StoreConfig) -> Result<ArcStore> {
    let store = match config {
        StoreConfig::Sqlite(sqlite_config) => {
            Arc::new(Sqlite::new(sqlite_config.path.as_deref()).await?)
        }
    };
    Ok(store)
}
