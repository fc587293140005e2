#[cfg(test)]
#[path = "sqlite_test.rs"]
mod tests;

pub(crate) mod migration;

use async_trait::async_trait;
use eyre::{Context, Result, bail};
use tokio_rusqlite::{Connection, OpenFlags, params};

use crate::models::{Conversation, Message};
use crate::store::{NewConversation, Store};

pub struct Sqlite {
    conn: Connection,
}

impl Sqlite {
    pub async fn new(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(path) => Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
            )
            .await
            .wrap_err(format!("opening database path: {}", path))?,
            None => Connection::open_in_memory()
                .await
                .wrap_err("opening in-memory database")?,
        };

        let ret = Self { conn };
        ret.run_migration().await.wrap_err("running migration")?;
        Ok(ret)
    }

    async fn run_migration(&self) -> Result<()> {
        self.conn
            .call(|conn| Ok(conn.execute_batch(migration::MIGRATION)?))
            .await
            .wrap_err("executing migration")?;
        Ok(())
    }
}

#[async_trait]
impl Store for Sqlite {
    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>> {
        let owner_id = owner_id.to_string();
        let conversations = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, owner_id, video_id, video_title, video_thumbnail, video_url, \
                     messages, created_at, updated_at \
                     FROM conversations WHERE owner_id = ? ORDER BY updated_at DESC",
                )?;

                let mut rows = stmt.query(params![owner_id])?;
                let mut conversations = vec![];
                while let Some(row) = rows.next()? {
                    let id: String = row.get(0)?;
                    let owner_id: String = row.get(1)?;
                    let video_id: String = row.get(2)?;
                    let video_title: String = row.get(3)?;
                    let video_thumbnail: String = row.get(4)?;
                    let video_url: String = row.get(5)?;
                    let payload: String = row.get(6)?;
                    let created_at: i64 = row.get(7)?;
                    let updated_at: i64 = row.get(8)?;

                    let messages: Vec<Message> = serde_json::from_str(&payload)
                        .map_err(|e| tokio_rusqlite::Error::Other(e.into()))?;

                    let created_at = chrono::DateTime::from_timestamp_millis(created_at).ok_or(
                        tokio_rusqlite::Error::Other(eyre::eyre!("invalid created_at").into()),
                    )?;
                    let updated_at = chrono::DateTime::from_timestamp_millis(updated_at).ok_or(
                        tokio_rusqlite::Error::Other(eyre::eyre!("invalid updated_at").into()),
                    )?;

                    conversations.push(
                        Conversation::default()
                            .with_id(id)
                            .with_owner_id(owner_id)
                            .with_video_id(video_id)
                            .with_video_title(video_title)
                            .with_video_thumbnail(video_thumbnail)
                            .with_video_url(video_url)
                            .with_messages(messages)
                            .with_created_at(created_at)
                            .with_updated_at(updated_at),
                    );
                }
                Ok(conversations)
            })
            .await?;
        Ok(conversations)
    }

    async fn create_conversation(&self, request: NewConversation) -> Result<Conversation> {
        let now = chrono::Utc::now();
        let conversation = Conversation::default()
            .with_id(uuid::Uuid::new_v4().to_string())
            .with_owner_id(&request.owner_id)
            .with_video_id(&request.video_id)
            .with_video_title(&request.video_title)
            .with_video_thumbnail(&request.video_thumbnail)
            .with_video_url(&request.video_url)
            .with_transcript(&request.transcript)
            .with_created_at(now);

        let payload =
            serde_json::to_string(conversation.messages()).wrap_err("serializing messages")?;

        let row = (
            conversation.id().to_string(),
            conversation.owner_id().to_string(),
            conversation.video_id().to_string(),
            conversation.video_title().to_string(),
            conversation.video_thumbnail().to_string(),
            conversation.video_url().to_string(),
            payload,
            now.timestamp_millis(),
        );
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO conversations \
                     (id, owner_id, video_id, video_title, video_thumbnail, video_url, \
                      messages, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                    params![row.0, row.1, row.2, row.3, row.4, row.5, row.6, row.7],
                )?;
                Ok(())
            })
            .await
            .wrap_err("inserting conversation")?;

        Ok(conversation)
    }

    async fn replace_messages(&self, conversation_id: &str, messages: &[Message]) -> Result<()> {
        let payload = serde_json::to_string(messages).wrap_err("serializing messages")?;
        let conversation_id = conversation_id.to_string();
        let updated_at = chrono::Utc::now().timestamp_millis();

        let affected = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE conversations SET messages = ?, updated_at = ? WHERE id = ?",
                    params![payload, updated_at, conversation_id],
                )?)
            })
            .await
            .wrap_err("replacing messages")?;

        if affected == 0 {
            bail!("conversation not found");
        }
        Ok(())
    }
}
