#[cfg(test)]
#[path = "controller_test.rs"]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;

use eyre::Result;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::constants::FALLBACK_MESSAGE;
use crate::generator::ArcGenerator;
use crate::models::{ArcEventTx, Conversation, Event, GeneratePrompt, Message, NoticeMessage};
use crate::store::{ArcStore, NewConversation};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("a reply is already streaming for conversation {0}")]
    Busy(String),
}

enum StreamOutcome {
    Completed(String),
    Failed(eyre::Error),
    Cancelled,
}

/// Client-side conversation state machine. Holds the cached conversation
/// list, the per-conversation streaming guard, and the submit pipeline:
/// persist user message, stream the reply into a partial buffer, persist
/// the final (or fallback) reply.
///
/// Partial reply buffers live in `streams`, not in the polled conversation
/// cache, so a store poll can never clobber an in-flight reply. The
/// `streams` entry doubles as the generation token: holding it is the only
/// way to stream for that conversation.
pub struct ChatController {
    owner: String,
    store: ArcStore,
    generator: ArcGenerator,
    event_tx: ArcEventTx,
    cancel_token: CancellationToken,
    conversations: RwLock<HashMap<String, Conversation>>,
    streams: Mutex<HashMap<String, String>>,
}

impl ChatController {
    pub fn new(
        owner: impl Into<String>,
        store: ArcStore,
        generator: ArcGenerator,
        event_tx: ArcEventTx,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            owner: owner.into(),
            store,
            generator,
            event_tx,
            cancel_token,
            conversations: RwLock::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Load the owner's conversations from the store into the local cache.
    pub async fn bootstrap(&self) -> Result<()> {
        let listed = self.store.list_conversations(&self.owner).await?;
        let mut convos = self.conversations.write().await;
        *convos = listed
            .into_iter()
            .map(|c| (c.id().to_string(), c))
            .collect();
        Ok(())
    }

    /// Cached conversations, most recently updated first.
    pub async fn conversations(&self) -> Vec<Conversation> {
        let convos = self.conversations.read().await;
        let mut list: Vec<_> = convos.values().cloned().collect();
        list.sort_by(|a, b| b.updated_at().cmp(&a.updated_at()));
        list
    }

    pub async fn get(&self, conversation_id: &str) -> Option<Conversation> {
        self.conversations
            .read()
            .await
            .get(conversation_id)
            .cloned()
    }

    pub async fn is_streaming(&self, conversation_id: &str) -> bool {
        self.streams.lock().await.contains_key(conversation_id)
    }

    /// The externally-observable partial reply of an in-flight generation.
    pub async fn partial_reply(&self, conversation_id: &str) -> Option<String> {
        self.streams.lock().await.get(conversation_id).cloned()
    }

    pub async fn create_conversation(&self, request: NewConversation) -> Result<Conversation> {
        let conversation = self.store.create_conversation(request).await?;
        {
            let mut convos = self.conversations.write().await;
            convos.insert(conversation.id().to_string(), conversation.clone());
        }
        self.publish(Event::ConversationCreated(conversation.clone()))
            .await;
        Ok(conversation)
    }

    /// Submit a user message and stream the assistant's reply.
    ///
    /// An empty (after trimming) message or an unknown conversation is a
    /// logged no-op. A second submission while a reply is still streaming
    /// for the same conversation is rejected with [`ChatError::Busy`];
    /// submissions for different conversations are independent.
    pub async fn submit_user_message(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<(), ChatError> {
        let text = text.trim();
        if text.is_empty() {
            log::warn!("Ignoring empty message for conversation {conversation_id}");
            return Ok(());
        }

        let history = {
            let convos = self.conversations.read().await;
            match convos.get(conversation_id) {
                Some(convo) => convo.messages().to_vec(),
                None => {
                    log::warn!("Conversation {conversation_id} not found, ignoring message");
                    return Ok(());
                }
            }
        };

        {
            let mut streams = self.streams.lock().await;
            if streams.contains_key(conversation_id) {
                return Err(ChatError::Busy(conversation_id.to_string()));
            }
            streams.insert(conversation_id.to_string(), String::new());
        }

        self.run_exchange(conversation_id, text, history).await;
        Ok(())
    }

    async fn run_exchange(&self, conversation_id: &str, text: &str, history: Vec<Message>) {
        // The user message must be durable before any reply is requested.
        let mut messages = history.clone();
        messages.push(Message::new_user(text));

        if let Err(err) = self
            .store
            .replace_messages(conversation_id, &messages)
            .await
        {
            // Drop the optimistic append instead of letting local and
            // remote state diverge silently. No retry.
            log::error!("Failed to persist user message for {conversation_id}: {err:?}");
            self.clear_stream(conversation_id).await;
            self.send_notice(NoticeMessage::error(
                "Failed to save your message. Please try again.",
            ))
            .await;
            return;
        }
        self.commit_messages(conversation_id, messages.clone()).await;

        let reply = match self.stream_reply(conversation_id, text, history).await {
            StreamOutcome::Completed(buffer) => Message::new_assistant(buffer),
            StreamOutcome::Failed(err) => {
                log::error!("Generation failed for {conversation_id}: {err:?}");
                Message::new_assistant(FALLBACK_MESSAGE)
            }
            StreamOutcome::Cancelled => {
                log::debug!("Generation cancelled for {conversation_id}");
                self.clear_stream(conversation_id).await;
                return;
            }
        };

        // The user message from above is never rolled back: a failed
        // generation still ends in user message + fallback reply.
        messages.push(reply);
        if let Err(err) = self
            .store
            .replace_messages(conversation_id, &messages)
            .await
        {
            // The reply already streamed to the user; keep the optimistic
            // local copy and let the next successful write reconcile the
            // store.
            log::error!("Failed to persist assistant reply for {conversation_id}: {err:?}");
        }
        self.clear_stream(conversation_id).await;
        self.commit_messages(conversation_id, messages).await;
    }

    async fn stream_reply(
        &self,
        conversation_id: &str,
        text: &str,
        history: Vec<Message>,
    ) -> StreamOutcome {
        let prompt = GeneratePrompt::new(text).with_history(history);

        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let sender: ArcEventTx = Arc::new(tx);

        let generator = Arc::clone(&self.generator);
        let worker: JoinHandle<Result<()>> =
            tokio::spawn(async move { generator.generate(prompt, sender).await });

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    worker.abort();
                    return StreamOutcome::Cancelled;
                }

                event = rx.recv() => {
                    // The channel closes once the generator finished (or
                    // died); every yielded fragment has been consumed by
                    // then.
                    let Some(event) = event else { break };
                    let Event::GeneratorResponse(res) = event else { continue };
                    if res.text.is_empty() {
                        continue;
                    }
                    let buffer = self.push_fragment(conversation_id, &res.text).await;
                    self.publish(Event::StreamingUpdate {
                        conversation_id: conversation_id.to_string(),
                        buffer,
                    })
                    .await;
                }
            }
        }

        match worker.await {
            Ok(Ok(())) => {
                let buffer = self
                    .partial_reply(conversation_id)
                    .await
                    .unwrap_or_default();
                StreamOutcome::Completed(buffer)
            }
            Ok(Err(err)) => StreamOutcome::Failed(err),
            Err(err) => StreamOutcome::Failed(eyre::eyre!(err)),
        }
    }

    /// Replace the cached conversation list with a polled store snapshot.
    ///
    /// Streaming always wins over a stale poll: a conversation with an
    /// active generation, or with more messages locally than the snapshot
    /// carries, keeps its local copy. Conversations the snapshot does not
    /// know about are kept too — no delete operation exists, so a missing
    /// entry can only be a stale read.
    pub async fn apply_snapshot(&self, remote: Vec<Conversation>) {
        let streams = self.streams.lock().await;
        let mut convos = self.conversations.write().await;

        let mut next: HashMap<String, Conversation> = HashMap::with_capacity(remote.len());
        for incoming in remote {
            let id = incoming.id().to_string();
            let local = convos
                .get(&id)
                .filter(|local| streams.contains_key(&id) || local.len() > incoming.len());
            match local {
                Some(local) => next.insert(id, local.clone()),
                None => next.insert(id, incoming),
            };
        }
        for (id, local) in convos.iter() {
            next.entry(id.clone()).or_insert_with(|| local.clone());
        }
        *convos = next;
    }

    async fn push_fragment(&self, conversation_id: &str, text: &str) -> String {
        let mut streams = self.streams.lock().await;
        let buffer = streams.entry(conversation_id.to_string()).or_default();
        buffer.push_str(text);
        buffer.clone()
    }

    async fn clear_stream(&self, conversation_id: &str) {
        self.streams.lock().await.remove(conversation_id);
    }

    async fn commit_messages(&self, conversation_id: &str, messages: Vec<Message>) {
        let updated = {
            let mut convos = self.conversations.write().await;
            match convos.get_mut(conversation_id) {
                Some(convo) => {
                    convo.set_messages(messages);
                    Some(convo.clone())
                }
                None => None,
            }
        };
        if let Some(convo) = updated {
            self.publish(Event::ConversationUpdated(convo)).await;
        }
    }

    async fn publish(&self, event: Event) {
        if let Err(err) = self.event_tx.send(event).await {
            log::error!("Failed to publish event: {err}");
        }
    }

    async fn send_notice(&self, notice: NoticeMessage) {
        self.publish(Event::Notice(notice)).await;
    }
}
