use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use eyre::{Result, bail};
use tokio::sync::Notify;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_util::sync::CancellationToken;

use crate::generator::Generator;
use crate::models::{GeneratorResponse, NoticeKind, Role};
use crate::store::MockStore;

use super::*;

/// Generator double that replays a fixed fragment script. An optional gate
/// keeps the generation open until the test releases it; `fail` makes the
/// generation error out after the scripted fragments.
#[derive(Default)]
struct ScriptedGenerator {
    fragments: Vec<&'static str>,
    fail: bool,
    gate: Option<Arc<Notify>>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _prompt: GeneratePrompt, event_tx: ArcEventTx) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for fragment in &self.fragments {
            event_tx
                .send(Event::GeneratorResponse(GeneratorResponse {
                    id: "generation".to_string(),
                    text: fragment.to_string(),
                    done: false,
                }))
                .await?;
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail {
            bail!("scripted generator failure");
        }
        event_tx
            .send(Event::GeneratorResponse(GeneratorResponse {
                id: "generation".to_string(),
                text: String::new(),
                done: true,
            }))
            .await?;
        Ok(())
    }
}

fn seeded_convo(id: &str) -> Conversation {
    Conversation::default()
        .with_id(id)
        .with_owner_id("local")
        .with_video_id("abc123")
        .with_video_title("Test video")
        .with_transcript("Hello world. This is a test.")
}

fn convo_with_extra(id: &str, extra: usize) -> Conversation {
    let mut convo = seeded_convo(id);
    for i in 0..extra {
        convo.append_message(Message::new_user(format!("m{i}")));
    }
    convo
}

async fn new_controller(
    store: MockStore,
    generator: ScriptedGenerator,
    token: CancellationToken,
) -> (Arc<ChatController>, UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    let sender: ArcEventTx = Arc::new(tx);
    let controller = Arc::new(ChatController::new(
        "local",
        Arc::new(store),
        Arc::new(generator),
        sender,
        token,
    ));
    controller.bootstrap().await.expect("failed to bootstrap");
    (controller, rx)
}

fn streaming_buffers(rx: &mut UnboundedReceiver<Event>) -> Vec<String> {
    let mut buffers = vec![];
    while let Ok(event) = rx.try_recv() {
        if let Event::StreamingUpdate { buffer, .. } = event {
            buffers.push(buffer);
        }
    }
    buffers
}

fn has_error_notice(rx: &mut UnboundedReceiver<Event>) -> bool {
    while let Ok(event) = rx.try_recv() {
        if let Event::Notice(notice) = event {
            if notice.kind() == NoticeKind::Error {
                return true;
            }
        }
    }
    false
}

async fn wait_for_partial(controller: &ChatController, id: &str, want: &str) {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        if controller.partial_reply(id).await.as_deref() == Some(want) {
            return;
        }
        if std::time::Instant::now() > deadline {
            panic!("timed out waiting for partial reply {want:?}");
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_submit_persists_user_message_then_reply() {
    let convo = seeded_convo("c1");
    let mut store = MockStore::new();
    store
        .expect_list_conversations()
        .returning(move |_| Ok(vec![convo.clone()]));

    let mut seq = mockall::Sequence::new();
    store
        .expect_replace_messages()
        .times(1)
        .in_sequence(&mut seq)
        .withf(|id, msgs| {
            id == "c1"
                && msgs.len() == 2
                && msgs[1].role() == Role::User
                && msgs[1].content() == "Summarize"
        })
        .returning(|_, _| Ok(()));
    store
        .expect_replace_messages()
        .times(1)
        .in_sequence(&mut seq)
        .withf(|id, msgs| {
            id == "c1"
                && msgs.len() == 3
                && msgs[2].role() == Role::Assistant
                && msgs[2].content() == "Summary: Hello world test."
        })
        .returning(|_, _| Ok(()));

    let generator = ScriptedGenerator {
        fragments: vec!["Sum", "mary: ", "Hello world test."],
        ..Default::default()
    };
    let (controller, mut rx) = new_controller(store, generator, CancellationToken::new()).await;

    controller
        .submit_user_message("c1", "Summarize")
        .await
        .expect("submit failed");

    let convo = controller.get("c1").await.expect("conversation missing");
    assert_eq!(convo.len(), 3);
    assert_eq!(convo.messages()[0].role(), Role::System);
    assert_eq!(convo.messages()[1].content(), "Summarize");
    assert_eq!(convo.messages()[2].content(), "Summary: Hello world test.");
    assert!(!controller.is_streaming("c1").await);
    assert_eq!(controller.partial_reply("c1").await, None);

    // Each fragment publishes the accumulated buffer, never a delta.
    let buffers = streaming_buffers(&mut rx);
    assert_eq!(
        buffers,
        vec!["Sum", "Summary: ", "Summary: Hello world test."]
    );
}

#[tokio::test]
async fn test_submit_appends_fallback_when_generation_fails() {
    let convo = seeded_convo("c1");
    let mut store = MockStore::new();
    store
        .expect_list_conversations()
        .returning(move |_| Ok(vec![convo.clone()]));

    let mut seq = mockall::Sequence::new();
    store
        .expect_replace_messages()
        .times(1)
        .in_sequence(&mut seq)
        .withf(|_, msgs| msgs.len() == 2 && msgs[1].role() == Role::User)
        .returning(|_, _| Ok(()));
    // The user message stays; the partial reply is replaced by the fixed
    // fallback text.
    store
        .expect_replace_messages()
        .times(1)
        .in_sequence(&mut seq)
        .withf(|_, msgs| {
            msgs.len() == 3
                && msgs[2].role() == Role::Assistant
                && msgs[2].content() == FALLBACK_MESSAGE
        })
        .returning(|_, _| Ok(()));

    let generator = ScriptedGenerator {
        fragments: vec!["Partial "],
        fail: true,
        ..Default::default()
    };
    let (controller, _rx) = new_controller(store, generator, CancellationToken::new()).await;

    controller
        .submit_user_message("c1", "Summarize")
        .await
        .expect("submit failed");

    let convo = controller.get("c1").await.expect("conversation missing");
    assert_eq!(convo.len(), 3);
    assert_eq!(convo.messages()[2].content(), FALLBACK_MESSAGE);
    assert!(!controller.is_streaming("c1").await);
    assert_eq!(controller.partial_reply("c1").await, None);
}

#[tokio::test]
async fn test_submit_rejects_second_stream_for_same_conversation() {
    let convo = seeded_convo("c1");
    let mut store = MockStore::new();
    store
        .expect_list_conversations()
        .returning(move |_| Ok(vec![convo.clone()]));
    store
        .expect_replace_messages()
        .times(2)
        .returning(|_, _| Ok(()));

    let gate = Arc::new(Notify::new());
    let generator = ScriptedGenerator {
        fragments: vec!["Partial "],
        gate: Some(Arc::clone(&gate)),
        ..Default::default()
    };
    let (controller, _rx) = new_controller(store, generator, CancellationToken::new()).await;

    let background = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.submit_user_message("c1", "Summarize").await })
    };
    wait_for_partial(&controller, "c1", "Partial ").await;

    let err = controller
        .submit_user_message("c1", "Again")
        .await
        .expect_err("expected a busy error");
    assert!(matches!(err, ChatError::Busy(id) if id == "c1"));

    gate.notify_one();
    background
        .await
        .expect("join failed")
        .expect("submit failed");
    assert!(!controller.is_streaming("c1").await);
}

#[tokio::test]
async fn test_poll_refresh_never_touches_streaming_state() {
    let convo = seeded_convo("c1");
    let mut store = MockStore::new();
    store
        .expect_list_conversations()
        .returning(move |_| Ok(vec![convo.clone()]));
    store
        .expect_replace_messages()
        .times(2)
        .returning(|_, _| Ok(()));

    let gate = Arc::new(Notify::new());
    let generator = ScriptedGenerator {
        fragments: vec!["Partial "],
        gate: Some(Arc::clone(&gate)),
        ..Default::default()
    };
    let (controller, _rx) = new_controller(store, generator, CancellationToken::new()).await;

    let background = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.submit_user_message("c1", "Summarize").await })
    };
    wait_for_partial(&controller, "c1", "Partial ").await;

    // A stale poll snapshot lacking the in-flight user message must not
    // regress the conversation nor touch the partial buffer.
    controller.apply_snapshot(vec![seeded_convo("c1")]).await;

    assert_eq!(
        controller.partial_reply("c1").await.as_deref(),
        Some("Partial ")
    );
    assert_eq!(controller.get("c1").await.unwrap().len(), 2);

    gate.notify_one();
    background
        .await
        .expect("join failed")
        .expect("submit failed");
    assert_eq!(controller.get("c1").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_failed_user_persist_rolls_back_the_append() {
    let convo = seeded_convo("c1");
    let mut store = MockStore::new();
    store
        .expect_list_conversations()
        .returning(move |_| Ok(vec![convo.clone()]));
    store
        .expect_replace_messages()
        .times(1)
        .returning(|_, _| Err(eyre::eyre!("store offline")));

    let calls = Arc::new(AtomicUsize::new(0));
    let generator = ScriptedGenerator {
        fragments: vec!["never sent"],
        calls: Arc::clone(&calls),
        ..Default::default()
    };
    let (controller, mut rx) = new_controller(store, generator, CancellationToken::new()).await;

    controller
        .submit_user_message("c1", "Summarize")
        .await
        .expect("submit failed");

    // Local cache and store stay consistent: no optimistic user message,
    // no generation, and the user is told about the failure.
    assert_eq!(controller.get("c1").await.unwrap().len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!controller.is_streaming("c1").await);
    assert!(has_error_notice(&mut rx));
}

#[tokio::test]
async fn test_failed_reply_persist_keeps_optimistic_local_state() {
    let convo = seeded_convo("c1");
    let mut store = MockStore::new();
    store
        .expect_list_conversations()
        .returning(move |_| Ok(vec![convo.clone()]));

    let mut seq = mockall::Sequence::new();
    store
        .expect_replace_messages()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(()));
    store
        .expect_replace_messages()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Err(eyre::eyre!("store offline")));

    let generator = ScriptedGenerator {
        fragments: vec!["Sum", "mary"],
        ..Default::default()
    };
    let (controller, _rx) = new_controller(store, generator, CancellationToken::new()).await;

    controller
        .submit_user_message("c1", "Summarize")
        .await
        .expect("submit failed");

    // The reply already streamed to the user, so the local copy keeps it
    // even though the store write failed.
    let convo = controller.get("c1").await.expect("conversation missing");
    assert_eq!(convo.len(), 3);
    assert_eq!(convo.messages()[2].content(), "Summary");
    assert!(!controller.is_streaming("c1").await);
}

#[tokio::test]
async fn test_submit_for_unknown_conversation_is_a_noop() {
    let mut store = MockStore::new();
    store.expect_list_conversations().returning(|_| Ok(vec![]));
    store.expect_replace_messages().never();

    let calls = Arc::new(AtomicUsize::new(0));
    let generator = ScriptedGenerator {
        calls: Arc::clone(&calls),
        ..Default::default()
    };
    let (controller, _rx) = new_controller(store, generator, CancellationToken::new()).await;

    controller
        .submit_user_message("ghost", "hello")
        .await
        .expect("submit failed");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_submit_ignores_blank_text() {
    let convo = seeded_convo("c1");
    let mut store = MockStore::new();
    store
        .expect_list_conversations()
        .returning(move |_| Ok(vec![convo.clone()]));
    store.expect_replace_messages().never();

    let generator = ScriptedGenerator::default();
    let (controller, _rx) = new_controller(store, generator, CancellationToken::new()).await;

    controller
        .submit_user_message("c1", "   \n ")
        .await
        .expect("submit failed");
    assert_eq!(controller.get("c1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_apply_snapshot_merges_without_shrinking() {
    let mut store = MockStore::new();
    let bootstrap = vec![convo_with_extra("c1", 0), convo_with_extra("c2", 2)];
    store
        .expect_list_conversations()
        .returning(move |_| Ok(bootstrap.clone()));

    let generator = ScriptedGenerator::default();
    let (controller, _rx) = new_controller(store, generator, CancellationToken::new()).await;

    controller
        .apply_snapshot(vec![
            // Newer remote state for c1: applied wholesale.
            convo_with_extra("c1", 2),
            // Stale remote state for c2: a snapshot never shrinks a
            // conversation.
            convo_with_extra("c2", 1),
            // Unknown conversation from another session: added.
            convo_with_extra("c3", 0),
        ])
        .await;

    assert_eq!(controller.get("c1").await.unwrap().len(), 3);
    assert_eq!(controller.get("c2").await.unwrap().len(), 3);
    assert_eq!(controller.get("c3").await.unwrap().len(), 1);

    // A snapshot missing a known conversation keeps the local copy; there
    // is no delete operation, so the gap can only be a stale read.
    controller.apply_snapshot(vec![]).await;
    assert!(controller.get("c1").await.is_some());
    assert!(controller.get("c2").await.is_some());
}

#[tokio::test]
async fn test_cancellation_stops_the_stream() {
    let convo = seeded_convo("c1");
    let mut store = MockStore::new();
    store
        .expect_list_conversations()
        .returning(move |_| Ok(vec![convo.clone()]));
    // Only the user-message write happens; the reply never completes.
    store
        .expect_replace_messages()
        .times(1)
        .returning(|_, _| Ok(()));

    let gate = Arc::new(Notify::new());
    let generator = ScriptedGenerator {
        fragments: vec!["Partial "],
        gate: Some(Arc::clone(&gate)),
        ..Default::default()
    };
    let token = CancellationToken::new();
    let (controller, _rx) = new_controller(store, generator, token.clone()).await;

    let background = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.submit_user_message("c1", "Summarize").await })
    };
    wait_for_partial(&controller, "c1", "Partial ").await;

    token.cancel();
    background
        .await
        .expect("join failed")
        .expect("submit failed");

    assert!(!controller.is_streaming("c1").await);
    assert_eq!(controller.partial_reply("c1").await, None);
    assert_eq!(controller.get("c1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_create_conversation_caches_and_notifies() {
    let mut store = MockStore::new();
    store.expect_list_conversations().returning(|_| Ok(vec![]));
    store
        .expect_create_conversation()
        .times(1)
        .withf(|req| req.owner_id == "local" && req.video_id == "abc123")
        .returning(|req| {
            Ok(Conversation::default()
                .with_id("new-id")
                .with_owner_id(&req.owner_id)
                .with_video_id(&req.video_id)
                .with_video_title(&req.video_title)
                .with_transcript(&req.transcript))
        });

    let generator = ScriptedGenerator::default();
    let (controller, mut rx) = new_controller(store, generator, CancellationToken::new()).await;

    let convo = controller
        .create_conversation(NewConversation {
            owner_id: "local".to_string(),
            video_id: "abc123".to_string(),
            video_title: "Test video".to_string(),
            video_thumbnail: "https://i.ytimg.com/vi/abc123/hqdefault.jpg".to_string(),
            video_url: "https://www.youtube.com/watch?v=abc123".to_string(),
            transcript: "Hello world. This is a test.".to_string(),
        })
        .await
        .expect("failed to create conversation");

    assert_eq!(convo.id(), "new-id");
    assert_eq!(convo.messages()[0].role(), Role::System);
    assert!(controller.get("new-id").await.is_some());

    let created = loop {
        match rx.try_recv().expect("missing created event") {
            Event::ConversationCreated(convo) => break convo,
            _ => continue,
        }
    };
    assert_eq!(created.id(), "new-id");
}
