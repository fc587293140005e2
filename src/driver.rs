use std::io::Write as _;
use std::sync::Arc;

use eyre::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chat::{ChatController, ChatError};
use crate::config::constants::QUICK_PROMPTS;
use crate::models::{Event, NoticeKind, Role};
use crate::store::NewConversation;
use crate::youtube::{MetadataClient, TranscriptClient};

/// Thin line-oriented front end for the chat pipeline. Commands start with
/// a colon; anything else goes to the selected conversation. Stream
/// progress is printed as fragments arrive, no styling.
pub struct Driver {
    owner: String,
    controller: Arc<ChatController>,
    transcripts: Arc<TranscriptClient>,
    metadata: Arc<MetadataClient>,
    event_rx: mpsc::UnboundedReceiver<Event>,
    cancel_token: CancellationToken,
    current: Option<String>,
    printed: usize,
}

impl Driver {
    pub fn new(
        owner: impl Into<String>,
        controller: Arc<ChatController>,
        transcripts: Arc<TranscriptClient>,
        metadata: Arc<MetadataClient>,
        event_rx: mpsc::UnboundedReceiver<Event>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            owner: owner.into(),
            controller,
            transcripts,
            metadata,
            event_rx,
            cancel_token,
            current: None,
            printed: 0,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        self.print_conversations().await;
        print_prompt();

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => return Ok(()),

                line = lines.next_line() => {
                    let Some(line) = line? else { return Ok(()) };
                    if !self.handle_line(line.trim()).await {
                        return Ok(());
                    }
                }

                event = self.event_rx.recv() => {
                    if let Some(event) = event {
                        self.handle_event(event);
                    }
                }
            }
        }
    }

    async fn handle_line(&mut self, line: &str) -> bool {
        if line.is_empty() {
            print_prompt();
            return true;
        }

        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((cmd, rest)) => (cmd, rest.trim()),
            None => (line, ""),
        };

        match command {
            ":quit" | ":q" => return false,

            ":list" => {
                self.print_conversations().await;
                print_prompt();
            }

            ":open" => {
                match rest.parse::<usize>() {
                    Ok(n) => self.open(n).await,
                    Err(_) => println!("Usage: :open <n>"),
                }
                print_prompt();
            }

            ":prompts" => {
                for (i, prompt) in QUICK_PROMPTS.iter().enumerate() {
                    println!("  {}. {prompt}", i + 1);
                }
                print_prompt();
            }

            ":p" => match rest.parse::<usize>() {
                Ok(n) if (1..=QUICK_PROMPTS.len()).contains(&n) => {
                    self.submit(QUICK_PROMPTS[n - 1].to_string());
                }
                _ => {
                    println!("Usage: :p <1-{}>", QUICK_PROMPTS.len());
                    print_prompt();
                }
            },

            ":video" => {
                if rest.is_empty() {
                    println!("Usage: :video <id> [url]");
                    print_prompt();
                } else {
                    let mut parts = rest.split_whitespace();
                    let video_id = parts.next().unwrap_or_default().to_string();
                    let url = parts.next().map(|s| s.to_string());
                    self.submit_video(video_id, url);
                }
            }

            _ if command.starts_with(':') => {
                println!(
                    "Unknown command {command}. Commands: :video :open :list :prompts :p :quit"
                );
                print_prompt();
            }

            _ => self.submit(line.to_string()),
        }

        true
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::StreamingUpdate {
                conversation_id,
                buffer,
            } => {
                if self.current.as_deref() != Some(conversation_id.as_str()) {
                    return;
                }
                // The buffer is cumulative; print only the unseen suffix.
                if buffer.len() < self.printed {
                    self.printed = 0;
                }
                print!("{}", &buffer[self.printed..]);
                let _ = std::io::stdout().flush();
                self.printed = buffer.len();
            }

            Event::ConversationUpdated(convo) => {
                let is_current = self.current.as_deref() == Some(convo.id());
                let reply_done = convo
                    .last_message()
                    .map(|msg| msg.role() == Role::Assistant)
                    .unwrap_or(false);
                if is_current && reply_done && self.printed > 0 {
                    self.printed = 0;
                    println!();
                    print_prompt();
                }
            }

            Event::ConversationCreated(convo) => {
                println!("Created conversation for \"{}\"", convo.video_title());
                self.current = Some(convo.id().to_string());
                self.printed = 0;
                print_prompt();
            }

            Event::Notice(notice) => {
                match notice.kind() {
                    NoticeKind::Error => eprintln!("error: {}", notice.message()),
                    NoticeKind::Warning => eprintln!("warning: {}", notice.message()),
                    NoticeKind::Info => println!("{}", notice.message()),
                }
                print_prompt();
            }

            Event::ConversationsRefreshed(_) | Event::GeneratorResponse(_) => {}
        }
    }

    async fn print_conversations(&self) {
        let conversations = self.controller.conversations().await;
        if conversations.is_empty() {
            println!("No conversations yet. Submit a video with :video <id>.");
            return;
        }
        println!("Conversations:");
        for (i, convo) in conversations.iter().enumerate() {
            // The seeded transcript message is not part of the visible chat.
            println!(
                "  {}. {} ({} messages)",
                i + 1,
                convo.video_title(),
                convo.len().saturating_sub(1)
            );
        }
        println!("Open one with :open <n>.");
    }

    async fn open(&mut self, index: usize) {
        let conversations = self.controller.conversations().await;
        match conversations.get(index.wrapping_sub(1)) {
            Some(convo) => {
                self.current = Some(convo.id().to_string());
                self.printed = 0;
                println!("Opened \"{}\"", convo.video_title());
                for msg in convo.messages().iter().skip(1) {
                    println!("{}: {}", msg.role(), msg.content());
                }
            }
            None => println!("No such conversation."),
        }
    }

    fn submit(&self, text: String) {
        let Some(conversation_id) = self.current.clone() else {
            println!("No conversation selected. Submit a video with :video <id> first.");
            print_prompt();
            return;
        };
        let controller = Arc::clone(&self.controller);
        tokio::spawn(async move {
            if let Err(ChatError::Busy(_)) = controller
                .submit_user_message(&conversation_id, &text)
                .await
            {
                println!("Still replying to the previous message, hold on.");
            }
        });
    }

    fn submit_video(&self, video_id: String, url: Option<String>) {
        let controller = Arc::clone(&self.controller);
        let transcripts = Arc::clone(&self.transcripts);
        let metadata = Arc::clone(&self.metadata);
        let owner = self.owner.clone();

        println!("Fetching transcript for {video_id}...");
        tokio::spawn(async move {
            let video_url =
                url.unwrap_or_else(|| format!("https://www.youtube.com/watch?v={video_id}"));

            // The conversation is created only when both lookups resolve.
            let fetched = tokio::try_join!(metadata.fetch(&video_id), async {
                transcripts.fetch(&video_id).await.map_err(eyre::Report::new)
            });

            match fetched {
                Ok((metadata, transcript)) => {
                    let request = NewConversation {
                        owner_id: owner,
                        video_id: video_id.clone(),
                        video_title: metadata.title,
                        video_thumbnail: metadata.thumbnail,
                        video_url,
                        transcript: transcript.transcript,
                    };
                    if let Err(err) = controller.create_conversation(request).await {
                        println!("Failed to create the conversation: {err}");
                    }
                }
                Err(err) => println!("Failed to process video {video_id}: {err}"),
            }
        });
    }
}

fn print_prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}
