pub mod conversation;
pub mod event;
pub mod generator;
pub mod message;
pub mod notice;

pub use conversation::Conversation;
pub use event::{ArcEventTx, Event, EventTx};
pub use generator::{GeneratePrompt, GeneratorResponse};
pub use message::{Message, Role};
pub use notice::*;
