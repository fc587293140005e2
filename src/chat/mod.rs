pub mod controller;
pub mod sync;

pub use controller::{ChatController, ChatError};
pub use sync::SyncService;
