pub mod gemini;

pub use gemini::Gemini;

#[cfg(test)]
use mockall::{automock, predicate::*};

use std::{sync::Arc, time::Duration};

use crate::{
    config::GeneratorConfig,
    models::{ArcEventTx, GeneratePrompt},
};
use async_trait::async_trait;
use eyre::Result;

/// Streaming response generator: turns a prompt plus history into an
/// ordered, finite sequence of text fragments delivered over the event
/// channel. Failures are returned to the caller — a generator never turns
/// an error into reply text; translating failure into a user-visible
/// fallback is the controller's job alone.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait Generator {
    fn name(&self) -> &str;
    async fn generate(&self, prompt: GeneratePrompt, event_tx: ArcEventTx) -> Result<()>;
}

pub type ArcGenerator = Arc<dyn Generator + Send + Sync>;

pub fn new_generator(config: &GeneratorConfig) -> Result<ArcGenerator> {
    let mut gemini = Gemini::default()
        .with_endpoint(&config.endpoint)
        .with_model(&config.model);

    if let Some(key) = config.api_key.as_deref() {
        gemini = gemini.with_api_key(key);
    }
    if let Some(secs) = config.timeout_secs {
        gemini = gemini.with_timeout(Duration::from_secs(secs));
    }

    Ok(Arc::new(gemini))
}
