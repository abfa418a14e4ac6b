//! Generator trait: the language-model capability behind answers.

use async_trait::async_trait;

/// Text-generation backend.
///
/// `Ok(None)` means the backend responded but produced no text; callers
/// substitute a sentinel answer. Transport and API failures are `Err`.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Model identifier, for logging.
    fn model_name(&self) -> &str;

    /// Complete `prompt` into an answer.
    async fn complete(&self, prompt: &str) -> anyhow::Result<Option<String>>;
}
