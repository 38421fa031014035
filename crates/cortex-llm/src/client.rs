use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{ChatRequest, ChatResponse, StreamEvent};

/// Common interface over the chat providers (Anthropic, OpenAI, Google).
#[async_trait]
pub trait LlmClient: Send + Sync + std::fmt::Debug {
    /// Provider name for logging, key lookup and error messages.
    fn name(&self) -> &str;

    /// Send a chat request and wait for the full response.
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse>;

    /// Stream response events through a channel.
    /// Default: falls back to the non-streaming call, emits one TextDelta
    /// followed by MessageStop with the totals.
    async fn chat_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<()> {
        let resp = self.chat(req).await?;
        let _ = tx
            .send(StreamEvent::TextDelta {
                text: resp.content,
            })
            .await;
        let _ = tx
            .send(StreamEvent::MessageStop {
                model: resp.model,
                input_tokens: resp.input_tokens,
                output_tokens: resp.output_tokens,
                stop_reason: resp.stop_reason,
            })
            .await;
        Ok(())
    }
}
