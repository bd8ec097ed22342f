//! LlmClient trait definition

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{CompletionRequest, CompletionResponse, LlmError, StreamChunk};

/// Stateless LLM client - each call is independent
///
/// Conversation state lives in the request's message list, owned by the
/// driver; the client only performs transport. Implementations must
/// honour cancellation promptly when the runtime drops the call future.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a completion request and wait for the full response
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Streaming completion; chunks are sent to `chunk_tx` as they arrive
    /// and the final assembled response is returned.
    async fn stream(
        &self,
        request: CompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionResponse, LlmError>;
}

#[cfg(test)]
pub mod mock {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Scripted client for unit tests: returns canned responses in order
    pub struct MockLlmClient {
        responses: Vec<CompletionResponse>,
        call_count: AtomicUsize,
    }

    impl MockLlmClient {
        pub fn new(responses: Vec<CompletionResponse>) -> Self {
            Self {
                responses,
                call_count: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            self.responses
                .get(idx)
                .cloned()
                .ok_or_else(|| LlmError::InvalidResponse("mock response script exhausted".to_string()))
        }

        async fn stream(
            &self,
            request: CompletionRequest,
            chunk_tx: mpsc::Sender<StreamChunk>,
        ) -> Result<CompletionResponse, LlmError> {
            let response = self.complete(request).await?;
            if let Some(text) = &response.content {
                let _ = chunk_tx.send(StreamChunk::TextDelta(text.clone())).await;
            }
            let _ = chunk_tx
                .send(StreamChunk::MessageDone {
                    stop_reason: response.stop_reason,
                    usage: response.usage,
                })
                .await;
            Ok(response)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::llm::Message;

        fn request() -> CompletionRequest {
            CompletionRequest::new("system", vec![Message::user("hi")])
        }

        #[tokio::test]
        async fn test_mock_returns_in_order() {
            let client = MockLlmClient::new(vec![
                CompletionResponse::text("first"),
                CompletionResponse::text("second"),
            ]);

            assert_eq!(client.complete(request()).await.unwrap().content.unwrap(), "first");
            assert_eq!(client.complete(request()).await.unwrap().content.unwrap(), "second");
            assert_eq!(client.call_count(), 2);
        }

        #[tokio::test]
        async fn test_mock_exhaustion_errors() {
            let client = MockLlmClient::new(vec![]);
            assert!(client.complete(request()).await.is_err());
        }

        #[tokio::test]
        async fn test_mock_stream_forwards_chunks() {
            let client = MockLlmClient::new(vec![CompletionResponse::text("streamed")]);
            let (tx, mut rx) = mpsc::channel(8);

            let response = client.stream(request(), tx).await.unwrap();
            assert_eq!(response.content.as_deref(), Some("streamed"));

            assert!(matches!(rx.recv().await, Some(StreamChunk::TextDelta(t)) if t == "streamed"));
            assert!(matches!(rx.recv().await, Some(StreamChunk::MessageDone { .. })));
        }
    }
}
