use crate::models::{ChatMessage, ChatRequest, ChatResponse};
use shared::types::Result;
use std::future::Future;
use tokio::sync::broadcast;

/// Request/response side of the chat backend.
pub trait ChatApi: Send + Sync + 'static {
    fn create_session(&self) -> impl Future<Output = Result<String>> + Send;

    fn send_message(&self, request: ChatRequest) -> impl Future<Output = Result<ChatResponse>> + Send;

    fn session_history(&self, session_id: &str) -> impl Future<Output = Result<Vec<ChatResponse>>> + Send;
}

/// Server-pushed chat messages. Subscribers only see emissions made after they
/// subscribed.
pub trait PushChannel: Send + Sync + 'static {
    fn subscribe(&self) -> broadcast::Receiver<ChatMessage>;

    /// Releases the underlying connection. Calling it again is harmless.
    fn disconnect(&self) -> impl Future<Output = ()> + Send;
}
