use anyhow::Context;
use domain::models::{ChatRequest, ChatResponse, SessionCreated};
use domain::ports::ChatApi;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use shared::types::Result;
use shared::utils::join_url;
use std::sync::Arc;

/// HTTP client for the `/chat` endpoints. One attempt per call, no timeout.
#[derive(Clone)]
pub struct ChatClient {
    client: Arc<Client>,
    base_url: String,
}

impl ChatClient {
    pub fn new(api_url: &str) -> Self {
        Self {
            client: Arc::new(Client::new()),
            base_url: join_url(api_url, "chat"),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn create_session(&self) -> Result<String> {
        let url = format!("{}/session", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let created: SessionCreated = decode(response).await?;
        Ok(created.session_id)
    }

    pub async fn send_message(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/message", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;
        decode(response).await
    }

    pub async fn session_history(&self, session_id: &str) -> Result<Vec<ChatResponse>> {
        let mut url = Url::parse(&format!("{}/history", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("chat API url cannot carry a path: {}", self.base_url))?
            .push(session_id);
        let response = self.client.get(url).send().await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(anyhow::anyhow!("chat API error ({}): {}", status, text));
    }
    serde_json::from_str(&text).with_context(|| format!("unexpected chat API response: {}", text))
}

impl ChatApi for ChatClient {
    async fn create_session(&self) -> Result<String> {
        ChatClient::create_session(self).await
    }

    async fn send_message(&self, request: ChatRequest) -> Result<ChatResponse> {
        ChatClient::send_message(self, &request).await
    }

    async fn session_history(&self, session_id: &str) -> Result<Vec<ChatResponse>> {
        ChatClient::session_history(self, session_id).await
    }
}
