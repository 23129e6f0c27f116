use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// A retrieved document fragment cited by an assistant reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSource {
    pub file_name: String,
    pub content: String,
    pub relevance_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default = "new_id")]
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub is_user: bool,
    #[serde(default = "Utc::now", deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<DocumentSource>>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(content.into(), true, None)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(content.into(), false, None)
    }

    pub fn assistant_with_sources(content: impl Into<String>, sources: Vec<DocumentSource>) -> Self {
        Self::new(content.into(), false, Some(sources))
    }

    fn new(content: String, is_user: bool, sources: Option<Vec<DocumentSource>>) -> Self {
        Self {
            id: new_id(),
            content,
            is_user,
            timestamp: Utc::now(),
            sources,
        }
    }

    pub fn sources(&self) -> &[DocumentSource] {
        self.sources.as_deref().unwrap_or(&[])
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// RFC 3339, or an offset-less date-time taken as UTC.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ChatRequest {
    /// An empty session id means none has been issued yet; it is left off the wire.
    pub fn new(message: impl Into<String>, session_id: &str) -> Self {
        Self {
            message: message.into(),
            session_id: (!session_id.is_empty()).then(|| session_id.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub message: String,
    #[serde(default)]
    pub sources: Vec<DocumentSource>,
    #[serde(default)]
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreated {
    pub session_id: String,
}
