//! JSON hub protocol records.
//!
//! Every record is a JSON object terminated by [`RECORD_SEPARATOR`]; one
//! WebSocket text frame may carry several records.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::warn;

use super::error::HubError;

pub const RECORD_SEPARATOR: char = '\u{1e}';

const INVOCATION: u8 = 1;
const STREAM_ITEM: u8 = 2;
const COMPLETION: u8 = 3;
const PING: u8 = 6;
const CLOSE: u8 = 7;

#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
    },
    StreamItem {
        invocation_id: String,
    },
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
    Ping,
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    Unknown(u8),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecord {
    #[serde(rename = "type")]
    kind: u8,
    invocation_id: Option<String>,
    target: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
    result: Option<Value>,
    error: Option<String>,
    #[serde(default)]
    allow_reconnect: bool,
}

#[derive(Deserialize)]
struct HandshakeResponse {
    error: Option<String>,
}

impl HubMessage {
    pub fn invocation(invocation_id: Option<String>, target: &str, arguments: Vec<Value>) -> Self {
        HubMessage::Invocation {
            invocation_id,
            target: target.to_string(),
            arguments,
        }
    }

    /// Serializes the record including its trailing separator.
    pub fn encode(&self) -> Result<String, HubError> {
        let value = match self {
            HubMessage::Invocation {
                invocation_id,
                target,
                arguments,
            } => {
                let mut record = Map::new();
                record.insert("type".into(), json!(INVOCATION));
                if let Some(id) = invocation_id {
                    record.insert("invocationId".into(), json!(id));
                }
                record.insert("target".into(), json!(target));
                record.insert("arguments".into(), Value::Array(arguments.clone()));
                Value::Object(record)
            }
            HubMessage::StreamItem { invocation_id } => {
                json!({ "type": STREAM_ITEM, "invocationId": invocation_id })
            }
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            } => {
                let mut record = Map::new();
                record.insert("type".into(), json!(COMPLETION));
                record.insert("invocationId".into(), json!(invocation_id));
                if let Some(error) = error {
                    record.insert("error".into(), json!(error));
                } else if let Some(result) = result {
                    record.insert("result".into(), result.clone());
                }
                Value::Object(record)
            }
            HubMessage::Ping => json!({ "type": PING }),
            HubMessage::Close {
                error,
                allow_reconnect,
            } => {
                let mut record = Map::new();
                record.insert("type".into(), json!(CLOSE));
                if let Some(error) = error {
                    record.insert("error".into(), json!(error));
                }
                if *allow_reconnect {
                    record.insert("allowReconnect".into(), json!(true));
                }
                Value::Object(record)
            }
            HubMessage::Unknown(kind) => json!({ "type": kind }),
        };
        let mut text = serde_json::to_string(&value)?;
        text.push(RECORD_SEPARATOR);
        Ok(text)
    }

    fn decode(record: &str) -> Result<Self, HubError> {
        let raw: RawRecord = serde_json::from_str(record)?;
        let message = match raw.kind {
            INVOCATION => HubMessage::Invocation {
                invocation_id: raw.invocation_id,
                target: raw.target.ok_or_else(|| missing("target"))?,
                arguments: raw.arguments,
            },
            STREAM_ITEM => HubMessage::StreamItem {
                invocation_id: raw.invocation_id.ok_or_else(|| missing("invocationId"))?,
            },
            COMPLETION => HubMessage::Completion {
                invocation_id: raw.invocation_id.ok_or_else(|| missing("invocationId"))?,
                result: raw.result,
                error: raw.error,
            },
            PING => HubMessage::Ping,
            CLOSE => HubMessage::Close {
                error: raw.error,
                allow_reconnect: raw.allow_reconnect,
            },
            other => HubMessage::Unknown(other),
        };
        Ok(message)
    }
}

fn missing(field: &'static str) -> HubError {
    HubError::Protocol(<serde_json::Error as serde::de::Error>::missing_field(field))
}

/// The first record a client sends after the socket opens.
pub fn handshake_request() -> String {
    let mut text = json!({ "protocol": "json", "version": 1 }).to_string();
    text.push(RECORD_SEPARATOR);
    text
}

/// Splits a frame into its records and decodes each. A malformed record is
/// logged and skipped; the rest of the frame still counts.
pub fn parse_frame(frame: &str) -> Vec<HubMessage> {
    frame
        .split(RECORD_SEPARATOR)
        .filter(|record| !record.trim().is_empty())
        .filter_map(|record| match HubMessage::decode(record) {
            Ok(message) => Some(message),
            Err(err) => {
                warn!(error = %err, %record, "dropping malformed hub record");
                None
            }
        })
        .collect()
}

/// Checks the server's handshake answer and returns any records that rode along
/// in the same frame.
pub fn parse_handshake(frame: &str) -> Result<Vec<HubMessage>, HubError> {
    let (head, rest) = frame
        .split_once(RECORD_SEPARATOR)
        .ok_or_else(|| HubError::Handshake("incomplete handshake response".into()))?;
    let response: HandshakeResponse = serde_json::from_str(head)?;
    if let Some(error) = response.error {
        return Err(HubError::Handshake(error));
    }
    Ok(parse_frame(rest))
}
