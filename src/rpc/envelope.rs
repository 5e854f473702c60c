//! Request and response envelopes exchanged with the backend.
//!
//! ```json
//! {"type":"request","method":"query","id":"steward-...","payload":{"content":"hi","intent":"ask"}}
//! {"type":"response","id":"steward-...","payload":{"content":"hello"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound request envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    /// Always `request`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Backend method (`query`, `embed`, `ping`, `status`).
    pub method: String,
    /// Correlation id echoed by the response.
    pub id: String,
    /// Method-specific payload.
    #[serde(default)]
    pub payload: Value,
}

impl Request {
    /// Build a request envelope.
    #[must_use]
    pub fn new(method: &str, id: String, payload: Value) -> Self {
        Self {
            kind: "request".into(),
            method: method.to_owned(),
            id,
            payload,
        }
    }
}

/// Discriminator of an inbound envelope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    /// A successful reply (or an intermediate stream chunk).
    Response,
    /// The backend rejected the request.
    Error,
    /// Last chunk of a streamed reply.
    Final,
}

/// Inbound response envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    /// Envelope kind.
    #[serde(rename = "type")]
    pub kind: ResponseKind,
    /// Correlation id of the originating request.
    pub id: String,
    /// Method-specific payload.
    #[serde(default)]
    pub payload: Value,
}

/// Text fields a `query` reply may carry.
///
/// Different backend versions populate different fields; the first
/// non-empty one in declaration order wins.
#[derive(Debug, Default, Deserialize)]
pub struct QueryReply {
    /// Primary answer.
    #[serde(default)]
    pub content: Option<String>,
    /// Chain-of-thought style answer.
    #[serde(default)]
    pub reasoning: Option<String>,
    /// Oldest field name.
    #[serde(default)]
    pub thought: Option<String>,
}

impl QueryReply {
    /// First populated text field.
    #[must_use]
    pub fn first_populated(&self) -> Option<&str> {
        [&self.content, &self.reasoning, &self.thought]
            .into_iter()
            .filter_map(Option::as_deref)
            .find(|text| !text.is_empty())
    }
}

/// Extract reply text from a `query` payload.
///
/// Order: `content`, `reasoning`, `thought`, a bare JSON string payload,
/// then the raw payload serialized back to JSON.
#[must_use]
pub fn reply_text(payload: &Value) -> String {
    if payload.is_object() {
        if let Ok(reply) = QueryReply::deserialize(payload) {
            if let Some(text) = reply.first_populated() {
                return text.to_owned();
            }
        }
    }
    match payload {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Text carried by one streamed chunk: `delta`, else `content`, else a bare
/// string payload.
#[must_use]
pub fn stream_delta(payload: &Value) -> Option<String> {
    if let Value::String(text) = payload {
        return Some(text.clone());
    }
    ["delta", "content"]
        .into_iter()
        .find_map(|key| payload.get(key).and_then(Value::as_str))
        .map(str::to_owned)
}

/// Human-readable message of an `error` envelope.
#[must_use]
pub fn error_message(payload: &Value) -> String {
    match payload {
        Value::String(text) => text.clone(),
        other => ["message", "error"]
            .into_iter()
            .find_map(|key| other.get(key).and_then(Value::as_str))
            .map_or_else(|| other.to_string(), str::to_owned),
    }
}
