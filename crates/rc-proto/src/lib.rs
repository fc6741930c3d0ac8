//! Wire types shared by the rc session client.
//!
//! Inbound frames on the event stream are [`SessionEvent`]s; outbound frames
//! are [`ClientMessage`]s. The session directory REST payloads live here too so
//! the HTTP client and any test servers agree on field names.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// One event delivered on `/ws/events/{session_id}`.
///
/// `seq` and `kind` are required; a frame missing either (or carrying a
/// non-integer `seq`) fails to deserialize and is dropped by the client.
/// The descriptive fields fall back to empty values when absent, `null` or of
/// the wrong type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    #[serde(default, deserialize_with = "lenient")]
    pub session_id: String,
    #[serde(default, deserialize_with = "lenient")]
    pub engine: String,
    #[serde(default, deserialize_with = "lenient")]
    pub ts_ms: i64,
    pub seq: u64,
    pub kind: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl SessionEvent {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn event_kind(&self) -> EventKind {
        EventKind::parse(&self.kind)
    }

    pub fn payload(&self) -> Payload<'_> {
        Payload::new(self.payload.as_ref())
    }
}

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Fixed event vocabulary. Anything else is carried through as [`EventKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Status,
    Error,
    Assistant,
    User,
    ThinkingDelta,
    ThinkingDone,
    ToolCall,
    ToolOutput,
    Other(String),
}

impl EventKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "status" => EventKind::Status,
            "error" => EventKind::Error,
            "assistant" => EventKind::Assistant,
            "user" => EventKind::User,
            "thinking_delta" => EventKind::ThinkingDelta,
            "thinking_done" => EventKind::ThinkingDone,
            "tool_call" => EventKind::ToolCall,
            "tool_output" => EventKind::ToolOutput,
            other => EventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Status => "status",
            EventKind::Error => "error",
            EventKind::Assistant => "assistant",
            EventKind::User => "user",
            EventKind::ThinkingDelta => "thinking_delta",
            EventKind::ThinkingDone => "thinking_done",
            EventKind::ToolCall => "tool_call",
            EventKind::ToolOutput => "tool_output",
            EventKind::Other(raw) => raw.as_str(),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view over an event payload.
///
/// Accessors never fail: a missing payload, a non-object payload, a missing key
/// or a value of the wrong type all read as the empty default.
#[derive(Debug, Clone, Copy)]
pub struct Payload<'a> {
    fields: Option<&'a Map<String, Value>>,
    raw: Option<&'a Value>,
}

impl<'a> Payload<'a> {
    pub fn new(raw: Option<&'a Value>) -> Self {
        Self {
            fields: raw.and_then(Value::as_object),
            raw,
        }
    }

    /// String field, or `""` when absent or not a string.
    pub fn text(&self, key: &str) -> &'a str {
        self.fields
            .and_then(|fields| fields.get(key))
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    /// Integer field, or `None` when absent or not an integer.
    pub fn integer(&self, key: &str) -> Option<i64> {
        self.fields
            .and_then(|fields| fields.get(key))
            .and_then(Value::as_i64)
    }

    /// The payload exactly as received (`Value::Null` when absent).
    pub fn raw(&self) -> Value {
        self.raw.cloned().unwrap_or(Value::Null)
    }
}

/// Frames the client writes to the event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Input { data: String },
    Resize { cols: u16, rows: u16 },
}

impl ClientMessage {
    pub fn input(data: impl Into<String>) -> Self {
        ClientMessage::Input { data: data.into() }
    }

    pub fn resize(cols: u16, rows: u16) -> Self {
        ClientMessage::Resize { cols, rows }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Session metadata as reported by the session directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub engine: String,
    #[serde(default)]
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seq: Option<u64>,
    #[serde(default)]
    pub created: String,
}

impl SessionInfo {
    pub fn is_exited(&self) -> bool {
        self.state == "exited"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub engine: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "workspacePath", default)]
    pub workspace_path: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub args: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TicketResponse {
    #[serde(default)]
    pub ticket: Option<String>,
    #[serde(default)]
    pub expires_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorEnvelope {
    #[serde(default)]
    pub error: Option<ApiErrorPayload>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorPayload {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

impl ApiErrorPayload {
    /// `message · Hint: hint · request_id=id`, skipping blank parts.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(message) = self.message.as_deref().filter(|s| !s.trim().is_empty()) {
            parts.push(message.to_string());
        }
        if let Some(hint) = self.hint.as_deref().filter(|s| !s.trim().is_empty()) {
            parts.push(format!("Hint: {hint}"));
        }
        if let Some(id) = self.request_id.as_deref().filter(|s| !s.trim().is_empty()) {
            parts.push(format!("request_id={id}"));
        }
        parts.join(" · ")
    }
}
