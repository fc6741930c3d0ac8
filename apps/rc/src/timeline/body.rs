use rc_proto::{EventKind, SessionEvent};
use serde_json::Value;

/// Per-kind view of an event payload. Missing or mistyped fields decode as
/// empty values.
#[derive(Debug, Clone, PartialEq)]
pub enum EventBody {
    Status { state: String, exit_code: Option<i64> },
    Error { message: String },
    Assistant { data: String },
    User,
    ThinkingDelta { delta: String },
    ThinkingDone,
    ToolCall(Value),
    ToolOutput(Value),
    Unknown(String),
}

impl EventBody {
    pub fn decode(event: &SessionEvent) -> Self {
        let payload = event.payload();
        match event.event_kind() {
            EventKind::Status => EventBody::Status {
                state: payload.text("state").to_string(),
                exit_code: payload.integer("exit_code"),
            },
            EventKind::Error => {
                let message = match payload.text("message") {
                    "" => payload.text("data"),
                    message => message,
                };
                EventBody::Error {
                    message: message.to_string(),
                }
            }
            EventKind::Assistant => EventBody::Assistant {
                data: payload.text("data").to_string(),
            },
            EventKind::User => EventBody::User,
            EventKind::ThinkingDelta => EventBody::ThinkingDelta {
                delta: payload.text("delta").to_string(),
            },
            EventKind::ThinkingDone => EventBody::ThinkingDone,
            EventKind::ToolCall => EventBody::ToolCall(payload.raw()),
            EventKind::ToolOutput => EventBody::ToolOutput(payload.raw()),
            EventKind::Other(kind) => EventBody::Unknown(kind),
        }
    }

    /// Whether this is a `status` event reporting the remote process has exited.
    pub fn is_terminal_status(&self) -> bool {
        matches!(self, EventBody::Status { state, .. } if state == "exited")
    }
}

/// `state`, suffixed with ` (exit N)` when an exit code is present.
pub fn status_text(state: &str, exit_code: Option<i64>) -> String {
    match exit_code {
        Some(code) if state.is_empty() => format!("(exit {code})"),
        Some(code) => format!("{state} (exit {code})"),
        None => state.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(kind: &str, payload: Value) -> SessionEvent {
        SessionEvent {
            session_id: "s1".into(),
            engine: "shell".into(),
            ts_ms: 0,
            seq: 1,
            kind: kind.into(),
            payload: Some(payload),
        }
    }

    #[test]
    fn error_message_falls_back_to_data() {
        assert_eq!(
            EventBody::decode(&event("error", json!({"data": "boom"}))),
            EventBody::Error {
                message: "boom".into()
            }
        );
        assert_eq!(
            EventBody::decode(&event("error", json!({"message": "m", "data": "d"}))),
            EventBody::Error {
                message: "m".into()
            }
        );
    }

    #[test]
    fn status_text_formats_exit_code() {
        assert_eq!(status_text("running", None), "running");
        assert_eq!(status_text("exited", Some(2)), "exited (exit 2)");
        assert_eq!(status_text("", Some(0)), "(exit 0)");
    }

    #[test]
    fn exited_status_is_terminal() {
        let body = EventBody::decode(&event("status", json!({"state": "exited", "exit_code": 0})));
        assert!(body.is_terminal_status());
        let running = EventBody::decode(&event("status", json!({"state": "running"})));
        assert!(!running.is_terminal_status());
    }

    #[test]
    fn tool_payloads_are_kept_raw() {
        let payload = json!({"name": "grep", "args": ["-n", "foo"]});
        assert_eq!(
            EventBody::decode(&event("tool_call", payload.clone())),
            EventBody::ToolCall(payload)
        );
        assert_eq!(
            EventBody::decode(&event("heartbeat", json!({}))),
            EventBody::Unknown("heartbeat".into())
        );
    }
}
