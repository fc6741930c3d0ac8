//! Folds accepted session events into a display-ready transcript.
//!
//! The visible timeline holds status, error, user and assistant items. Thinking
//! history and tool activity are kept beside it. Every application reports a
//! [`TimelineChange`] so sinks can render incrementally.

mod body;

pub use body::{EventBody, status_text};

use rc_proto::SessionEvent;
use serde_json::Value;
use std::collections::VecDeque;

pub const DEFAULT_MAX_ITEMS: usize = 2000;

/// Assistant chunks whose sequence numbers are at most this far apart are
/// coalesced into a single block.
pub const ASSISTANT_MERGE_WINDOW: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineConfig {
    pub max_items: usize,
    /// Cap on thinking history and tool logs. `None` keeps everything.
    pub side_log_limit: Option<usize>,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
            side_log_limit: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Status,
    Error,
    User,
    Assistant,
}

impl ItemKind {
    pub fn label(self) -> &'static str {
        match self {
            ItemKind::Status => "status",
            ItemKind::Error => "error",
            ItemKind::User => "user",
            ItemKind::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineItem {
    pub kind: ItemKind,
    pub ts_ms: i64,
    pub seq: u64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThinkingEntry {
    pub ts_ms: i64,
    pub seq: u64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolRecord {
    pub ts_ms: i64,
    pub seq: u64,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimelineChange {
    Appended(TimelineItem),
    /// Text appended in place onto the trailing assistant block.
    Extended { seq: u64, appended: String },
    /// New thinking text; the full live buffer is [`Timeline::thinking_live`].
    ThinkingProgress(String),
    ThinkingCommitted(ThinkingEntry),
    ToolCall(ToolRecord),
    ToolOutput(ToolRecord),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    config: TimelineConfig,
    items: VecDeque<TimelineItem>,
    thinking_live: String,
    thinking_history: VecDeque<ThinkingEntry>,
    tool_calls: VecDeque<ToolRecord>,
    tool_outputs: VecDeque<ToolRecord>,
}

impl Timeline {
    pub fn new(config: TimelineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> TimelineConfig {
        self.config
    }

    /// Applies one accepted event. Returns `None` when nothing visible changed
    /// (user echoes, unknown kinds, empty text).
    pub fn apply(&mut self, event: &SessionEvent) -> Option<TimelineChange> {
        match EventBody::decode(event) {
            EventBody::Status { state, exit_code } => {
                self.append(ItemKind::Status, event, status_text(&state, exit_code))
            }
            EventBody::Error { message } => self.append(ItemKind::Error, event, message),
            EventBody::Assistant { data } => self.apply_assistant(event, data),
            EventBody::ThinkingDelta { delta } => {
                if delta.is_empty() {
                    return None;
                }
                self.thinking_live.push_str(&delta);
                Some(TimelineChange::ThinkingProgress(delta))
            }
            EventBody::ThinkingDone => {
                if self.thinking_live.is_empty() {
                    return None;
                }
                let entry = ThinkingEntry {
                    ts_ms: event.ts_ms,
                    seq: event.seq,
                    text: std::mem::take(&mut self.thinking_live),
                };
                push_capped(
                    &mut self.thinking_history,
                    entry.clone(),
                    self.config.side_log_limit,
                );
                Some(TimelineChange::ThinkingCommitted(entry))
            }
            EventBody::ToolCall(payload) => {
                let record = tool_record(event, payload);
                push_capped(
                    &mut self.tool_calls,
                    record.clone(),
                    self.config.side_log_limit,
                );
                Some(TimelineChange::ToolCall(record))
            }
            EventBody::ToolOutput(payload) => {
                let record = tool_record(event, payload);
                push_capped(
                    &mut self.tool_outputs,
                    record.clone(),
                    self.config.side_log_limit,
                );
                Some(TimelineChange::ToolOutput(record))
            }
            EventBody::User | EventBody::Unknown(_) => None,
        }
    }

    /// Appends the optimistic echo of a line the user just sent.
    pub fn record_local_input(&mut self, text: &str, seq: u64, ts_ms: i64) -> TimelineChange {
        let item = TimelineItem {
            kind: ItemKind::User,
            ts_ms,
            seq,
            text: text.to_string(),
        };
        self.push_item(item.clone());
        TimelineChange::Appended(item)
    }

    pub fn items(&self) -> impl Iterator<Item = &TimelineItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn last(&self) -> Option<&TimelineItem> {
        self.items.back()
    }

    pub fn thinking_live(&self) -> &str {
        &self.thinking_live
    }

    pub fn thinking_history(&self) -> impl Iterator<Item = &ThinkingEntry> {
        self.thinking_history.iter()
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolRecord> {
        self.tool_calls.iter()
    }

    pub fn tool_outputs(&self) -> impl Iterator<Item = &ToolRecord> {
        self.tool_outputs.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.thinking_live.clear();
        self.thinking_history.clear();
        self.tool_calls.clear();
        self.tool_outputs.clear();
    }

    fn apply_assistant(&mut self, event: &SessionEvent, data: String) -> Option<TimelineChange> {
        if data.is_empty() {
            return None;
        }
        // a block keeps the seq of the chunk that opened it; the window is
        // measured from there
        if let Some(last) = self.items.back_mut() {
            if last.kind == ItemKind::Assistant
                && event.seq.saturating_sub(last.seq) <= ASSISTANT_MERGE_WINDOW
            {
                last.text.push_str(&data);
                return Some(TimelineChange::Extended {
                    seq: event.seq,
                    appended: data,
                });
            }
        }
        self.append(ItemKind::Assistant, event, data)
    }

    fn append(
        &mut self,
        kind: ItemKind,
        event: &SessionEvent,
        text: String,
    ) -> Option<TimelineChange> {
        if text.is_empty() {
            return None;
        }
        let item = TimelineItem {
            kind,
            ts_ms: event.ts_ms,
            seq: event.seq,
            text,
        };
        self.push_item(item.clone());
        Some(TimelineChange::Appended(item))
    }

    fn push_item(&mut self, item: TimelineItem) {
        push_capped(&mut self.items, item, Some(self.config.max_items));
    }
}

/// Pure form of [`Timeline::apply`].
pub fn reduce(mut timeline: Timeline, event: &SessionEvent) -> Timeline {
    timeline.apply(event);
    timeline
}

fn tool_record(event: &SessionEvent, payload: Value) -> ToolRecord {
    ToolRecord {
        ts_ms: event.ts_ms,
        seq: event.seq,
        payload,
    }
}

fn push_capped<T>(log: &mut VecDeque<T>, entry: T, limit: Option<usize>) {
    log.push_back(entry);
    if let Some(limit) = limit {
        while log.len() > limit {
            log.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::gate::{Admission, EventGate};
    use serde_json::json;

    fn event(seq: u64, kind: &str, payload: Value) -> SessionEvent {
        SessionEvent {
            session_id: "s1".into(),
            engine: "claude".into(),
            ts_ms: 1_700_000_000_000 + seq as i64,
            seq,
            kind: kind.into(),
            payload: Some(payload),
        }
    }

    fn assistant(seq: u64, data: &str) -> SessionEvent {
        event(seq, "assistant", json!({ "data": data }))
    }

    fn texts(timeline: &Timeline) -> Vec<&str> {
        timeline.items().map(|item| item.text.as_str()).collect()
    }

    #[test]
    fn assistant_chunks_merge_within_window() {
        let mut timeline = Timeline::default();
        timeline.apply(&assistant(10, "a"));
        let change = timeline.apply(&assistant(11, "b"));
        assert_eq!(
            change,
            Some(TimelineChange::Extended {
                seq: 11,
                appended: "b".into()
            })
        );
        timeline.apply(&assistant(40, "c"));

        assert_eq!(texts(&timeline), vec!["ab", "c"]);
        assert_eq!(timeline.last().map(|item| item.seq), Some(40));
    }

    #[test]
    fn merge_window_is_anchored_at_block_start() {
        let mut timeline = Timeline::default();
        for (seq, chunk) in [(10, "a"), (11, "b"), (12, "c"), (13, "d")] {
            timeline.apply(&assistant(seq, chunk));
        }
        assert_eq!(texts(&timeline), vec!["abc", "d"]);
        let seqs: Vec<u64> = timeline.items().map(|item| item.seq).collect();
        assert_eq!(seqs, vec![10, 13]);
    }

    #[test]
    fn non_assistant_item_breaks_merge() {
        let mut timeline = Timeline::default();
        timeline.apply(&assistant(1, "one"));
        timeline.apply(&event(2, "status", json!({"state": "running"})));
        timeline.apply(&assistant(3, "two"));
        assert_eq!(texts(&timeline), vec!["one", "running", "two"]);
    }

    #[test]
    fn thinking_lifecycle() {
        let mut timeline = Timeline::default();
        timeline.apply(&event(1, "thinking_delta", json!({"delta": "x"})));
        assert_eq!(timeline.thinking_live(), "x");
        timeline.apply(&event(2, "thinking_delta", json!({"delta": "y"})));
        assert_eq!(timeline.thinking_live(), "xy");

        let committed = timeline.apply(&event(3, "thinking_done", json!({})));
        assert!(matches!(
            committed,
            Some(TimelineChange::ThinkingCommitted(ref entry)) if entry.text == "xy"
        ));
        assert_eq!(timeline.thinking_live(), "");
        assert_eq!(timeline.thinking_history().count(), 1);

        assert_eq!(timeline.apply(&event(4, "thinking_done", json!({}))), None);
        assert_eq!(timeline.thinking_history().count(), 1);
        assert!(timeline.is_empty());
    }

    #[test]
    fn user_events_are_suppressed() {
        let mut timeline = Timeline::default();
        let change = timeline.apply(&event(7, "user", json!({"data": "ls\n"})));
        assert_eq!(change, None);
        assert!(timeline.is_empty());
    }

    #[test]
    fn status_and_error_items() {
        let mut timeline = Timeline::default();
        timeline.apply(&event(1, "status", json!({"state": "exited", "exit_code": 3})));
        timeline.apply(&event(2, "error", json!({"data": "pty closed"})));
        timeline.apply(&event(3, "status", Value::Null));
        assert_eq!(texts(&timeline), vec!["exited (exit 3)", "pty closed"]);
        let kinds: Vec<_> = timeline.items().map(|item| item.kind).collect();
        assert_eq!(kinds, vec![ItemKind::Status, ItemKind::Error]);
    }

    #[test]
    fn tool_activity_goes_to_side_logs() {
        let mut timeline = Timeline::default();
        timeline.apply(&event(1, "tool_call", json!({"name": "read"})));
        timeline.apply(&event(2, "tool_output", json!({"ok": true})));
        timeline.apply(&event(3, "heartbeat", json!({})));
        assert!(timeline.is_empty());
        assert_eq!(timeline.tool_calls().count(), 1);
        let output = timeline.tool_outputs().next().unwrap();
        assert_eq!(output.seq, 2);
        assert_eq!(output.payload, json!({"ok": true}));
    }

    #[test]
    fn side_logs_respect_optional_limit() {
        let mut timeline = Timeline::new(TimelineConfig {
            max_items: DEFAULT_MAX_ITEMS,
            side_log_limit: Some(2),
        });
        for seq in 1..=5 {
            timeline.apply(&event(seq, "tool_call", json!({ "n": seq })));
        }
        let seqs: Vec<_> = timeline.tool_calls().map(|record| record.seq).collect();
        assert_eq!(seqs, vec![4, 5]);
    }

    #[test]
    fn visible_items_are_capped_oldest_first() {
        let mut timeline = Timeline::new(TimelineConfig {
            max_items: 3,
            side_log_limit: None,
        });
        for seq in 1..=5 {
            timeline.apply(&event(seq * 10, "status", json!({ "state": format!("s{seq}") })));
        }
        assert_eq!(texts(&timeline), vec!["s3", "s4", "s5"]);
    }

    #[test]
    fn default_cap_is_two_thousand() {
        let mut timeline = Timeline::default();
        for seq in 1..=2005u64 {
            timeline.apply(&event(seq * 10, "error", json!({ "message": seq.to_string() })));
        }
        assert_eq!(timeline.len(), DEFAULT_MAX_ITEMS);
        assert_eq!(timeline.items().next().unwrap().text, "6");
    }

    #[test]
    fn local_input_is_tagged_with_cursor() {
        let mut timeline = Timeline::default();
        timeline.apply(&assistant(5, "prompt> "));
        timeline.record_local_input("ls", 5, 42);
        // a later assistant chunk must not merge into the user item
        timeline.apply(&assistant(6, "file"));
        let items: Vec<_> = timeline.items().map(|i| (i.kind, i.text.as_str())).collect();
        assert_eq!(
            items,
            vec![
                (ItemKind::Assistant, "prompt> "),
                (ItemKind::User, "ls"),
                (ItemKind::Assistant, "file"),
            ]
        );
    }

    #[test]
    fn gate_and_reducer_drop_replayed_events() {
        let mut gate = EventGate::new(0);
        let mut timeline = Timeline::default();
        let frames = [
            r#"{"seq":5,"kind":"assistant","payload":{"data":"a"}}"#,
            r#"{"seq":5,"kind":"assistant","payload":{"data":"a"}}"#,
            r#"{"seq":3,"kind":"assistant","payload":{"data":"old"}}"#,
            r#"{"seq":6,"kind":"assistant","payload":{"data":"b"}}"#,
            r#"{"kind":"assistant"}"#,
        ];
        for frame in frames {
            if let Admission::Accepted(event) = gate.admit_text(frame) {
                timeline.apply(&event);
            }
        }
        assert_eq!(gate.cursor(), 6);
        assert_eq!(texts(&timeline), vec!["ab"]);
    }

    fn frame(seq: u64, kind: &str, payload: Value) -> String {
        serde_json::to_string(&event(seq, kind, payload)).unwrap()
    }

    fn admit_all(gate: &mut EventGate, timeline: &mut Timeline, frames: &[String]) {
        for frame in frames {
            if let Admission::Accepted(event) = gate.admit_text(frame) {
                timeline.apply(&event);
            }
        }
    }

    #[test]
    fn replayed_side_channel_events_change_nothing() {
        let mut gate = EventGate::new(0);
        let mut timeline = Timeline::default();
        admit_all(
            &mut gate,
            &mut timeline,
            &[
                frame(1, "thinking_delta", json!({"delta": "plan"})),
                frame(2, "tool_call", json!({"name": "ls"})),
                frame(3, "thinking_done", json!({})),
                frame(4, "thinking_delta", json!({"delta": "next"})),
                frame(5, "tool_output", json!({"data": "a.txt"})),
            ],
        );
        let before = timeline.clone();

        admit_all(
            &mut gate,
            &mut timeline,
            &[
                frame(2, "thinking_delta", json!({"delta": "again"})),
                frame(5, "tool_call", json!({"name": "rm"})),
                frame(4, "thinking_done", json!({})),
                frame(3, "tool_output", json!({"data": "b.txt"})),
                frame(1, "assistant", json!({"data": "late"})),
            ],
        );

        assert_eq!(gate.cursor(), 5);
        assert_eq!(timeline, before);
        assert_eq!(timeline.thinking_live(), "next");
        let history: Vec<&str> = timeline.thinking_history().map(|e| e.text.as_str()).collect();
        assert_eq!(history, vec!["plan"]);
        assert_eq!(timeline.tool_calls().count(), 1);
        assert_eq!(timeline.tool_outputs().count(), 1);
    }

    #[test]
    fn duplicates_fold_like_the_deduplicated_stream() {
        let unique = vec![
            frame(1, "status", json!({"state": "running"})),
            frame(2, "assistant", json!({"data": "he"})),
            frame(3, "thinking_delta", json!({"delta": "x"})),
            frame(4, "assistant", json!({"data": "llo"})),
            frame(5, "thinking_done", json!({})),
            frame(6, "tool_call", json!({"name": "ls"})),
            frame(9, "assistant", json!({"data": "bye"})),
        ];
        let mut noisy = Vec::new();
        for (i, f) in unique.iter().enumerate() {
            noisy.push(f.clone());
            noisy.push(f.clone());
            if i > 0 {
                noisy.push(unique[i - 1].clone());
            }
        }

        let mut clean_gate = EventGate::new(0);
        let mut clean = Timeline::default();
        admit_all(&mut clean_gate, &mut clean, &unique);
        let mut noisy_gate = EventGate::new(0);
        let mut deduped = Timeline::default();
        admit_all(&mut noisy_gate, &mut deduped, &noisy);

        assert_eq!(deduped, clean);
        assert_eq!(noisy_gate.cursor(), clean_gate.cursor());
        assert_eq!(texts(&deduped), vec!["running", "hello", "bye"]);
    }

    #[test]
    fn reduce_is_a_fold() {
        let events = [assistant(1, "x"), assistant(2, "y")];
        let timeline = events.iter().fold(Timeline::default(), reduce);
        assert_eq!(texts(&timeline), vec!["xy"]);
    }
}
