use crate::session::TranscriptSink;
use crate::stream::ConnectionState;
use crate::timeline::{ItemKind, TimelineChange};
use parking_lot::Mutex;
use std::io::{self, Write};
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::watch;
use tracing::warn;

/// Writes the transcript to a terminal and publishes connection changes on a
/// watch channel for the attach loop.
pub struct TerminalSink<W: Write + Send> {
    out: Mutex<Output<W>>,
    raw: bool,
    activity: bool,
    offset: UtcOffset,
    states: watch::Sender<ConnectionState>,
}

struct Output<W> {
    writer: W,
    at_line_start: bool,
}

impl TerminalSink<io::Stdout> {
    pub fn stdout(raw: bool, activity: bool) -> (Self, watch::Receiver<ConnectionState>) {
        let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
        Self::new(io::stdout(), raw, activity, offset)
    }
}

impl<W: Write + Send> TerminalSink<W> {
    pub fn new(
        writer: W,
        raw: bool,
        activity: bool,
        offset: UtcOffset,
    ) -> (Self, watch::Receiver<ConnectionState>) {
        let (states, receiver) = watch::channel(ConnectionState::Idle);
        let sink = Self {
            out: Mutex::new(Output {
                writer,
                at_line_start: true,
            }),
            raw,
            activity,
            offset,
            states,
        };
        (sink, receiver)
    }

    /// Prints a client-side notice line, outside the transcript.
    pub fn notice(&self, message: &str) {
        self.line("rc", None, message);
    }

    pub fn into_writer(self) -> W {
        self.out.into_inner().writer
    }

    fn line(&self, label: &str, ts_ms: Option<i64>, text: &str) {
        let stamp = ts_ms
            .map(|ts| format!(" {}", clock(ts, self.offset)))
            .unwrap_or_default();
        let mut out = self.out.lock();
        let lead = if out.at_line_start { "" } else { "\n" };
        let body = format!("{lead}[{label}{stamp}] {text}\n");
        self.write(&mut out, &body);
    }

    fn text(&self, text: &str) {
        let mut out = self.out.lock();
        self.write(&mut out, text);
    }

    fn write(&self, out: &mut Output<W>, text: &str) {
        if text.is_empty() {
            return;
        }
        let rendered = if self.raw {
            raw_newlines(text)
        } else {
            text.to_string()
        };
        let result = out
            .writer
            .write_all(rendered.as_bytes())
            .and_then(|()| out.writer.flush());
        if let Err(err) = result {
            warn!(target: "rc::terminal", error = %err, "failed to write transcript");
        }
        out.at_line_start = text.ends_with('\n');
    }
}

impl<W: Write + Send> TranscriptSink for TerminalSink<W> {
    fn render(&self, change: &TimelineChange) {
        match change {
            TimelineChange::Appended(item) => match item.kind {
                ItemKind::Status | ItemKind::Error => {
                    self.line(item.kind.label(), Some(item.ts_ms), &item.text)
                }
                ItemKind::Assistant => self.text(&item.text),
                // the terminal already echoed what was typed
                ItemKind::User => {}
            },
            TimelineChange::Extended { appended, .. } => self.text(appended),
            TimelineChange::ThinkingCommitted(entry) if self.activity => {
                self.line("thinking", Some(entry.ts_ms), entry.text.trim_end())
            }
            TimelineChange::ToolCall(record) if self.activity => {
                self.line("tool", Some(record.ts_ms), &record.payload.to_string())
            }
            TimelineChange::ToolOutput(record) if self.activity => {
                self.line("tool output", Some(record.ts_ms), &record.payload.to_string())
            }
            _ => {}
        }
    }

    fn connection_changed(&self, state: &ConnectionState) {
        match state {
            ConnectionState::Idle | ConnectionState::Connecting => {}
            other => self.line("rc", None, &other.to_string()),
        }
        self.states.send_replace(state.clone());
    }
}

/// `HH:MM:SS` in `offset`.
pub fn clock(ts_ms: i64, offset: UtcOffset) -> String {
    let format = format_description!("[hour]:[minute]:[second]");
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ts_ms) * 1_000_000)
        .map(|at| at.to_offset(offset))
        .ok()
        .and_then(|at| at.format(&format).ok())
        .unwrap_or_else(|| "--:--:--".to_string())
}

fn raw_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "\r\n")
}
