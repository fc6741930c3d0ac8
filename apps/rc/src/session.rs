//! The attached-session owner: wires the stream client to a timeline and a
//! transcript sink, and turns user input into outbound messages.

use crate::api::TicketIssuer;
use crate::config::Endpoint;
use crate::cursor::CursorStore;
use crate::input::{ControlSignal, compose_keystrokes, compose_line};
use crate::stream::{ConnectionState, Connector, StreamClient, StreamConfig, StreamObserver};
use crate::timeline::{
    EventBody, ThinkingEntry, Timeline, TimelineChange, TimelineConfig, TimelineItem, ToolRecord,
};
use parking_lot::Mutex;
use rc_proto::{ClientMessage, SessionEvent, SessionInfo};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use time::OffsetDateTime;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMeta {
    pub id: String,
    pub name: String,
    pub engine: String,
    pub state: String,
    pub exit_code: Option<i64>,
}

impl SessionMeta {
    pub fn new(id: impl Into<String>, engine: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            engine: engine.into(),
            state: String::new(),
            exit_code: None,
        }
    }

    pub fn title(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

impl From<&SessionInfo> for SessionMeta {
    fn from(info: &SessionInfo) -> Self {
        Self {
            id: info.id.clone(),
            name: info.name.clone(),
            engine: info.engine.clone(),
            state: info.state.clone(),
            exit_code: info.exit_code.map(i64::from),
        }
    }
}

/// Renders timeline changes as they happen.
///
/// Calls may arrive from the stream task while the stream client's lock is
/// held; implementations must not call back into the [`SessionView`].
pub trait TranscriptSink: Send + Sync {
    fn render(&self, change: &TimelineChange);

    fn connection_changed(&self, _state: &ConnectionState) {}
}

/// Point-in-time copy of everything the view shows.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSnapshot {
    pub meta: Option<SessionMeta>,
    pub connection: ConnectionState,
    pub cursor: u64,
    pub last_error: Option<String>,
    pub items: Vec<TimelineItem>,
    pub thinking_live: String,
    pub thinking_history: Vec<ThinkingEntry>,
    pub tool_calls: Vec<ToolRecord>,
    pub tool_outputs: Vec<ToolRecord>,
}

#[derive(Debug, Default)]
struct ViewState {
    meta: Option<SessionMeta>,
    timeline: Timeline,
}

struct ViewObserver {
    view: Arc<Mutex<ViewState>>,
    sink: Arc<dyn TranscriptSink>,
}

impl StreamObserver for ViewObserver {
    fn on_state(&self, state: &ConnectionState) {
        self.sink.connection_changed(state);
    }

    fn on_event(&self, event: &SessionEvent) {
        let change = {
            let mut view = self.view.lock();
            if let EventBody::Status { state, exit_code } = EventBody::decode(event) {
                if let Some(meta) = view.meta.as_mut() {
                    if !state.is_empty() {
                        meta.state = state;
                    }
                    if exit_code.is_some() {
                        meta.exit_code = exit_code;
                    }
                }
            }
            view.timeline.apply(event)
        };
        if let Some(change) = change {
            self.sink.render(&change);
        }
    }
}

pub struct SessionView {
    client: StreamClient,
    cursors: Arc<dyn CursorStore>,
    view: Arc<Mutex<ViewState>>,
    sink: Arc<dyn TranscriptSink>,
    raw_mode: AtomicBool,
}

impl SessionView {
    pub fn new(
        endpoint: Endpoint,
        stream_config: StreamConfig,
        timeline_config: TimelineConfig,
        issuer: Arc<dyn TicketIssuer>,
        connector: Arc<dyn Connector>,
        cursors: Arc<dyn CursorStore>,
        sink: Arc<dyn TranscriptSink>,
    ) -> Self {
        let view = Arc::new(Mutex::new(ViewState {
            meta: None,
            timeline: Timeline::new(timeline_config),
        }));
        let observer = Arc::new(ViewObserver {
            view: Arc::clone(&view),
            sink: Arc::clone(&sink),
        });
        let client = StreamClient::new(
            endpoint,
            stream_config,
            issuer,
            connector,
            Arc::clone(&cursors),
            observer,
        );
        Self {
            client,
            cursors,
            view,
            sink,
            raw_mode: AtomicBool::new(false),
        }
    }

    /// Attaches, resuming after the persisted cursor for this session.
    pub fn attach(&self, meta: SessionMeta) {
        let cursor = self.cursors.load(&meta.id).unwrap_or_else(|err| {
            warn!(target: "rc::cursor", session_id = %meta.id, error = %err, "failed to load cursor");
            0
        });
        self.start(meta, cursor);
    }

    /// Attaches from the recent tail, forgetting any persisted cursor.
    pub fn attach_fresh(&self, meta: SessionMeta) {
        if let Err(err) = self.cursors.reset(&meta.id) {
            warn!(target: "rc::cursor", session_id = %meta.id, error = %err, "failed to reset cursor");
        }
        self.start(meta, 0);
    }

    fn start(&self, meta: SessionMeta, cursor: u64) {
        let session_id = meta.id.clone();
        // the previous run must be silenced before its view is reset
        self.client.supersede();
        {
            let mut view = self.view.lock();
            view.timeline.clear();
            view.meta = Some(meta);
        }
        debug!(target: "rc::stream", session_id = %session_id, cursor, "session view attaching");
        self.client.attach(session_id, cursor);
    }

    /// Stops streaming but keeps the cursor, so a later attach resumes.
    pub fn stop(&self) {
        self.client.stop();
    }

    /// Stops streaming, forgets the persisted cursor and clears the view.
    pub fn detach(&self) {
        self.client.stop();
        let meta = {
            let mut view = self.view.lock();
            view.timeline.clear();
            view.meta.take()
        };
        if let Some(meta) = meta {
            if let Err(err) = self.cursors.reset(&meta.id) {
                warn!(target: "rc::cursor", session_id = %meta.id, error = %err, "failed to reset cursor");
            }
        }
    }

    pub fn set_raw_mode(&self, raw: bool) {
        self.raw_mode.store(raw, Ordering::Relaxed);
    }

    pub fn raw_mode(&self) -> bool {
        self.raw_mode.load(Ordering::Relaxed)
    }

    /// Sends one line and echoes it locally once it was handed to the connection.
    pub fn send_line(&self, text: &str) -> bool {
        let engine = self
            .view
            .lock()
            .meta
            .as_ref()
            .map(|meta| meta.engine.clone())
            .unwrap_or_default();
        let Some(line) = compose_line(text, &engine, self.raw_mode()) else {
            return false;
        };
        if !self.client.send(&line.message) {
            return false;
        }
        let cursor = self.client.cursor();
        let change = self
            .view
            .lock()
            .timeline
            .record_local_input(&line.echo, cursor, now_ms());
        self.sink.render(&change);
        true
    }

    pub fn send_keystrokes(&self, bytes: &[u8]) -> bool {
        compose_keystrokes(bytes).is_some_and(|message| self.client.send(&message))
    }

    pub fn send_control(&self, signal: ControlSignal) -> bool {
        self.client.send_control(signal)
    }

    pub fn send_ctrl_c(&self) -> bool {
        self.send_control(ControlSignal::Interrupt)
    }

    pub fn send(&self, message: &ClientMessage) -> bool {
        self.client.send(message)
    }

    pub fn resize(&self, cols: u16, rows: u16) -> bool {
        self.client.set_viewport(cols, rows)
    }

    pub fn connection(&self) -> ConnectionState {
        self.client.state()
    }

    pub fn cursor(&self) -> u64 {
        self.client.cursor()
    }

    pub fn meta(&self) -> Option<SessionMeta> {
        self.view.lock().meta.clone()
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        let connection = self.client.state();
        let cursor = self.client.cursor();
        let last_error = self.client.last_error();
        let view = self.view.lock();
        ViewSnapshot {
            meta: view.meta.clone(),
            connection,
            cursor,
            last_error,
            items: view.timeline.items().cloned().collect(),
            thinking_live: view.timeline.thinking_live().to_string(),
            thinking_history: view.timeline.thinking_history().cloned().collect(),
            tool_calls: view.timeline.tool_calls().cloned().collect(),
            tool_outputs: view.timeline.tool_outputs().cloned().collect(),
        }
    }
}

fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::MemoryCursorStore;
    use crate::stream::testing::{MockConnector, MockIssuer, ServerEnd};
    use crate::timeline::ItemKind;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingSink {
        changes: Mutex<Vec<TimelineChange>>,
        states: Mutex<Vec<ConnectionState>>,
    }

    impl TranscriptSink for RecordingSink {
        fn render(&self, change: &TimelineChange) {
            self.changes.lock().push(change.clone());
        }

        fn connection_changed(&self, state: &ConnectionState) {
            self.states.lock().push(state.clone());
        }
    }

    struct Fixture {
        view: SessionView,
        servers: mpsc::UnboundedReceiver<ServerEnd>,
        sink: Arc<RecordingSink>,
        cursors: Arc<MemoryCursorStore>,
    }

    fn fixture() -> Fixture {
        let (connector, servers) = MockConnector::new();
        let sink = Arc::new(RecordingSink::default());
        let cursors = Arc::new(MemoryCursorStore::new());
        let view = SessionView::new(
            Endpoint::new("http://localhost:8787", None).unwrap(),
            StreamConfig::default(),
            TimelineConfig::default(),
            MockIssuer::new(Vec::new()),
            connector,
            cursors.clone(),
            sink.clone(),
        );
        Fixture {
            view,
            servers,
            sink,
            cursors,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn meta(engine: &str) -> SessionMeta {
        SessionMeta {
            id: "s1".into(),
            name: "build box".into(),
            engine: engine.into(),
            state: "running".into(),
            exit_code: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn attach_resumes_from_persisted_cursor() {
        let mut f = fixture();
        f.cursors.store("s1", 57).unwrap();
        f.view.attach(meta("shell"));
        let server = f.servers.recv().await.unwrap();
        assert_eq!(server.query("from_seq").as_deref(), Some("58"));

        server.push(58, "assistant", json!({"data": "hello "}));
        server.push(59, "assistant", json!({"data": "world"}));
        server.push(60, "thinking_delta", json!({"delta": "hmm"}));
        settle().await;

        let snapshot = f.view.snapshot();
        assert_eq!(snapshot.connection, ConnectionState::Connected);
        assert_eq!(snapshot.cursor, 60);
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(snapshot.items[0].text, "hello world");
        assert_eq!(snapshot.thinking_live, "hmm");
        assert_eq!(f.cursors.load("s1").unwrap(), 60);
        assert_eq!(
            f.sink.changes.lock()[1],
            TimelineChange::Extended {
                seq: 59,
                appended: "world".into()
            }
        );
        assert_eq!(
            *f.sink.states.lock(),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_attach_ignores_persisted_cursor() {
        let mut f = fixture();
        f.cursors.store("s1", 57).unwrap();
        f.view.attach_fresh(meta("shell"));
        let server = f.servers.recv().await.unwrap();
        assert_eq!(server.query("last_n").as_deref(), Some("256"));
        assert_eq!(f.cursors.load("s1").unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn send_line_echoes_only_when_delivered() {
        let mut f = fixture();
        assert!(!f.view.send_line("too early"));

        f.view.attach(meta("shell"));
        let mut server = f.servers.recv().await.unwrap();
        server.push(4, "status", json!({"state": "running"}));
        settle().await;

        assert!(!f.view.send_line("   "));
        assert!(f.view.send_line("make test  "));
        let sent = server.from_client.recv().await.unwrap();
        assert_eq!(
            sent,
            crate::stream::Outgoing::Text(r#"{"type":"input","data":"make test  \n"}"#.into())
        );

        let snapshot = f.view.snapshot();
        let echo = snapshot.items.last().unwrap();
        assert_eq!(echo.kind, ItemKind::User);
        assert_eq!(echo.text, "make test");
        assert_eq!(echo.seq, 4);

        assert!(f.view.send_ctrl_c());
        assert_eq!(
            server.from_client.recv().await,
            Some(crate::stream::Outgoing::Text(
                r#"{"type":"input","data":"\u0003"}"#.into()
            ))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn codex_lines_and_raw_mode_skip_newline() {
        let mut f = fixture();
        f.view.attach(meta("codex"));
        let mut server = f.servers.recv().await.unwrap();
        settle().await;

        assert!(f.view.send_line("explain this repo"));
        assert_eq!(
            server.from_client.recv().await,
            Some(crate::stream::Outgoing::Text(
                r#"{"type":"input","data":"explain this repo"}"#.into()
            ))
        );

        f.view.set_raw_mode(true);
        assert!(f.view.send_keystrokes(b"j"));
        assert_eq!(
            server.from_client.recv().await,
            Some(crate::stream::Outgoing::Text(
                r#"{"type":"input","data":"j"}"#.into()
            ))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn status_events_update_meta() {
        let mut f = fixture();
        f.view.attach(meta("shell"));
        let server = f.servers.recv().await.unwrap();
        server.push(1, "status", json!({"state": "exited", "exit_code": 2}));
        settle().await;

        let snapshot = f.view.snapshot();
        let meta = snapshot.meta.unwrap();
        assert_eq!(meta.state, "exited");
        assert_eq!(meta.exit_code, Some(2));
        assert_eq!(meta.title(), "build box");
        assert_eq!(snapshot.items[0].text, "exited (exit 2)");
        assert_eq!(
            snapshot.connection,
            ConnectionState::Closed("session exited".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reattach_shows_only_the_new_session() {
        let mut f = fixture();
        f.view.attach(meta("shell"));
        let old = f.servers.recv().await.unwrap();
        old.push(1, "assistant", json!({"data": "from s1"}));
        settle().await;

        f.view.attach(SessionMeta::new("s2", "codex"));
        let fresh = f.servers.recv().await.unwrap();
        old.push(2, "status", json!({"state": "exited", "exit_code": 9}));
        fresh.push(1, "assistant", json!({"data": "from s2"}));
        settle().await;

        let snapshot = f.view.snapshot();
        let texts: Vec<&str> = snapshot.items.iter().map(|item| item.text.as_str()).collect();
        assert_eq!(texts, vec!["from s2"]);
        let meta = snapshot.meta.unwrap();
        assert_eq!(meta.id, "s2");
        assert_eq!(meta.state, "");
        assert_eq!(meta.exit_code, None);
        assert_eq!(
            *f.sink.states.lock(),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Connecting,
                ConnectionState::Connected,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn detach_stops_and_forgets_cursor() {
        let mut f = fixture();
        f.view.attach(meta("shell"));
        let server = f.servers.recv().await.unwrap();
        server.push(9, "error", json!({"message": "disk full"}));
        settle().await;
        assert_eq!(f.cursors.load("s1").unwrap(), 9);

        f.view.detach();
        let snapshot = f.view.snapshot();
        assert_eq!(snapshot.connection, ConnectionState::Closed("stopped".into()));
        assert!(snapshot.items.is_empty());
        assert_eq!(snapshot.meta, None);
        assert_eq!(f.cursors.load("s1").unwrap(), 0);
        assert!(!f.view.send_line("hello?"));
    }

    #[test]
    fn meta_from_session_info() {
        let info = SessionInfo {
            id: "abc".into(),
            name: " ".into(),
            engine: "claude".into(),
            state: "running".into(),
            exit_code: None,
            last_seq: Some(12),
            created: "2024-01-01T00:00:00Z".into(),
        };
        let meta = SessionMeta::from(&info);
        assert_eq!(meta.title(), "abc");
        assert_eq!(meta.engine, "claude");
    }
}
