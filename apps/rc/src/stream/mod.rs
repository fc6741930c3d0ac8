//! Resumable event-stream client.
//!
//! One [`StreamClient`] owns at most one attached session. Each attach runs a
//! connection loop on a tokio task: issue a ticket, open the stream resuming
//! after the cursor, dispatch events, and back off on any loss until stopped
//! or the remote session exits.
//!
//! All shared state sits behind a single lock together with a generation
//! counter. `attach` and `stop` bump the generation; every completion from the
//! loop re-checks it under that lock before touching state or calling the
//! observer, so superseded work can never leak callbacks.

pub mod backoff;
pub mod gate;
pub mod resume;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::BackoffSchedule;
pub use gate::{Admission, EventGate};
pub use resume::{DEFAULT_TAIL_LEN, Resume, stream_url};
pub use transport::{
    Connector, Incoming, Link, NORMAL_CLOSURE, Outgoing, StreamError, WebSocketConnector,
};

use crate::api::TicketIssuer;
use crate::config::Endpoint;
use crate::cursor::CursorStore;
use crate::input::{ControlSignal, compose_control, compose_keystrokes};
use crate::timeline::EventBody;
use parking_lot::Mutex;
use rc_proto::{ClientMessage, SessionEvent};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting(u32),
    Closed(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => f.write_str("idle"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Reconnecting(attempt) => write!(f, "reconnecting (attempt {attempt})"),
            ConnectionState::Closed(reason) => write!(f, "closed: {reason}"),
        }
    }
}

/// Receives state changes and accepted events.
///
/// Callbacks run while the client's internal lock is held: implementations
/// must return quickly and must not call back into the [`StreamClient`].
pub trait StreamObserver: Send + Sync {
    fn on_state(&self, state: &ConnectionState);
    fn on_event(&self, event: &SessionEvent);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub backoff: BackoffSchedule,
    pub tail_len: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffSchedule::default(),
            tail_len: DEFAULT_TAIL_LEN,
        }
    }
}

pub struct StreamClient {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: Endpoint,
    config: StreamConfig,
    issuer: Arc<dyn TicketIssuer>,
    connector: Arc<dyn Connector>,
    cursors: Arc<dyn CursorStore>,
    observer: Arc<dyn StreamObserver>,
    gate: Mutex<Gate>,
}

struct Gate {
    generation: u64,
    session_id: Option<String>,
    events: EventGate,
    state: ConnectionState,
    outbound: Option<mpsc::UnboundedSender<Outgoing>>,
    viewport: Option<(u16, u16)>,
    last_error: Option<String>,
    task: Option<JoinHandle<()>>,
}

enum Outcome {
    Lost { reason: String, connected: bool },
    Exited,
    Superseded,
}

enum Dispatch {
    Continue,
    Exited,
    Superseded,
}

impl StreamClient {
    pub fn new(
        endpoint: Endpoint,
        config: StreamConfig,
        issuer: Arc<dyn TicketIssuer>,
        connector: Arc<dyn Connector>,
        cursors: Arc<dyn CursorStore>,
        observer: Arc<dyn StreamObserver>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint,
                config,
                issuer,
                connector,
                cursors,
                observer,
                gate: Mutex::new(Gate {
                    generation: 0,
                    session_id: None,
                    events: EventGate::default(),
                    state: ConnectionState::Idle,
                    outbound: None,
                    viewport: None,
                    last_error: None,
                    task: None,
                }),
            }),
        }
    }

    /// Starts streaming `session_id`, replacing whatever was attached before.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach(&self, session_id: impl Into<String>, initial_cursor: u64) {
        let session_id = session_id.into();
        let mut gate = self.inner.gate.lock();
        gate.generation += 1;
        let generation = gate.generation;
        gate.shutdown("reattach");
        gate.session_id = Some(session_id.clone());
        gate.events.reset(initial_cursor);
        gate.last_error = None;
        info!(
            target: "rc::stream",
            session_id = %session_id,
            cursor = initial_cursor,
            "attaching"
        );
        self.inner.set_state(&mut gate, ConnectionState::Connecting);
        let inner = Arc::clone(&self.inner);
        gate.task = Some(tokio::spawn(run(inner, generation, session_id)));
    }

    /// Moves to `Closed("stopped")` unless already closed, in which case the
    /// earlier reason is kept. Idempotent. No state or event callbacks from
    /// the cancelled run fire after this returns.
    pub fn stop(&self) {
        let mut gate = self.inner.gate.lock();
        gate.generation += 1;
        gate.shutdown("stop");
        if !matches!(gate.state, ConnectionState::Closed(_)) {
            debug!(target: "rc::stream", session_id = ?gate.session_id, "stopped");
            self.inner
                .set_state(&mut gate, ConnectionState::Closed("stopped".into()));
        }
    }

    /// Silences the current run without reporting a state change, ahead of
    /// an [`attach`](Self::attach) that replaces it.
    pub fn supersede(&self) {
        let mut gate = self.inner.gate.lock();
        gate.generation += 1;
        gate.shutdown("reattach");
    }

    /// Sends `message` if connected. Returns whether it was handed to the connection.
    pub fn send(&self, message: &ClientMessage) -> bool {
        let gate = self.inner.gate.lock();
        gate.send(message)
    }

    pub fn send_input(&self, text: &str) -> bool {
        self.send(&ClientMessage::input(text))
    }

    pub fn send_keystrokes(&self, bytes: &[u8]) -> bool {
        compose_keystrokes(bytes).is_some_and(|message| self.send(&message))
    }

    pub fn send_control(&self, signal: ControlSignal) -> bool {
        self.send(&compose_control(signal))
    }

    /// Records the viewport and announces it now if connected, and on every later connect.
    pub fn set_viewport(&self, cols: u16, rows: u16) -> bool {
        let mut gate = self.inner.gate.lock();
        gate.viewport = Some((cols, rows));
        gate.send(&ClientMessage::resize(cols, rows))
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.gate.lock().state.clone()
    }

    pub fn cursor(&self) -> u64 {
        self.inner.gate.lock().events.cursor()
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.gate.lock().session_id.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.gate.lock().last_error.clone()
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Gate {
    fn send(&self, message: &ClientMessage) -> bool {
        if !self.state.is_connected() {
            return false;
        }
        let Some(outbound) = self.outbound.as_ref() else {
            return false;
        };
        match message.encode() {
            Ok(text) => outbound.send(Outgoing::Text(text)).is_ok(),
            Err(err) => {
                warn!(target: "rc::stream", error = %err, "failed to encode outbound message");
                false
            }
        }
    }

    fn shutdown(&mut self, reason: &str) {
        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.send(Outgoing::normal_close(reason));
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Inner {
    fn set_state(&self, gate: &mut Gate, state: ConnectionState) {
        if gate.state == state {
            return;
        }
        debug!(target: "rc::stream", from = %gate.state, to = %state, "state change");
        gate.state = state;
        self.observer.on_state(&gate.state);
    }

    /// Applies `state` only while `generation` is current.
    fn transition(&self, generation: u64, state: ConnectionState) -> bool {
        let mut gate = self.gate.lock();
        if gate.generation != generation {
            return false;
        }
        self.set_state(&mut gate, state);
        true
    }

    fn record_loss(&self, generation: u64, reason: String, next_attempt: u32) -> bool {
        let mut gate = self.gate.lock();
        if gate.generation != generation {
            return false;
        }
        gate.outbound = None;
        gate.last_error = Some(reason);
        self.set_state(&mut gate, ConnectionState::Reconnecting(next_attempt));
        true
    }

    async fn connect_once(&self, generation: u64, session_id: &str, ticket: &str) -> Outcome {
        let cursor = {
            let gate = self.gate.lock();
            if gate.generation != generation {
                return Outcome::Superseded;
            }
            gate.events.cursor()
        };
        let resume = Resume::for_cursor(cursor, self.config.tail_len);
        let url = match stream_url(&self.endpoint, session_id, ticket, resume) {
            Ok(url) => url,
            Err(err) => {
                return Outcome::Lost {
                    reason: err.to_string(),
                    connected: false,
                };
            }
        };
        debug!(target: "rc::stream", session_id, ?resume, "opening stream");
        let mut link = match self.connector.open(&url).await {
            Ok(link) => link,
            Err(err) => {
                return Outcome::Lost {
                    reason: err.to_string(),
                    connected: false,
                };
            }
        };

        {
            let mut gate = self.gate.lock();
            if gate.generation != generation {
                let _ = link.outbound.send(Outgoing::normal_close("superseded"));
                return Outcome::Superseded;
            }
            gate.outbound = Some(link.outbound.clone());
            gate.last_error = None;
            info!(target: "rc::stream", session_id, cursor = gate.events.cursor(), "connected");
            self.set_state(&mut gate, ConnectionState::Connected);
            if let Some((cols, rows)) = gate.viewport {
                gate.send(&ClientMessage::resize(cols, rows));
            }
        }

        loop {
            let reason = match link.inbound.recv().await {
                Some(Incoming::Text(text)) => match self.dispatch(generation, session_id, &text) {
                    Dispatch::Continue => continue,
                    Dispatch::Superseded => return Outcome::Superseded,
                    Dispatch::Exited => {
                        let _ = link.outbound.send(Outgoing::normal_close("session exited"));
                        return Outcome::Exited;
                    }
                },
                Some(Incoming::Closed(reason)) => reason,
                None => "connection dropped".to_string(),
            };
            return Outcome::Lost {
                reason,
                connected: true,
            };
        }
    }

    fn dispatch(&self, generation: u64, session_id: &str, text: &str) -> Dispatch {
        let mut gate = self.gate.lock();
        if gate.generation != generation {
            return Dispatch::Superseded;
        }
        match gate.events.admit_text(text) {
            Admission::Malformed(err) => {
                debug!(target: "rc::stream", session_id, error = %err, "dropping malformed event");
                Dispatch::Continue
            }
            Admission::Stale { seq, cursor } => {
                trace!(target: "rc::stream", session_id, seq, cursor, "dropping replayed event");
                Dispatch::Continue
            }
            Admission::Accepted(event) => {
                if let Err(err) = self.cursors.store(session_id, event.seq) {
                    warn!(
                        target: "rc::cursor",
                        session_id,
                        seq = event.seq,
                        error = %err,
                        "failed to persist cursor"
                    );
                }
                self.observer.on_event(&event);
                if EventBody::decode(&event).is_terminal_status() {
                    info!(target: "rc::stream", session_id, seq = event.seq, "remote session exited");
                    gate.outbound = None;
                    self.set_state(&mut gate, ConnectionState::Closed("session exited".into()));
                    Dispatch::Exited
                } else {
                    Dispatch::Continue
                }
            }
        }
    }
}

async fn run(inner: Arc<Inner>, generation: u64, session_id: String) {
    let mut attempt: u32 = 0;
    loop {
        let state = if attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting(attempt)
        };
        if !inner.transition(generation, state) {
            return;
        }

        let failure = match inner.issuer.issue_ticket().await {
            Ok(ticket) => match inner.connect_once(generation, &session_id, &ticket).await {
                Outcome::Exited | Outcome::Superseded => return,
                Outcome::Lost { reason, connected } => {
                    if connected {
                        attempt = 0;
                    }
                    reason
                }
            },
            Err(err) => format!("ticket request failed: {err}"),
        };

        let delay = inner.config.backoff.delay(attempt);
        warn!(
            target: "rc::stream",
            session_id = %session_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            reason = %failure,
            "stream lost; retrying"
        );
        if !inner.record_loss(generation, failure, attempt.saturating_add(1)) {
            return;
        }
        tokio::time::sleep(delay).await;
        attempt = attempt.saturating_add(1);
    }
}
