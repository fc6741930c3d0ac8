use crate::api::{ApiClient, SessionDirectory};
use crate::cursor::{CursorStore, FileCursorStore};
use crate::session::{SessionMeta, SessionView};
use crate::stream::{ConnectionState, StreamConfig, WebSocketConnector};
use crate::terminal::cli::AttachArgs;
use crate::terminal::error::CliError;
use crate::terminal::render::TerminalSink;
use crate::timeline::TimelineConfig;
use crossterm::terminal::{self, disable_raw_mode, enable_raw_mode};
use std::io::{self, BufRead, Read};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Ctrl-] leaves a raw-mode attach.
const DETACH_BYTE: u8 = 0x1d;
const RESIZE_POLL: Duration = Duration::from_millis(250);

pub struct RawModeGuard(bool);

impl RawModeGuard {
    pub fn new(enable: bool) -> Self {
        if !enable {
            return Self(false);
        }
        match enable_raw_mode() {
            Ok(()) => Self(true),
            Err(err) => {
                warn!(target: "rc::terminal", error = %err, "failed to enable raw mode");
                Self(false)
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.0 {
            let _ = disable_raw_mode();
        }
    }
}

#[derive(Debug)]
enum StdinEvent {
    Line(String),
    Bytes(Vec<u8>),
    Eof,
}

#[derive(Debug, PartialEq, Eq)]
enum Exit {
    Detach,
    Closed(String),
}

pub async fn run(api: ApiClient, args: AttachArgs) -> Result<(), CliError> {
    let sessions = api.list_sessions().await?;
    let info = sessions
        .iter()
        .find(|session| session.id == args.session_id)
        .ok_or_else(|| CliError::SessionNotFound(args.session_id.clone()))?;
    let meta = SessionMeta::from(info);

    let cursors: Arc<dyn CursorStore> = Arc::new(FileCursorStore::open_default()?);
    let (sink, mut states) = TerminalSink::stdout(args.raw, args.activity);
    let sink = Arc::new(sink);
    let endpoint = api.endpoint().clone();
    let view = SessionView::new(
        endpoint,
        StreamConfig::default(),
        TimelineConfig::default(),
        Arc::new(api),
        Arc::new(WebSocketConnector),
        cursors,
        sink.clone(),
    );
    view.set_raw_mode(args.raw);

    let mut last_size = terminal::size().ok();
    if let Some((cols, rows)) = last_size {
        view.resize(cols, rows);
    }

    let hint = if args.raw {
        "Ctrl-] detaches"
    } else {
        "Ctrl-C interrupts, Ctrl-D detaches"
    };
    sink.notice(&format!(
        "attaching to {} ({}, {}); {hint}",
        meta.title(),
        meta.engine,
        if meta.state.is_empty() { "unknown" } else { meta.state.as_str() }
    ));
    info!(target: "rc::terminal", session_id = %meta.id, raw = args.raw, fresh = args.fresh, "attach");
    if args.fresh {
        view.attach_fresh(meta);
    } else {
        view.attach(meta);
    }

    let guard = RawModeGuard::new(args.raw);
    let mut input = spawn_stdin_reader(args.raw);
    let mut resize = tokio::time::interval(RESIZE_POLL);

    let exit = loop {
        tokio::select! {
            event = input.recv() => match event {
                Some(StdinEvent::Line(line)) => {
                    if !view.send_line(&line) && !line.trim().is_empty() {
                        sink.notice(&format!("not connected ({}); input dropped", view.connection()));
                    }
                }
                Some(StdinEvent::Bytes(bytes)) => {
                    if let Some(pos) = bytes.iter().position(|b| *b == DETACH_BYTE) {
                        view.send_keystrokes(&bytes[..pos]);
                        break Exit::Detach;
                    }
                    if !view.send_keystrokes(&bytes) {
                        trace!(target: "rc::terminal", bytes = bytes.len(), "keystrokes dropped while disconnected");
                    }
                }
                Some(StdinEvent::Eof) | None => break Exit::Detach,
            },
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    return Err(CliError::Runtime(format!("signal handler: {err}")));
                }
                view.send_ctrl_c();
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break Exit::Closed("transcript closed".into());
                }
                let state = states.borrow_and_update().clone();
                if let ConnectionState::Closed(reason) = state {
                    break Exit::Closed(reason);
                }
            }
            _ = resize.tick() => {
                let size = terminal::size().ok();
                if let Some((cols, rows)) = size.filter(|size| Some(*size) != last_size) {
                    debug!(target: "rc::terminal", cols, rows, "viewport changed");
                    view.resize(cols, rows);
                    last_size = size;
                }
            }
        }
    };
    drop(guard);

    match exit {
        Exit::Detach => {
            view.detach();
            sink.notice("detached");
        }
        Exit::Closed(reason) => {
            view.stop();
            debug!(target: "rc::terminal", %reason, "stream closed; leaving cursor in place");
        }
    }
    Ok(())
}

/// Reads stdin on a dedicated thread; blocking reads never hold up the runtime.
fn spawn_stdin_reader(raw: bool) -> mpsc::UnboundedReceiver<StdinEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::spawn(move || {
        let result = if raw {
            forward_chunks(io::stdin().lock(), &tx)
        } else {
            forward_lines(io::stdin().lock(), &tx)
        };
        if let Err(err) = result {
            warn!(target: "rc::terminal", error = %err, "stdin reader failed");
        }
        let _ = tx.send(StdinEvent::Eof);
    });
    rx
}

fn forward_chunks(
    mut reader: impl Read,
    tx: &mpsc::UnboundedSender<StdinEvent>,
) -> io::Result<()> {
    let mut buffer = [0u8; 1024];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => return Ok(()),
            Ok(n) => {
                if tx.send(StdinEvent::Bytes(buffer[..n].to_vec())).is_err() {
                    return Ok(());
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}

fn forward_lines(mut reader: impl BufRead, tx: &mpsc::UnboundedSender<StdinEvent>) -> io::Result<()> {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => return Ok(()),
            Ok(_) => {
                let text = line.strip_suffix('\n').unwrap_or(&line);
                let text = text.strip_suffix('\r').unwrap_or(text);
                if tx.send(StdinEvent::Line(text.to_string())).is_err() {
                    return Ok(());
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}
