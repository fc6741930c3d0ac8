use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};
use url::Url;

pub const NORMAL_CLOSURE: u16 = 1000;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("invalid stream endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("connection closed: {0}")]
    Closed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Text(String),
    Close { code: u16, reason: String },
}

impl Outgoing {
    pub fn normal_close(reason: impl Into<String>) -> Self {
        Outgoing::Close {
            code: NORMAL_CLOSURE,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Text(String),
    /// Terminal: the connection is gone and no further frames follow.
    Closed(String),
}

/// An open duplex connection. Dropping `outbound` closes the socket.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::UnboundedSender<Outgoing>,
    pub inbound: mpsc::UnboundedReceiver<Incoming>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &Url) -> Result<Link, StreamError>;
}

/// Opens real WebSocket connections and pumps frames on a background task.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, url: &Url) -> Result<Link, StreamError> {
        let (socket, response) = connect_async(url.as_str())
            .await
            .map_err(|err| StreamError::Connect(err.to_string()))?;
        debug!(target: "rc::stream", status = %response.status(), "websocket open");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(socket, outbound_rx, inbound_tx));
        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

async fn pump(
    socket: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    mut outbound: mpsc::UnboundedReceiver<Outgoing>,
    inbound: mpsc::UnboundedSender<Incoming>,
) {
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            outgoing = outbound.recv() => match outgoing {
                Some(Outgoing::Text(text)) => {
                    if let Err(err) = sink.send(Message::Text(text)).await {
                        let _ = inbound.send(Incoming::Closed(format!("send failed: {err}")));
                        break;
                    }
                }
                Some(Outgoing::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if inbound.send(Incoming::Text(text)).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = match frame {
                        Some(frame) if frame.reason.is_empty() => {
                            format!("closed by server ({})", u16::from(frame.code))
                        }
                        Some(frame) => {
                            format!("closed by server ({}): {}", u16::from(frame.code), frame.reason)
                        }
                        None => "closed by server".to_string(),
                    };
                    let _ = inbound.send(Incoming::Closed(reason));
                    break;
                }
                Some(Ok(other)) => {
                    trace!(target: "rc::stream", frame = ?other, "ignoring non-text frame");
                }
                Some(Err(err)) => {
                    let _ = inbound.send(Incoming::Closed(err.to_string()));
                    break;
                }
                None => {
                    let _ = inbound.send(Incoming::Closed("connection ended".into()));
                    break;
                }
            }
        }
    }
}
