//! In-memory stand-ins for the ticket issuer, the connector and the observer.

use super::{ConnectionState, Connector, Incoming, Link, Outgoing, StreamError, StreamObserver};
use crate::api::{ApiError, TicketIssuer};
use async_trait::async_trait;
use parking_lot::Mutex;
use rc_proto::SessionEvent;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

pub(crate) struct MockIssuer {
    failures: Mutex<VecDeque<ApiError>>,
    issued: Mutex<u32>,
}

impl MockIssuer {
    pub(crate) fn new(failures: Vec<ApiError>) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(failures.into()),
            issued: Mutex::new(0),
        })
    }
}

#[async_trait]
impl TicketIssuer for MockIssuer {
    async fn issue_ticket(&self) -> Result<String, ApiError> {
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        let mut issued = self.issued.lock();
        *issued += 1;
        Ok(format!("ticket-{issued}"))
    }
}

pub(crate) struct ServerEnd {
    pub(crate) url: Url,
    pub(crate) to_client: mpsc::UnboundedSender<Incoming>,
    pub(crate) from_client: mpsc::UnboundedReceiver<Outgoing>,
}

impl ServerEnd {
    pub(crate) fn query(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    pub(crate) fn push(&self, seq: u64, kind: &str, payload: serde_json::Value) {
        let frame = serde_json::json!({
            "session_id": "s1",
            "engine": "shell",
            "ts_ms": 1_000 + seq,
            "seq": seq,
            "kind": kind,
            "payload": payload,
        });
        let _ = self.to_client.send(Incoming::Text(frame.to_string()));
    }
}

pub(crate) struct MockConnector {
    servers: mpsc::UnboundedSender<ServerEnd>,
}

impl MockConnector {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { servers: tx }), rx)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, url: &Url) -> Result<Link, StreamError> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        self.servers
            .send(ServerEnd {
                url: url.clone(),
                to_client: inbound_tx,
                from_client: outbound_rx,
            })
            .map_err(|_| StreamError::Connect("test server gone".into()))?;
        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

#[derive(Default)]
pub(crate) struct Recorder {
    pub(crate) states: Mutex<Vec<ConnectionState>>,
    pub(crate) seqs: Mutex<Vec<u64>>,
}

impl StreamObserver for Recorder {
    fn on_state(&self, state: &ConnectionState) {
        self.states.lock().push(state.clone());
    }

    fn on_event(&self, event: &SessionEvent) {
        self.seqs.lock().push(event.seq);
    }
}

