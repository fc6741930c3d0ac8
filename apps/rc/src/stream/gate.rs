use rc_proto::SessionEvent;

/// Outcome of offering one inbound text frame to the gate.
#[derive(Debug)]
pub enum Admission {
    Accepted(SessionEvent),
    Stale { seq: u64, cursor: u64 },
    Malformed(serde_json::Error),
}

/// Decodes inbound frames and enforces a strictly increasing sequence watermark.
#[derive(Debug, Clone, Default)]
pub struct EventGate {
    cursor: u64,
}

impl EventGate {
    pub fn new(cursor: u64) -> Self {
        Self { cursor }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn reset(&mut self, cursor: u64) {
        self.cursor = cursor;
    }

    pub fn admit_text(&mut self, text: &str) -> Admission {
        match SessionEvent::decode(text) {
            Ok(event) => self.admit(event),
            Err(err) => Admission::Malformed(err),
        }
    }

    pub fn admit(&mut self, event: SessionEvent) -> Admission {
        if event.seq <= self.cursor {
            return Admission::Stale {
                seq: event.seq,
                cursor: self.cursor,
            };
        }
        self.cursor = event.seq;
        Admission::Accepted(event)
    }
}
