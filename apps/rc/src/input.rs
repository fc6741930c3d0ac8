//! Turns user keystrokes and lines into outbound `input` messages.

use rc_proto::ClientMessage;
use std::fmt;
use std::str::FromStr;

/// How a composed line is terminated before it is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineTermination {
    /// Append `\n` when the line does not already end with one.
    Newline,
    /// Send the text exactly as typed.
    AsIs,
}

impl LineTermination {
    /// Single-shot prompt engines treat a trailing newline as part of the prompt.
    pub fn for_engine(engine: &str) -> Self {
        if engine.trim().eq_ignore_ascii_case("codex") {
            LineTermination::AsIs
        } else {
            LineTermination::Newline
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedLine {
    pub message: ClientMessage,
    /// Text for the optimistic local echo: normalized, trailing whitespace removed.
    pub echo: String,
}

/// Builds the `input` message for one line of user text.
///
/// Returns `None` for whitespace-only input.
pub fn compose_line(raw: &str, engine: &str, raw_mode: bool) -> Option<ComposedLine> {
    let normalized = raw.replace("\r\n", "\n");
    if normalized.trim().is_empty() {
        return None;
    }
    let echo = normalized.trim_end().to_string();
    let terminate = !raw_mode && LineTermination::for_engine(engine) == LineTermination::Newline;
    let data = if terminate && !normalized.ends_with('\n') {
        format!("{normalized}\n")
    } else {
        normalized
    };
    Some(ComposedLine {
        message: ClientMessage::input(data),
        echo,
    })
}

/// Raw passthrough: forwards the bytes unchanged. Invalid UTF-8 is replaced
/// lossily since the wire carries text.
pub fn compose_keystrokes(bytes: &[u8]) -> Option<ClientMessage> {
    if bytes.is_empty() {
        return None;
    }
    Some(ClientMessage::input(String::from_utf8_lossy(bytes)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Interrupt,
    EndOfFile,
    Suspend,
    Escape,
}

impl ControlSignal {
    pub fn bytes(self) -> &'static [u8] {
        match self {
            ControlSignal::Interrupt => b"\x03",
            ControlSignal::EndOfFile => b"\x04",
            ControlSignal::Suspend => b"\x1a",
            ControlSignal::Escape => b"\x1b",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ControlSignal::Interrupt => "interrupt",
            ControlSignal::EndOfFile => "eof",
            ControlSignal::Suspend => "suspend",
            ControlSignal::Escape => "escape",
        }
    }
}

impl fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownControl(pub String);

impl fmt::Display for UnknownControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown control signal '{}'", self.0)
    }
}

impl std::error::Error for UnknownControl {}

impl FromStr for ControlSignal {
    type Err = UnknownControl;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interrupt" | "int" | "ctrl-c" => Ok(ControlSignal::Interrupt),
            "eof" | "ctrl-d" => Ok(ControlSignal::EndOfFile),
            "suspend" | "ctrl-z" => Ok(ControlSignal::Suspend),
            "escape" | "esc" => Ok(ControlSignal::Escape),
            other => Err(UnknownControl(other.to_string())),
        }
    }
}

pub fn compose_control(signal: ControlSignal) -> ClientMessage {
    ClientMessage::input(String::from_utf8_lossy(signal.bytes()))
}
