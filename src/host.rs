//! Line-delimited JSON host adapters
//!
//! The binary talks to its embedding page over stdio. Every inbound line
//! carries a `source` naming where it came from; every outbound line carries
//! a `channel` naming who should act on it.

use crate::bridge::AvatarRuntime;
use crate::error::{BridgeError, PlaybackError, TransportError};
use crate::ids::ConversationId;
use crate::protocol::{AudioClip, OutboundEvent};
use crate::runtime::{AudioSink, Event, PlaybackOutcome, TransportSink};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Serializes whole lines onto a shared writer
#[derive(Clone)]
pub struct LineWriter {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl LineWriter {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(out))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Write `body` tagged with `channel` as one line
    pub fn write_line(&self, channel: &str, body: &impl Serialize) -> io::Result<()> {
        let mut value = serde_json::to_value(body)?;
        if let Value::Object(map) = &mut value {
            map.insert("channel".to_string(), Value::String(channel.to_string()));
        } else {
            value = json!({"channel": channel, "body": value});
        }
        let line = serde_json::to_string(&value)?;

        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(out, "{line}")?;
        out.flush()
    }
}

/// Avatar runtime reached through the host page
pub struct StdoutAvatarRuntime {
    writer: LineWriter,
}

impl StdoutAvatarRuntime {
    pub fn new(writer: LineWriter) -> Self {
        Self { writer }
    }
}

impl AvatarRuntime for StdoutAvatarRuntime {
    fn send_message(&self, object: &str, method: &str, payload: &str) -> Result<(), BridgeError> {
        self.writer
            .write_line(
                "avatar",
                &json!({"object": object, "method": method, "payload": payload}),
            )
            .map_err(|e| BridgeError::delivery(object, method, e.to_string()))
    }
}

/// Audio played by the host page; completions come back as `playback` lines
pub struct HostAudioSink {
    writer: LineWriter,
}

impl HostAudioSink {
    pub fn new(writer: LineWriter) -> Self {
        Self { writer }
    }
}

impl AudioSink for HostAudioSink {
    fn play(&self, clip: &AudioClip, conversation_id: &ConversationId) -> Result<(), PlaybackError> {
        if clip.is_empty() {
            return Err(PlaybackError::EmptyClip);
        }
        self.writer
            .write_line(
                "audio",
                &json!({"command": "play", "conversationId": conversation_id, "clip": clip}),
            )
            .map_err(|e| PlaybackError::Rejected(e.to_string()))
    }

    fn stop_all(&self) {
        if let Err(e) = self.writer.write_line("audio", &json!({"command": "stop_all"})) {
            tracing::warn!(error = %e, "Failed to stop audio");
        }
    }
}

/// Server transport relayed by the host page
pub struct StdoutTransport {
    writer: LineWriter,
}

impl StdoutTransport {
    pub fn new(writer: LineWriter) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl TransportSink for StdoutTransport {
    async fn emit(&self, event: &OutboundEvent) -> Result<(), TransportError> {
        self.writer
            .write_line("transport", event)
            .map_err(TransportError::from_write)
    }
}

#[derive(Debug, Error)]
pub enum InboundError {
    #[error("Malformed inbound line: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Inbound line is not UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("Unknown inbound source: {0}")]
    UnknownSource(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaybackReport {
    conversation_id: ConversationId,
    #[serde(default)]
    error: Option<String>,
}

/// Parse one raw inbound line, without its newline, into a conductor event.
///
/// Returns `Ok(None)` for blank lines.
pub fn parse_inbound_bytes(line: &[u8]) -> Result<Option<Event>, InboundError> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let line = std::str::from_utf8(line)?;
    if line.trim().is_empty() {
        return Ok(None);
    }
    parse_inbound_line(line).map(Some)
}

/// Parse one inbound line into a conductor event
pub fn parse_inbound_line(line: &str) -> Result<Event, InboundError> {
    let mut value: Value = serde_json::from_str(line)?;
    let source = value
        .as_object_mut()
        .and_then(|map| map.remove("source"))
        .and_then(|s| s.as_str().map(str::to_string))
        .unwrap_or_default();

    let event = match source.as_str() {
        "transport" => Event::Transport(serde_json::from_value(value)?),
        "runtime" => Event::Runtime(serde_json::from_value(value)?),
        "user" => Event::User(serde_json::from_value(value)?),
        "playback" => {
            let report: PlaybackReport = serde_json::from_value(value)?;
            Event::Playback {
                conversation_id: report.conversation_id,
                outcome: report
                    .error
                    .map_or(PlaybackOutcome::Finished, PlaybackOutcome::Failed),
            }
        }
        _ => return Err(InboundError::UnknownSource(source)),
    };
    Ok(event)
}
