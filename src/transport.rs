use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{SessionError, SessionResult};
use crate::reconciler::{TranscriptEvent, TranscriptKind};

pub const STREAM_CONTENT_TYPE: &str =
    "audio/x-raw;layout=interleaved;rate=16000;format=S16LE;channels=1";

pub fn build_stream_url(service_url: &str, access_token: &str) -> String {
    let separator = if service_url.contains('?') { '&' } else { '?' };
    format!("{service_url}{separator}access_token={access_token}&content_type={STREAM_CONTENT_TYPE}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Connecting,
    Ready,
    Closed,
}

#[derive(Debug)]
struct GateInner {
    state: GateState,
    sent: u64,
    dropped: u64,
}

/// Readiness gate between the synchronous capture side and the socket writer.
/// Frames offered before `Ready` or after `Closed` are counted as dropped and
/// never reach the socket. `Closed` is terminal; the gate cannot reopen.
#[derive(Debug)]
pub struct SendGate {
    inner: Mutex<GateInner>,
}

impl Default for SendGate {
    fn default() -> Self {
        Self::new()
    }
}

impl SendGate {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(GateInner {
                state: GateState::Connecting,
                sent: 0,
                dropped: 0,
            }),
        }
    }

    pub fn mark_ready(&self) {
        let mut inner = self.lock();
        if inner.state == GateState::Connecting {
            inner.state = GateState::Ready;
        }
    }

    pub fn close(&self) {
        self.lock().state = GateState::Closed;
    }

    pub fn state(&self) -> GateState {
        self.lock().state
    }

    /// Records one frame offer. Returns true when the frame may be sent.
    pub fn accept_frame(&self) -> bool {
        let mut inner = self.lock();
        if inner.state == GateState::Ready {
            inner.sent += 1;
            true
        } else {
            inner.dropped += 1;
            false
        }
    }

    pub fn sent_count(&self) -> u64 {
        self.lock().sent
    }

    pub fn dropped_count(&self) -> u64 {
        self.lock().dropped
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireElement {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    elements: Vec<WireElement>,
}

/// Parses one incoming text message. Unknown event types and malformed
/// payloads return None so future service message kinds pass through silently.
pub fn parse_event(text: &str) -> Option<TranscriptEvent> {
    let wire = serde_json::from_str::<WireEvent>(text).ok()?;
    let kind = match wire.kind.as_str() {
        "partial" => TranscriptKind::Partial,
        "final" => TranscriptKind::Final,
        _ => return None,
    };
    let elements = wire
        .elements
        .into_iter()
        .map(|element| element.value)
        .collect();
    Some(TranscriptEvent::new(kind, elements))
}

enum WriterCommand {
    Frame(Vec<u8>),
    Shutdown,
}

/// Cheap clonable sender the capture thread uses. `send_frame` checks the
/// gate synchronously and pushes accepted frames to the writer task in
/// submission order.
#[derive(Clone)]
pub struct TransportHandle {
    gate: std::sync::Arc<SendGate>,
    command_tx: UnboundedSender<WriterCommand>,
}

impl TransportHandle {
    /// Returns true when the frame was accepted for sending.
    pub fn send_frame(&self, frame: Vec<u8>) -> bool {
        if !self.gate.accept_frame() {
            log::debug!("dropped frame of {} bytes: channel not ready", frame.len());
            return false;
        }
        if self.command_tx.send(WriterCommand::Frame(frame)).is_err() {
            self.gate.close();
            return false;
        }
        true
    }

    pub fn close(&self) {
        self.gate.close();
        let _ = self.command_tx.send(WriterCommand::Shutdown);
    }

    pub fn gate(&self) -> &SendGate {
        &self.gate
    }

    pub fn is_ready(&self) -> bool {
        self.gate.state() == GateState::Ready
    }
}

pub struct Transport {
    pub handle: TransportHandle,
    pub events: UnboundedReceiver<TranscriptEvent>,
}

/// Opens the streaming channel. The gate becomes `Ready` only once the socket
/// handshake completes; a writer task owns the write half and a reader task
/// turns service messages into transcript events. Single-shot: any close or
/// error leaves the gate `Closed` and the session decides what happens next.
pub async fn connect(service_url: &str, access_token: &str) -> SessionResult<Transport> {
    let url = build_stream_url(service_url, access_token);
    let (socket, _response) = connect_async(url.as_str()).await.map_err(|error| {
        SessionError::transport_connect_failed(format!(
            "websocket connect to {service_url} failed: {error}"
        ))
    })?;
    log::info!("streaming channel connected to {service_url}");

    let (mut write_half, mut read_half) = socket.split();
    let gate = std::sync::Arc::new(SendGate::new());
    let (command_tx, mut command_rx) = unbounded_channel::<WriterCommand>();
    let (event_tx, event_rx) = unbounded_channel::<TranscriptEvent>();

    let writer_gate = gate.clone();
    tokio::spawn(async move {
        while let Some(command) = command_rx.recv().await {
            match command {
                WriterCommand::Frame(frame) => {
                    if let Err(error) = write_half.send(Message::Binary(frame)).await {
                        log::warn!("frame send failed, closing channel: {error}");
                        writer_gate.close();
                        break;
                    }
                }
                WriterCommand::Shutdown => {
                    let _ = write_half.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        log::debug!("writer task finished");
    });

    let reader_gate = gate.clone();
    tokio::spawn(async move {
        while let Some(incoming) = read_half.next().await {
            match incoming {
                Ok(Message::Text(text)) => {
                    if let Some(event) = parse_event(&text) {
                        if event_tx.send(event).is_err() {
                            break;
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    log::info!("service closed the streaming channel");
                    break;
                }
                Ok(_) => {}
                Err(error) => {
                    log::warn!("streaming channel read error: {error}");
                    break;
                }
            }
        }
        reader_gate.close();
        log::debug!("reader task finished");
    });

    gate.mark_ready();

    Ok(Transport {
        handle: TransportHandle { gate, command_tx },
        events: event_rx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_url_with_token_and_content_type() {
        let url = build_stream_url("wss://stt.example.com/v1/stream", "tok123");
        assert!(url.starts_with("wss://stt.example.com/v1/stream?access_token=tok123"));
        assert!(url.contains("&content_type=audio/x-raw;layout=interleaved"));
        assert!(url.contains("rate=16000"));
        assert!(url.contains("format=S16LE"));
        assert!(url.contains("channels=1"));
    }

    #[test]
    fn appends_with_ampersand_when_url_has_query() {
        let url = build_stream_url("wss://stt.example.com/v1/stream?model=en", "tok");
        assert!(url.contains("?model=en&access_token=tok"));
    }

    #[test]
    fn gate_drops_frames_before_ready() {
        let gate = SendGate::new();
        assert!(!gate.accept_frame());
        assert_eq!(gate.dropped_count(), 1);
        assert_eq!(gate.sent_count(), 0);

        gate.mark_ready();
        assert!(gate.accept_frame());
        assert_eq!(gate.sent_count(), 1);
    }

    #[test]
    fn gate_never_reopens_after_close() {
        let gate = SendGate::new();
        gate.mark_ready();
        gate.close();
        gate.mark_ready();
        assert_eq!(gate.state(), GateState::Closed);
        assert!(!gate.accept_frame());
        assert_eq!(gate.dropped_count(), 1);
    }

    #[test]
    fn parses_partial_and_final_events() {
        let partial = parse_event(
            r#"{"type":"partial","elements":[{"value":"hello"},{"value":"wor"}]}"#,
        )
        .expect("partial should parse");
        assert_eq!(partial.kind, TranscriptKind::Partial);
        assert_eq!(partial.elements, vec!["hello".to_string(), "wor".to_string()]);

        let final_event =
            parse_event(r#"{"type":"final","elements":[{"value":"hello world"}]}"#)
                .expect("final should parse");
        assert_eq!(final_event.kind, TranscriptKind::Final);
    }

    #[test]
    fn ignores_unknown_event_types_and_shapes() {
        assert!(parse_event(r#"{"type":"keepalive"}"#).is_none());
        assert!(parse_event(r#"{"status":"ok"}"#).is_none());
        assert!(parse_event("not json").is_none());
    }

    #[test]
    fn missing_elements_parse_as_empty() {
        let event = parse_event(r#"{"type":"final"}"#).expect("final should parse");
        assert!(event.elements.is_empty());
    }
}
