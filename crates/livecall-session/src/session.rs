//! The single bidirectional streaming channel to the agent service.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::protocol::{MediaChunk, RealtimeInputMessage, ServerMessage, SetupMessage};
use livecall_foundation::SessionSettings;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("API key is not set")]
    MissingApiKey,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),
}

/// Inbound events dispatched from the reader task.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Setup acknowledged by the peer.
    Ready,
    /// Decoded 24 kHz PCM16 payload.
    Audio(Vec<u8>),
    /// The peer cut its own utterance short (user barge-in).
    Interrupted,
    /// The peer finished a response turn.
    TurnComplete,
    /// Transport closed gracefully.
    Closed,
    /// Transport failed.
    TransportError(String),
}

/// Cheap cloneable send half, handed to the uplink tasks.
#[derive(Clone)]
pub struct SessionSender {
    out_tx: mpsc::UnboundedSender<WsMessage>,
    closed: Arc<AtomicBool>,
}

impl SessionSender {
    /// Best-effort send: a chunk that cannot be queued (session closing or
    /// writer gone) is dropped. No acknowledgment is awaited.
    pub fn send(&self, chunk: MediaChunk) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        match serde_json::to_string(&RealtimeInputMessage::single(chunk)) {
            Ok(text) => {
                if self.out_tx.send(WsMessage::Text(text)).is_err() {
                    tracing::debug!("Session writer gone; dropping media chunk");
                }
            }
            Err(e) => tracing::warn!("Failed to encode media chunk: {}", e),
        }
    }
}

/// One live session. Owns the writer and reader tasks; exactly one exists
/// per call, and a new connect must tear the previous one down first.
pub struct LiveSession {
    sender: SessionSender,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
    closed: Arc<AtomicBool>,
}

impl LiveSession {
    /// Open the channel, send the session configuration, and start the
    /// writer/reader tasks. Resolves once the transport is open; setup
    /// acknowledgment arrives later as [`SessionEvent::Ready`].
    pub async fn connect(
        settings: &SessionSettings,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>), SessionError> {
        if settings.api_key.is_empty() {
            return Err(SessionError::MissingApiKey);
        }
        let url = format!("{}?key={}", settings.endpoint, settings.api_key);
        tracing::info!("Connecting session channel to {}", settings.endpoint);

        let (ws, _response) = tokio_tungstenite::connect_async(&url).await?;
        let (mut write, mut read) = ws.split();

        let setup = SetupMessage::new(
            &settings.model,
            &settings.voice,
            &settings.system_instruction,
        );
        write
            .send(WsMessage::Text(serde_json::to_string(&setup)?))
            .await?;
        tracing::info!("Session channel open, setup sent");

        let closed = Arc::new(AtomicBool::new(false));
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WsMessage>();
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(64);

        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let is_close = matches!(msg, WsMessage::Close(_));
                if let Err(e) = write.send(msg).await {
                    tracing::warn!("Session write failed: {}", e);
                    break;
                }
                if is_close {
                    break;
                }
            }
        });

        let reader = {
            let closed = closed.clone();
            tokio::spawn(async move {
                loop {
                    let Some(item) = read.next().await else {
                        let _ = event_tx.send(SessionEvent::Closed).await;
                        break;
                    };
                    match item {
                        Ok(WsMessage::Text(text)) => dispatch(&text, &event_tx).await,
                        Ok(WsMessage::Binary(bytes)) => {
                            // The service is free to deliver JSON in binary
                            // frames.
                            match std::str::from_utf8(&bytes) {
                                Ok(text) => dispatch(text, &event_tx).await,
                                Err(_) => tracing::debug!("Ignoring non-UTF8 binary frame"),
                            }
                        }
                        Ok(WsMessage::Close(_)) => {
                            let _ = event_tx.send(SessionEvent::Closed).await;
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            if !closed.load(Ordering::SeqCst) {
                                let _ = event_tx
                                    .send(SessionEvent::TransportError(e.to_string()))
                                    .await;
                            }
                            break;
                        }
                    }
                }
            })
        };

        let session = Self {
            sender: SessionSender {
                out_tx,
                closed: closed.clone(),
            },
            writer,
            reader,
            closed,
        };
        Ok((session, event_rx))
    }

    pub fn sender(&self) -> SessionSender {
        self.sender.clone()
    }

    /// Best-effort send of one media chunk.
    pub fn send(&self, chunk: MediaChunk) {
        self.sender.send(chunk);
    }

    /// Close the channel: queue a close frame, give the writer a bounded
    /// window to flush it, then stop both tasks. Never errors; consuming
    /// the handle makes a second close impossible by construction.
    pub async fn close(mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.sender.out_tx.send(WsMessage::Close(None));
        }
        let _ = tokio::time::timeout(Duration::from_millis(500), &mut self.writer).await;
        self.writer.abort();
        self.reader.abort();
        tracing::info!("Session channel closed");
    }
}

/// Parse one inbound message and route its contents. Malformed input is
/// logged and dropped; the reader loop never dies on bad data.
async fn dispatch(text: &str, event_tx: &mpsc::Sender<SessionEvent>) {
    let msg: ServerMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!("Unparseable server message ({}): {:.120}", e, text);
            return;
        }
    };

    if msg.setup_complete.is_some() {
        let _ = event_tx.send(SessionEvent::Ready).await;
    }
    if let Some(data) = msg.audio_data() {
        match crate::protocol::decode_payload(data) {
            Ok(bytes) => {
                let _ = event_tx.send(SessionEvent::Audio(bytes)).await;
            }
            Err(e) => tracing::warn!("Dropping undecodable audio payload: {}", e),
        }
    }
    if msg.is_interrupted() {
        let _ = event_tx.send(SessionEvent::Interrupted).await;
    }
    if msg.is_turn_complete() {
        let _ = event_tx.send(SessionEvent::TurnComplete).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde_json::json;
    use tokio::time::timeout;

    fn test_settings(addr: std::net::SocketAddr) -> SessionSettings {
        SessionSettings {
            endpoint: format!("ws://{}/", addr),
            api_key: "test-key".to_string(),
            model: "models/test-model".to_string(),
            voice: "Zephyr".to_string(),
            system_instruction: "Be brief.".to_string(),
        }
    }

    async fn recv_event(rx: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event within timeout")
            .expect("event channel open")
    }

    #[tokio::test]
    async fn connect_requires_api_key() {
        let mut settings = SessionSettings::default();
        settings.api_key.clear();
        match LiveSession::connect(&settings).await {
            Err(SessionError::MissingApiKey) => {}
            other => panic!("expected MissingApiKey, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn full_round_trip_against_local_peer() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut write, mut read) = ws.split();

            // The first client message is the session configuration.
            let setup = read.next().await.unwrap().unwrap();
            let v: serde_json::Value = serde_json::from_str(setup.to_text().unwrap()).unwrap();
            assert_eq!(v["setup"]["model"], "models/test-model");
            assert_eq!(v["setup"]["generationConfig"]["responseModalities"][0], "AUDIO");

            write
                .send(WsMessage::Text(r#"{"setupComplete": {}}"#.to_string()))
                .await
                .unwrap();

            let audio = json!({
                "serverContent": {
                    "modelTurn": {
                        "parts": [{
                            "inlineData": {
                                "mimeType": "audio/pcm;rate=24000",
                                "data": STANDARD.encode([1u8, 0, 2, 0])
                            }
                        }]
                    }
                }
            });
            write
                .send(WsMessage::Text(audio.to_string()))
                .await
                .unwrap();
            write
                .send(WsMessage::Text(
                    r#"{"serverContent": {"interrupted": true}}"#.to_string(),
                ))
                .await
                .unwrap();

            // The client streams media chunks back.
            let input = read.next().await.unwrap().unwrap();
            let v: serde_json::Value = serde_json::from_str(input.to_text().unwrap()).unwrap();
            assert_eq!(
                v["realtimeInput"]["mediaChunks"][0]["mimeType"],
                "audio/pcm;rate=16000"
            );
        });

        let (session, mut events) = LiveSession::connect(&test_settings(addr)).await.unwrap();

        assert_eq!(recv_event(&mut events).await, SessionEvent::Ready);
        assert_eq!(
            recv_event(&mut events).await,
            SessionEvent::Audio(vec![1, 0, 2, 0])
        );
        assert_eq!(recv_event(&mut events).await, SessionEvent::Interrupted);

        session.send(MediaChunk::audio("AAAA".to_string()));
        server.await.unwrap();
        session.close().await;
    }

    #[tokio::test]
    async fn peer_close_surfaces_closed_event() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _setup = ws.next().await;
            ws.close(None).await.unwrap();
        });

        let (session, mut events) = LiveSession::connect(&test_settings(addr)).await.unwrap();
        assert_eq!(recv_event(&mut events).await, SessionEvent::Closed);
        server.await.unwrap();

        // Sends after the peer is gone are dropped, not errors.
        session.send(MediaChunk::audio("AAAA".to_string()));
        session.close().await;
    }
}
