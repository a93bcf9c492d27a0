//! Deepgram live transcription WebSocket client.
//!
//! # Connection Flow
//!
//! 1. `connect()` - WebSocket handshake with `Token` auth (retried with backoff)
//! 2. `send()` - Stream containerized audio blobs as binary frames
//! 3. Receiver task parses `Results` messages into [`TranscriptSegment`]s
//! 4. `close()` - Send `CloseStream`, flush, clean shutdown
//!
//! Deepgram demarcates utterances itself: every `is_final` result becomes
//! one segment directly, carrying the server's speaker index (diarization)
//! and time offset. No client-side aggregation is needed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
    MaybeTlsStream, WebSocketStream,
};

use super::{connect_with_retries, BackendConfig, BackendError, BackendEvent, CONNECTION_TIMEOUT};
use crate::audio::AudioChunk;
use crate::transcript::TranscriptSegment;

const LISTEN_URL: &str = "wss://api.deepgram.com/v1/listen";
const MODEL: &str = "nova-2";

/// The live socket drops after ~10s without traffic; ping it well inside that.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// How long close() waits for the receiver to drain before giving up.
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

type WsSink = futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

// ============================================================================
// Protocol types
// ============================================================================

/// Control messages sent to Deepgram (audio goes as raw binary frames).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ControlMessage {
    KeepAlive,
    CloseStream,
}

/// Messages received from the Deepgram live API.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ServerMessage {
    Results {
        channel: ResultChannel,
        #[serde(default)]
        is_final: bool,
        /// Utterance start offset in seconds from stream start.
        #[serde(default)]
        start: f64,
    },
    Metadata {},
    UtteranceEnd {},
    SpeechStarted {},
    /// Catch-all so future message types never fail deserialization.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
struct ResultChannel {
    alternatives: Vec<ResultAlternative>,
}

#[derive(Debug, Clone, Deserialize)]
struct ResultAlternative {
    transcript: String,
    #[serde(default)]
    words: Vec<ResultWord>,
}

#[derive(Debug, Clone, Deserialize)]
struct ResultWord {
    #[serde(default)]
    speaker: Option<u32>,
}

impl ServerMessage {
    /// Turn a finalized result into a normalized segment, if it carries text.
    fn into_segment(self) -> Option<TranscriptSegment> {
        let ServerMessage::Results {
            channel,
            is_final,
            start,
        } = self
        else {
            return None;
        };

        if !is_final {
            return None;
        }

        let alternative = channel.alternatives.into_iter().next()?;
        let text = alternative.transcript.trim().to_string();
        if text.is_empty() {
            return None;
        }

        let speaker_label = alternative
            .words
            .first()
            .and_then(|w| w.speaker)
            .map(|s| s.to_string());

        Some(TranscriptSegment {
            text,
            speaker_label,
            offset_millis: Some((start * 1000.0).round() as u64),
            is_final: true,
        })
    }
}

// ============================================================================
// Session
// ============================================================================

/// Handle to an active Deepgram live session.
pub struct DeepgramSession {
    write: Arc<Mutex<WsSink>>,
    /// Cleared by the receiver task on connectivity loss; send() becomes a no-op.
    connected: Arc<AtomicBool>,
    /// Set by close() so the receiver reports Closed instead of Disconnected.
    closing: Arc<AtomicBool>,
    receiver_task: tokio::task::JoinHandle<()>,
    keepalive_task: tokio::task::JoinHandle<()>,
}

impl DeepgramSession {
    /// Connect to the Deepgram live API. Ready to accept audio on return.
    pub async fn connect(
        api_key: &str,
        config: &BackendConfig,
        event_tx: mpsc::Sender<BackendEvent>,
    ) -> Result<Self, BackendError> {
        connect_with_retries("Deepgram", || {
            Self::try_connect(api_key, config, event_tx.clone())
        })
        .await
    }

    async fn try_connect(
        api_key: &str,
        config: &BackendConfig,
        event_tx: mpsc::Sender<BackendEvent>,
    ) -> Result<Self, BackendError> {
        let url = format!(
            "{}?model={}&language={}&smart_format=true&diarize=true",
            LISTEN_URL, MODEL, config.language
        );

        let mut request = url
            .into_client_request()
            .map_err(|e| BackendError::ConnectionFailed(e.to_string()))?;

        request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&format!("Token {}", api_key))
                .map_err(|e| BackendError::AuthenticationFailed(e.to_string()))?,
        );

        log::info!("Connecting to Deepgram live API ({})...", MODEL);

        let (ws_stream, _response) = timeout(
            CONNECTION_TIMEOUT,
            connect_async_with_config(request, None, false),
        )
        .await
        .map_err(|_| BackendError::ConnectionFailed("Connection timeout".to_string()))?
        .map_err(|e| match e {
            tokio_tungstenite::tungstenite::Error::Http(ref resp)
                if resp.status().as_u16() == 401 || resp.status().as_u16() == 403 =>
            {
                BackendError::AuthenticationFailed(format!("HTTP {}", resp.status()))
            }
            other => BackendError::ConnectionFailed(other.to_string()),
        })?;

        log::info!("Deepgram connected");

        let (write, mut read) = ws_stream.split();
        let write = Arc::new(Mutex::new(write));
        let connected = Arc::new(AtomicBool::new(true));
        let closing = Arc::new(AtomicBool::new(false));

        // Receiver task: parse results and forward segments until the
        // socket ends, then report how it ended.
        let receiver_task = {
            let connected = connected.clone();
            let closing = closing.clone();
            tokio::spawn(async move {
                let reason = loop {
                    match read.next().await {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ServerMessage>(&text) {
                                Ok(msg) => {
                                    if let Some(segment) = msg.into_segment() {
                                        if event_tx
                                            .send(BackendEvent::Segment(segment))
                                            .await
                                            .is_err()
                                        {
                                            log::debug!("Segment receiver closed");
                                            break None;
                                        }
                                    }
                                }
                                Err(e) => log::warn!("Failed to parse Deepgram message: {}", e),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            break Some("connection closed".to_string());
                        }
                        Some(Err(e)) => break Some(e.to_string()),
                        Some(Ok(_)) => {} // Ignore ping/pong/binary
                    }
                };

                connected.store(false, Ordering::SeqCst);

                if let Some(reason) = reason {
                    let event = if closing.load(Ordering::SeqCst) {
                        BackendEvent::Closed
                    } else {
                        log::warn!("Deepgram disconnected: {}", reason);
                        BackendEvent::Disconnected(reason)
                    };
                    let _ = event_tx.send(event).await;
                }

                log::debug!("Deepgram receiver task exiting");
            })
        };

        // Keepalive task: the live socket times out on silence.
        let keepalive_task = {
            let write = write.clone();
            let connected = connected.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(KEEPALIVE_INTERVAL);
                interval.tick().await; // first tick fires immediately
                loop {
                    interval.tick().await;
                    if !connected.load(Ordering::SeqCst) {
                        break;
                    }
                    let msg = match serde_json::to_string(&ControlMessage::KeepAlive) {
                        Ok(json) => Message::Text(json),
                        Err(_) => break,
                    };
                    if write.lock().await.send(msg).await.is_err() {
                        break;
                    }
                }
            })
        };

        Ok(Self {
            write,
            connected,
            closing,
            receiver_task,
            keepalive_task,
        })
    }

    /// Forward one containerized audio chunk as a binary frame.
    /// No-op once the connection has dropped.
    pub async fn send(&mut self, chunk: AudioChunk) -> Result<(), BackendError> {
        if !self.connected.load(Ordering::SeqCst) {
            log::debug!("Deepgram not connected, dropping audio chunk");
            return Ok(());
        }

        self.write
            .lock()
            .await
            .send(Message::Binary(chunk.data))
            .await
            .map_err(|e| BackendError::SendFailed(e.to_string()))
    }

    /// Gracefully finish the stream. Deepgram flushes its pending results
    /// before acknowledging `CloseStream`; the receiver drains them and
    /// emits `Closed` on the event channel.
    pub async fn close(mut self) {
        log::info!("Closing Deepgram session...");
        self.closing.store(true, Ordering::SeqCst);
        self.keepalive_task.abort();

        {
            let mut write = self.write.lock().await;
            if let Ok(json) = serde_json::to_string(&ControlMessage::CloseStream) {
                if let Err(e) = write.send(Message::Text(json)).await {
                    log::warn!("Error sending CloseStream: {}", e);
                }
            }
            if let Err(e) = write.close().await {
                log::warn!("Error closing WebSocket: {}", e);
            }
        }

        if timeout(CLOSE_DRAIN_TIMEOUT, &mut self.receiver_task)
            .await
            .is_err()
        {
            log::warn!("Deepgram receiver did not drain in time");
        }
    }
}

impl Drop for DeepgramSession {
    fn drop(&mut self) {
        // close() consumes self; a plain drop still reaps the tasks
        self.receiver_task.abort();
        self.keepalive_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FINAL_RESULT: &str = r#"{
        "type": "Results",
        "channel_index": [0, 1],
        "duration": 1.98,
        "start": 2.5,
        "is_final": true,
        "channel": {
            "alternatives": [{
                "transcript": "hello there",
                "confidence": 0.99,
                "words": [
                    {"word": "hello", "start": 2.5, "end": 2.9, "speaker": 1},
                    {"word": "there", "start": 2.9, "end": 3.2, "speaker": 1}
                ]
            }]
        }
    }"#;

    #[test]
    fn final_result_becomes_segment_with_attribution() {
        let msg: ServerMessage = serde_json::from_str(FINAL_RESULT).unwrap();
        let segment = msg.into_segment().expect("segment");

        assert_eq!(segment.text, "hello there");
        assert_eq!(segment.speaker_label.as_deref(), Some("1"));
        assert_eq!(segment.offset_millis, Some(2500));
        assert!(segment.is_final);
    }

    #[test]
    fn interim_result_is_dropped() {
        let json = FINAL_RESULT.replace("\"is_final\": true", "\"is_final\": false");
        let msg: ServerMessage = serde_json::from_str(&json).unwrap();
        assert!(msg.into_segment().is_none());
    }

    #[test]
    fn empty_transcript_is_dropped() {
        let json = r#"{
            "type": "Results",
            "is_final": true,
            "start": 0.0,
            "channel": {"alternatives": [{"transcript": "  ", "words": []}]}
        }"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert!(msg.into_segment().is_none());
    }

    #[test]
    fn missing_words_means_no_speaker_label() {
        let json = r#"{
            "type": "Results",
            "is_final": true,
            "start": 1.0,
            "channel": {"alternatives": [{"transcript": "no diarization"}]}
        }"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        let segment = msg.into_segment().unwrap();
        assert!(segment.speaker_label.is_none());
        assert_eq!(segment.offset_millis, Some(1000));
    }

    #[test]
    fn unknown_message_type_parses_to_unknown() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type": "SomeFutureThing", "data": 1}"#).unwrap();
        assert!(matches!(msg, ServerMessage::Unknown));
        assert!(msg.into_segment().is_none());
    }

    #[test]
    fn metadata_is_ignored() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type": "Metadata", "request_id": "abc"}"#).unwrap();
        assert!(matches!(msg, ServerMessage::Metadata {}));
    }

    #[test]
    fn control_messages_serialize_with_type_tag() {
        let json = serde_json::to_string(&ControlMessage::CloseStream).unwrap();
        assert_eq!(json, r#"{"type":"CloseStream"}"#);

        let json = serde_json::to_string(&ControlMessage::KeepAlive).unwrap();
        assert_eq!(json, r#"{"type":"KeepAlive"}"#);
    }
}
