//! Gemini Live API WebSocket client.
//!
//! # Connection Flow
//!
//! 1. `connect()` - WebSocket handshake, send `setup`, wait for `setupComplete`
//! 2. `send()` - Stream base64 PCM frames via `realtimeInput`
//! 3. Receiver task buffers `inputTranscription` fragments through the
//!    [`SegmentAggregator`] and emits sentence-scale segments
//! 4. `close()` - Flush the remainder, clean shutdown
//!
//! The model is instructed to stay silent; only input transcription is
//! consumed. Coaching comes from the separate reasoning endpoint, never
//! from this stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::{
    connect_async_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};

use super::aggregator::{FragmentOutcome, SegmentAggregator, IDLE_FLUSH_DELAY};
use super::{connect_with_retries, BackendError, BackendEvent, CONNECTION_TIMEOUT, SESSION_TIMEOUT};
use crate::audio::AudioChunk;
use crate::transcript::TranscriptSegment;

const BIDI_URL: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

const MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-12-2025";

const PCM_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Minimal system instruction: transcription comes from
/// `inputAudioTranscription`, so the model itself should produce nothing.
/// This keeps model output (and cost) near zero.
const SYSTEM_INSTRUCTION: &str = "You are a silent listener. Do not respond or speak unless \
     directly asked a question. Your role is to simply listen to the audio input.";

/// How long close() waits for the receiver to flush and drain.
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

type WsSink = futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

// ============================================================================
// Protocol types
// ============================================================================

#[derive(Debug, Serialize)]
struct SetupMessage<'a> {
    setup: Setup<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup<'a> {
    model: &'a str,
    generation_config: GenerationConfig<'a>,
    system_instruction: Content<'a>,
    /// Presence of this (empty) object enables input transcription.
    input_audio_transcription: EmptyObject,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    /// Must be AUDIO for the session to accept audio input.
    response_modalities: [&'a str; 1],
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: [TextPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct EmptyObject {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputMessage {
    realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
struct RealtimeInput {
    audio: AudioBlob,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AudioBlob {
    /// Base64-encoded PCM16 little-endian samples.
    data: String,
    mime_type: &'static str,
}

impl RealtimeInputMessage {
    fn from_pcm(data: &[u8]) -> Self {
        Self {
            realtime_input: RealtimeInput {
                audio: AudioBlob {
                    data: STANDARD.encode(data),
                    mime_type: PCM_MIME_TYPE,
                },
            },
        }
    }
}

/// Server messages are plain objects whose shape depends on which fields
/// are present, not a tagged union.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ServerContent {
    input_transcription: Option<InputTranscription>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InputTranscription {
    text: Option<String>,
}

impl ServerMessage {
    fn transcription_fragment(self) -> Option<String> {
        self.server_content?.input_transcription?.text
    }
}

// ============================================================================
// Session
// ============================================================================

/// Handle to an active Gemini Live session.
pub struct GeminiLiveSession {
    write: WsSink,
    /// Cleared by the receiver task on connectivity loss; send() becomes a no-op.
    connected: Arc<AtomicBool>,
    /// Set by close() so the receiver reports Closed instead of Disconnected.
    closing: Arc<AtomicBool>,
    receiver_task: tokio::task::JoinHandle<()>,
}

impl GeminiLiveSession {
    /// Connect and configure a Gemini Live session. Ready on return.
    pub async fn connect(
        api_key: &str,
        event_tx: mpsc::Sender<BackendEvent>,
    ) -> Result<Self, BackendError> {
        connect_with_retries("Gemini Live", || {
            Self::try_connect(api_key, event_tx.clone())
        })
        .await
    }

    async fn try_connect(
        api_key: &str,
        event_tx: mpsc::Sender<BackendEvent>,
    ) -> Result<Self, BackendError> {
        let url = format!("{}?key={}", BIDI_URL, api_key);

        log::info!("Connecting to Gemini Live API ({})...", MODEL);

        let (ws_stream, _response) =
            timeout(CONNECTION_TIMEOUT, connect_async_with_config(url, None, false))
                .await
                .map_err(|_| BackendError::ConnectionFailed("Connection timeout".to_string()))?
                .map_err(|e| BackendError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        // Configure the session before any audio flows
        let setup = SetupMessage {
            setup: Setup {
                model: MODEL,
                generation_config: GenerationConfig {
                    response_modalities: ["AUDIO"],
                },
                system_instruction: Content {
                    parts: [TextPart {
                        text: SYSTEM_INSTRUCTION,
                    }],
                },
                input_audio_transcription: EmptyObject {},
            },
        };
        let setup_json = serde_json::to_string(&setup)
            .map_err(|e| BackendError::ProtocolError(e.to_string()))?;
        write
            .send(Message::Text(setup_json))
            .await
            .map_err(|e| BackendError::SendFailed(e.to_string()))?;

        wait_for_setup_complete(&mut read).await?;
        log::info!("Gemini Live session configured");

        let connected = Arc::new(AtomicBool::new(true));
        let closing = Arc::new(AtomicBool::new(false));

        let receiver_task = tokio::spawn(run_receiver(
            read,
            event_tx,
            connected.clone(),
            closing.clone(),
        ));

        Ok(Self {
            write,
            connected,
            closing,
            receiver_task,
        })
    }

    /// Forward one linear-PCM chunk as a base64 realtime input frame.
    /// No-op once the connection has dropped.
    pub async fn send(&mut self, chunk: AudioChunk) -> Result<(), BackendError> {
        if !self.connected.load(Ordering::SeqCst) {
            log::debug!("Gemini Live not connected, dropping audio chunk");
            return Ok(());
        }

        let msg = RealtimeInputMessage::from_pcm(&chunk.data);
        let json =
            serde_json::to_string(&msg).map_err(|e| BackendError::ProtocolError(e.to_string()))?;

        self.write
            .send(Message::Text(json))
            .await
            .map_err(|e| BackendError::SendFailed(e.to_string()))
    }

    /// Terminate the session. The receiver flushes any buffered partial
    /// segment before `Closed` lands on the event channel.
    pub async fn close(mut self) {
        log::info!("Closing Gemini Live session...");
        self.closing.store(true, Ordering::SeqCst);

        if let Err(e) = self.write.close().await {
            log::warn!("Error closing WebSocket: {}", e);
        }

        if timeout(CLOSE_DRAIN_TIMEOUT, &mut self.receiver_task)
            .await
            .is_err()
        {
            log::warn!("Gemini Live receiver did not drain in time");
        }
    }
}

impl Drop for GeminiLiveSession {
    fn drop(&mut self) {
        self.receiver_task.abort();
    }
}

async fn wait_for_setup_complete(read: &mut WsSource) -> Result<(), BackendError> {
    timeout(SESSION_TIMEOUT, async {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    if let Some(msg) = parse_server_message(text.as_bytes()) {
                        if msg.setup_complete.is_some() {
                            return Ok(());
                        }
                    }
                }
                // The Live API often delivers JSON as binary frames
                Ok(Message::Binary(bytes)) => {
                    if let Some(msg) = parse_server_message(&bytes) {
                        if msg.setup_complete.is_some() {
                            return Ok(());
                        }
                    }
                }
                Ok(Message::Close(frame)) => {
                    return Err(BackendError::Disconnected(format!(
                        "Closed during setup: {:?}",
                        frame
                    )));
                }
                Err(e) => return Err(BackendError::ProtocolError(e.to_string())),
                _ => {}
            }
        }
        Err(BackendError::Disconnected("Stream ended during setup".to_string()))
    })
    .await
    .map_err(|_| BackendError::ConnectionFailed("Setup confirmation timeout".to_string()))?
}

fn parse_server_message(bytes: &[u8]) -> Option<ServerMessage> {
    match serde_json::from_slice::<ServerMessage>(bytes) {
        Ok(msg) => Some(msg),
        Err(e) => {
            log::warn!("Failed to parse Gemini Live message: {}", e);
            None
        }
    }
}

/// Receiver loop: drive the aggregator from transcription fragments and
/// the idle-flush timer. Punctuation flushes clear the pending deadline,
/// so they always win the race against the timer.
async fn run_receiver(
    mut read: WsSource,
    event_tx: mpsc::Sender<BackendEvent>,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
) {
    let mut aggregator = SegmentAggregator::new();
    let mut idle_deadline: Option<Instant> = None;

    let reason = loop {
        let idle_timer = async {
            match idle_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = idle_timer => {
                idle_deadline = None;
                if let Some(text) = aggregator.flush_idle() {
                    if emit_segment(&event_tx, text).await.is_err() {
                        break None;
                    }
                }
            }
            msg = read.next() => {
                let fragment = match msg {
                    Some(Ok(Message::Text(text))) => {
                        parse_server_message(text.as_bytes())
                            .and_then(ServerMessage::transcription_fragment)
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        parse_server_message(&bytes)
                            .and_then(ServerMessage::transcription_fragment)
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break Some("connection closed".to_string());
                    }
                    Some(Err(e)) => break Some(e.to_string()),
                    Some(Ok(_)) => None, // Ignore ping/pong
                };

                if let Some(fragment) = fragment {
                    match aggregator.push_fragment(&fragment) {
                        FragmentOutcome::Flush(text) => {
                            idle_deadline = None;
                            if emit_segment(&event_tx, text).await.is_err() {
                                break None;
                            }
                        }
                        FragmentOutcome::ArmIdleTimer => {
                            idle_deadline = Some(Instant::now() + IDLE_FLUSH_DELAY);
                        }
                        FragmentOutcome::Ignored => {}
                    }
                }
            }
        }
    };

    connected.store(false, Ordering::SeqCst);

    // Shutdown or disconnect: never drop buffered text
    if let Some(text) = aggregator.flush_remainder() {
        let _ = emit_segment(&event_tx, text).await;
    }

    if let Some(reason) = reason {
        let event = if closing.load(Ordering::SeqCst) {
            BackendEvent::Closed
        } else {
            log::warn!("Gemini Live disconnected: {}", reason);
            BackendEvent::Disconnected(reason)
        };
        let _ = event_tx.send(event).await;
    }

    log::debug!("Gemini Live receiver task exiting");
}

async fn emit_segment(
    event_tx: &mpsc::Sender<BackendEvent>,
    text: String,
) -> Result<(), mpsc::error::SendError<BackendEvent>> {
    event_tx
        .send(BackendEvent::Segment(TranscriptSegment::text_only(text)))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_message_serialization() {
        let setup = SetupMessage {
            setup: Setup {
                model: MODEL,
                generation_config: GenerationConfig {
                    response_modalities: ["AUDIO"],
                },
                system_instruction: Content {
                    parts: [TextPart { text: "listen" }],
                },
                input_audio_transcription: EmptyObject {},
            },
        };
        let json = serde_json::to_string(&setup).unwrap();

        assert!(json.contains("\"setup\":"));
        assert!(json.contains("\"generationConfig\":"));
        assert!(json.contains("\"responseModalities\":[\"AUDIO\"]"));
        assert!(json.contains("\"inputAudioTranscription\":{}"));
        assert!(json.contains(MODEL));
    }

    #[test]
    fn realtime_input_encodes_pcm_as_base64() {
        let msg = RealtimeInputMessage::from_pcm(&[0x34, 0x12, 0x78, 0x56]);
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"realtimeInput\":"));
        assert!(json.contains("\"mimeType\":\"audio/pcm;rate=16000\""));

        let encoded = STANDARD.encode([0x34u8, 0x12, 0x78, 0x56]);
        assert!(json.contains(&encoded));
    }

    #[test]
    fn transcription_fragment_extraction() {
        let json = r#"{"serverContent":{"inputTranscription":{"text":"hello "}}}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.transcription_fragment().as_deref(), Some("hello "));
    }

    #[test]
    fn setup_complete_detection() {
        let msg: ServerMessage = serde_json::from_str(r#"{"setupComplete":{}}"#).unwrap();
        assert!(msg.setup_complete.is_some());
        assert!(msg.transcription_fragment().is_none());
    }

    #[test]
    fn unrelated_server_content_yields_no_fragment() {
        let json = r#"{"serverContent":{"turnComplete":true}}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert!(msg.transcription_fragment().is_none());
    }

    #[tokio::test]
    async fn receiver_event_channel_closed_stops_emission() {
        let (tx, rx) = mpsc::channel::<BackendEvent>(1);
        drop(rx);
        assert!(emit_segment(&tx, "text".to_string()).await.is_err());
    }
}
