//! Streaming transcription backends.
//!
//! Two interchangeable remote engines sit behind one session contract:
//!
//! - **Deepgram** live WebSocket: the protocol demarcates finalized
//!   utterances itself, with server-side diarization and timing.
//! - **Gemini Live** WebSocket: continuous token-level transcription with
//!   no utterance boundaries; fragments go through the [`aggregator`].
//!
//! The backend is chosen once at session start and fixed for the session's
//! lifetime, so the live session is a tagged union rather than a trait
//! object. Both variants emit normalized [`TranscriptSegment`]s and report
//! connectivity loss through the same event channel.

pub mod aggregator;
mod deepgram;
mod gemini_live;

pub use deepgram::DeepgramSession;
pub use gemini_live::GeminiLiveSession;

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;

use crate::audio::{AudioChunk, AudioEncoding};
use crate::transcript::TranscriptSegment;

/// Connection timeout for the initial WebSocket handshake.
pub(crate) const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the backend's session-ready confirmation.
pub(crate) const SESSION_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum retry attempts for the initial connection.
pub(crate) const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (doubles each retry).
pub(crate) const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Errors that can occur on a backend session.
#[derive(Debug, Clone)]
pub enum BackendError {
    ConnectionFailed(String),
    AuthenticationFailed(String),
    ProtocolError(String),
    Disconnected(String),
    SendFailed(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::ConnectionFailed(e) => {
                write!(f, "Failed to connect to transcription backend: {}", e)
            }
            BackendError::AuthenticationFailed(e) => write!(f, "Authentication failed: {}", e),
            BackendError::ProtocolError(e) => write!(f, "WebSocket protocol error: {}", e),
            BackendError::Disconnected(e) => write!(f, "WebSocket disconnected: {}", e),
            BackendError::SendFailed(e) => write!(f, "Failed to send audio: {}", e),
        }
    }
}

impl std::error::Error for BackendError {}

/// Which transcription engine to use. Selected once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Deepgram,
    #[serde(rename = "gemini")]
    GeminiLive,
}

impl BackendKind {
    /// The physical audio encoding this backend consumes.
    pub fn chunk_encoding(&self) -> AudioEncoding {
        match self {
            BackendKind::Deepgram => AudioEncoding::Containerized,
            BackendKind::GeminiLive => AudioEncoding::LinearPcm16Mono16k,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Deepgram => "deepgram",
            BackendKind::GeminiLive => "gemini",
        }
    }
}

/// Per-session backend options.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// BCP-47 language hint for engines that take one.
    pub language: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            language: "ko".to_string(),
        }
    }
}

/// Events a live backend session delivers to its owner.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// One finalized transcript segment.
    Segment(TranscriptSegment),
    /// Connectivity lost mid-session. Non-fatal: the owner keeps its
    /// accumulated text and surfaces a notice.
    Disconnected(String),
    /// Clean shutdown; every buffered partial segment has been flushed.
    Closed,
}

/// A live transcription session, one of the two engine variants.
pub enum BackendSession {
    Deepgram(DeepgramSession),
    GeminiLive(GeminiLiveSession),
}

impl BackendSession {
    /// Connect the requested backend and start its receiver task.
    ///
    /// Returns once the engine is ready to accept audio. Events flow to
    /// `event_tx` until close or disconnect.
    pub async fn connect(
        kind: BackendKind,
        api_key: &str,
        config: &BackendConfig,
        event_tx: mpsc::Sender<BackendEvent>,
    ) -> Result<Self, BackendError> {
        match kind {
            BackendKind::Deepgram => {
                let session = DeepgramSession::connect(api_key, config, event_tx).await?;
                Ok(BackendSession::Deepgram(session))
            }
            BackendKind::GeminiLive => {
                let session = GeminiLiveSession::connect(api_key, event_tx).await?;
                Ok(BackendSession::GeminiLive(session))
            }
        }
    }

    /// Forward one audio chunk. No-op after connectivity loss.
    pub async fn send(&mut self, chunk: AudioChunk) -> Result<(), BackendError> {
        match self {
            BackendSession::Deepgram(s) => s.send(chunk).await,
            BackendSession::GeminiLive(s) => s.send(chunk).await,
        }
    }

    /// Terminate the session, flushing any buffered partial segment.
    pub async fn close(self) {
        match self {
            BackendSession::Deepgram(s) => s.close().await,
            BackendSession::GeminiLive(s) => s.close().await,
        }
    }
}

/// Run `connect` up to [`MAX_RETRIES`] times with exponential backoff.
pub(crate) async fn connect_with_retries<T, F, Fut>(
    backend: &str,
    mut connect: F,
) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, BackendError>>,
{
    let mut last_error = None;

    for attempt in 0..MAX_RETRIES {
        if attempt > 0 {
            let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
            log::info!(
                "Retrying {} connection in {:?} (attempt {}/{})",
                backend,
                delay,
                attempt + 1,
                MAX_RETRIES
            );
            tokio::time::sleep(delay).await;
        }

        match connect().await {
            Ok(session) => return Ok(session),
            // Bad credentials will not get better by retrying
            Err(e @ BackendError::AuthenticationFailed(_)) => return Err(e),
            Err(e) => {
                log::warn!("{} connection attempt {} failed: {}", backend, attempt + 1, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| BackendError::ConnectionFailed("Max retries exceeded".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_display() {
        let err = BackendError::ConnectionFailed("timeout".to_string());
        assert!(err.to_string().contains("timeout"));

        let err = BackendError::AuthenticationFailed("invalid key".to_string());
        assert!(err.to_string().contains("invalid key"));
    }

    #[test]
    fn chunk_encoding_per_backend() {
        assert_eq!(
            BackendKind::Deepgram.chunk_encoding(),
            AudioEncoding::Containerized
        );
        assert_eq!(
            BackendKind::GeminiLive.chunk_encoding(),
            AudioEncoding::LinearPcm16Mono16k
        );
    }

    #[test]
    fn backend_kind_serde_round_trip() {
        let kind: BackendKind = serde_json::from_str("\"gemini\"").unwrap();
        assert_eq!(kind, BackendKind::GeminiLive);
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"gemini\"");

        let kind: BackendKind = serde_json::from_str("\"deepgram\"").unwrap();
        assert_eq!(kind, BackendKind::Deepgram);
    }

    #[tokio::test]
    async fn retries_stop_on_auth_failure() {
        let mut attempts = 0u32;
        let result: Result<(), _> = connect_with_retries("test", || {
            attempts += 1;
            async { Err(BackendError::AuthenticationFailed("nope".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(BackendError::AuthenticationFailed(_))));
        assert_eq!(attempts, 1);
    }
}
