//! Live coaching session lifecycle.
//!
//! A session wires the pipeline end to end: microphone capture feeds the
//! transcription backend, finalized segments feed the intervention
//! scheduler, and dispatched snapshots run through the coach orchestrator
//! on a dedicated worker task so transcription never stalls behind a
//! reasoning call.
//!
//! Shutdown order matters and is fixed: stop capture, drain buffered
//! audio into the backend, close the backend (which flushes its partial
//! segments), then run one final coaching pass over whatever the
//! scheduler still holds.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audio::{AudioCapture, AudioChunk, AudioError};
use crate::backend::{BackendConfig, BackendError, BackendEvent, BackendKind, BackendSession};
use crate::coach::{AgentPrompts, AgentToggles, CoachOrchestrator, InterventionEvent};
use crate::credentials::{CredentialError, CredentialKind, CredentialProvider};
use crate::reasoning::{AgentError, ReasoningAgent};
use crate::scheduler::InterventionScheduler;
use crate::settings::CoachSettings;
use crate::transcript::TranscriptSegment;

/// How long shutdown waits for the backend's final segment flush.
const EVENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity for audio chunks awaiting backend send (several seconds).
const CHUNK_CHANNEL_CAPACITY: usize = 32;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
pub enum SessionError {
    Credential(CredentialError),
    Backend(BackendError),
    Audio(AudioError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Credential(e) => write!(f, "{}", e),
            SessionError::Backend(e) => write!(f, "{}", e),
            SessionError::Audio(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<CredentialError> for SessionError {
    fn from(e: CredentialError) -> Self {
        SessionError::Credential(e)
    }
}

impl From<BackendError> for SessionError {
    fn from(e: BackendError) -> Self {
        SessionError::Backend(e)
    }
}

impl From<AudioError> for SessionError {
    fn from(e: AudioError) -> Self {
        SessionError::Audio(e)
    }
}

/// Everything a session needs, resolved from settings at start.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub backend: BackendKind,
    pub language: String,
    pub intervention_interval: usize,
    pub agents: AgentToggles,
    pub prompts: AgentPrompts,
}

impl From<&CoachSettings> for SessionConfig {
    fn from(settings: &CoachSettings) -> Self {
        Self {
            backend: settings.stt_provider,
            language: settings.language.clone(),
            intervention_interval: settings.intervention_interval,
            agents: settings.agents,
            prompts: settings.prompts.clone(),
        }
    }
}

/// Persists what happened during a session. Implementations must not
/// block; failures are theirs to log.
pub trait SessionRecorder {
    fn session_started(&self, session_id: Uuid, backend: BackendKind);
    fn segment_recorded(&self, session_id: Uuid, segment: &TranscriptSegment);
    fn intervention_recorded(&self, session_id: Uuid, event: &InterventionEvent);
    fn session_ended(&self, session_id: Uuid);
}

/// Surfaces live output to the user. Same fire-and-forget contract as
/// [`SessionRecorder`].
pub trait NotificationSink {
    fn transcript(&self, segment: &TranscriptSegment);
    fn intervention(&self, event: &InterventionEvent);
    fn notice(&self, message: &str);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionSummary {
    pub segments: usize,
    pub interventions: usize,
}

/// Run one coaching session until `shutdown` fires or the backend drops.
///
/// The reasoner moves onto a worker task, so invocations overlap live
/// transcription; the scheduler's gates keep at most one outstanding.
pub async fn run_session<C, R, S, N>(
    config: SessionConfig,
    credentials: &C,
    reasoner: R,
    recorder: &S,
    notifier: &N,
    shutdown: CancellationToken,
) -> Result<SessionSummary, SessionError>
where
    C: CredentialProvider,
    R: ReasoningAgent + Send + Sync + 'static,
    S: SessionRecorder,
    N: NotificationSink,
{
    let session_id = Uuid::new_v4();
    log::info!(
        "Starting session {} ({} backend)",
        session_id,
        config.backend.as_str()
    );

    let api_key = credentials
        .fetch(CredentialKind::for_backend(config.backend))
        .await?;

    let (event_tx, mut event_rx) = mpsc::channel::<BackendEvent>(EVENT_CHANNEL_CAPACITY);
    let (chunk_tx, mut chunk_rx) = mpsc::channel::<AudioChunk>(CHUNK_CHANNEL_CAPACITY);

    let backend_config = BackendConfig {
        language: config.language.clone(),
    };
    let mut backend =
        BackendSession::connect(config.backend, &api_key, &backend_config, event_tx).await?;

    let mut capture = match AudioCapture::start(config.backend.chunk_encoding(), chunk_tx) {
        Ok(handle) => handle,
        Err(e) => {
            backend.close().await;
            return Err(e.into());
        }
    };

    recorder.session_started(session_id, config.backend);

    // Coaching worker: owns the orchestrator and the reasoner. One snapshot
    // in, one outcome out; the scheduler's in-flight gate is the only
    // source of backpressure it needs.
    let coach = CoachOrchestrator::new(config.agents, config.prompts.clone());
    let (snapshot_tx, snapshot_rx) = mpsc::channel::<String>(2);
    let (outcome_tx, mut outcome_rx) =
        mpsc::channel::<Result<Option<InterventionEvent>, AgentError>>(2);
    let coach_task = tokio::spawn(coach_worker(reasoner, coach, snapshot_rx, outcome_tx));

    let mut scheduler = InterventionScheduler::new(config.intervention_interval);
    let mut summary = SessionSummary::default();

    // Live phase
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                log::info!("Session {} stopping on request", session_id);
                break;
            }
            Some(chunk) = chunk_rx.recv() => {
                if let Err(e) = backend.send(chunk).await {
                    log::error!("Audio send failed: {}", e);
                }
            }
            event = event_rx.recv() => match event {
                Some(BackendEvent::Segment(segment)) => {
                    handle_segment(
                        &segment, session_id, recorder, notifier,
                        &mut scheduler, &snapshot_tx, &mut summary,
                    ).await;
                }
                Some(BackendEvent::Disconnected(reason)) => {
                    notifier.notice(&format!("Transcription connection lost: {}", reason));
                    break;
                }
                Some(BackendEvent::Closed) | None => break,
            },
            Some(outcome) = outcome_rx.recv() => {
                scheduler.complete_invocation(Instant::now());
                handle_outcome(outcome, session_id, recorder, notifier, &mut summary);
            }
        }
    }

    // Shutdown: stop the microphone, push the audio still in flight, then
    // let the backend flush its tail segments.
    capture.stop();
    while let Some(chunk) = chunk_rx.recv().await {
        if backend.send(chunk).await.is_err() {
            break;
        }
    }
    backend.close().await;

    let drain = tokio::time::timeout(EVENT_DRAIN_TIMEOUT, async {
        while let Some(event) = event_rx.recv().await {
            match event {
                BackendEvent::Segment(segment) => {
                    handle_segment(
                        &segment, session_id, recorder, notifier,
                        &mut scheduler, &snapshot_tx, &mut summary,
                    )
                    .await;
                }
                BackendEvent::Closed | BackendEvent::Disconnected(_) => break,
            }
        }
    })
    .await;
    if drain.is_err() {
        log::warn!("Timed out draining backend events");
    }

    // Settle any invocation started during the live phase before flushing.
    if scheduler.invocation_in_flight() {
        if let Some(outcome) = outcome_rx.recv().await {
            scheduler.complete_invocation(Instant::now());
            handle_outcome(outcome, session_id, recorder, notifier, &mut summary);
        }
    }

    // Final coaching pass over the remaining buffer.
    if let Some(snapshot) = scheduler.final_flush(Instant::now()) {
        if snapshot_tx.send(snapshot).await.is_ok() {
            if let Some(outcome) = outcome_rx.recv().await {
                scheduler.complete_invocation(Instant::now());
                handle_outcome(outcome, session_id, recorder, notifier, &mut summary);
            }
        }
    }

    drop(snapshot_tx);
    if coach_task.await.is_err() {
        log::warn!("Coach worker panicked");
    }

    recorder.session_ended(session_id);
    log::info!(
        "Session {} ended: {} segments, {} interventions",
        session_id,
        summary.segments,
        summary.interventions
    );

    Ok(summary)
}

async fn handle_segment<S: SessionRecorder, N: NotificationSink>(
    segment: &TranscriptSegment,
    session_id: Uuid,
    recorder: &S,
    notifier: &N,
    scheduler: &mut InterventionScheduler,
    snapshot_tx: &mpsc::Sender<String>,
    summary: &mut SessionSummary,
) {
    summary.segments += 1;
    recorder.segment_recorded(session_id, segment);
    notifier.transcript(segment);

    if let Some(snapshot) = scheduler.push_segment(&segment.text, Instant::now()) {
        // Worker holds at most one snapshot; the in-flight gate means this
        // send cannot back up.
        if snapshot_tx.send(snapshot).await.is_err() {
            log::error!("Coach worker gone, dropping snapshot");
            scheduler.complete_invocation(Instant::now());
        }
    }
}

fn handle_outcome<S: SessionRecorder, N: NotificationSink>(
    outcome: Result<Option<InterventionEvent>, AgentError>,
    session_id: Uuid,
    recorder: &S,
    notifier: &N,
    summary: &mut SessionSummary,
) {
    match outcome {
        Ok(Some(event)) => {
            summary.interventions += 1;
            recorder.intervention_recorded(session_id, &event);
            notifier.intervention(&event);
        }
        Ok(None) => {}
        Err(e) => {
            // A failed invocation costs one cooldown, nothing else.
            log::error!("Coaching invocation failed: {}", e);
            notifier.notice(&format!("Coaching unavailable: {}", e));
        }
    }
}

async fn coach_worker<R: ReasoningAgent>(
    reasoner: R,
    mut coach: CoachOrchestrator,
    mut snapshot_rx: mpsc::Receiver<String>,
    outcome_tx: mpsc::Sender<Result<Option<InterventionEvent>, AgentError>>,
) {
    while let Some(snapshot) = snapshot_rx.recv().await {
        let result = coach.process(&reasoner, &snapshot).await;
        if outcome_tx.send(result).await.is_err() {
            break;
        }
    }
    log::debug!("Coach worker exiting");
}
