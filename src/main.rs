//! Console driver: run one coaching session against the default
//! microphone until Ctrl-C.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use realtime_coach::coach::InterventionEvent;
use realtime_coach::credentials::{CredentialKind, CredentialProvider, EnvCredentialProvider};
use realtime_coach::reasoning::GeminiReasoner;
use realtime_coach::session::{
    run_session, NotificationSink, SessionConfig, SessionRecorder,
};
use realtime_coach::settings::{load_settings, save_settings};
use realtime_coach::transcript::TranscriptSegment;
use realtime_coach::BackendKind;

/// Writes session events to the structured log.
struct LoggingRecorder;

impl SessionRecorder for LoggingRecorder {
    fn session_started(&self, session_id: Uuid, backend: BackendKind) {
        log::info!("[{}] session started ({})", session_id, backend.as_str());
    }

    fn segment_recorded(&self, session_id: Uuid, segment: &TranscriptSegment) {
        log::debug!("[{}] segment: {}", session_id, segment.text);
    }

    fn intervention_recorded(&self, session_id: Uuid, event: &InterventionEvent) {
        log::info!(
            "[{}] {} intervention: {}",
            session_id,
            event.kind.as_str(),
            event.content
        );
    }

    fn session_ended(&self, session_id: Uuid) {
        log::info!("[{}] session ended", session_id);
    }
}

/// Prints transcripts and coaching straight to the terminal.
struct ConsoleSink;

impl NotificationSink for ConsoleSink {
    fn transcript(&self, segment: &TranscriptSegment) {
        match &segment.speaker_label {
            Some(speaker) => println!("[{}] {}", speaker, segment.text),
            None => println!("> {}", segment.text),
        }
    }

    fn intervention(&self, event: &InterventionEvent) {
        println!("\n  ── coach ({}) ──", event.kind.as_str());
        println!("  {}\n", event.content);
    }

    fn notice(&self, message: &str) {
        eprintln!("! {}", message);
    }
}

#[tokio::main]
async fn main() {
    // Load .env before anything reads the environment
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = load_settings();
    // Write back so the file exists with defaults the user can edit
    if let Err(e) = save_settings(&settings) {
        log::warn!("Could not write settings file: {}", e);
    }
    let config = SessionConfig::from(&settings);

    let credentials = EnvCredentialProvider;
    let reasoning_key = match credentials
        .fetch(CredentialKind::GoogleGenerativeAi)
        .await
    {
        Ok(key) => key,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    let reasoner = GeminiReasoner::new(reasoning_key);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Ctrl-C received, stopping session");
            signal_token.cancel();
        }
    });

    println!(
        "Listening ({} backend). Press Ctrl-C to stop.",
        config.backend.as_str()
    );

    match run_session(
        config,
        &credentials,
        reasoner,
        &LoggingRecorder,
        &ConsoleSink,
        shutdown,
    )
    .await
    {
        Ok(summary) => {
            println!(
                "Session complete: {} segments, {} interventions.",
                summary.segments, summary.interventions
            );
        }
        Err(e) => {
            eprintln!("Session failed: {}", e);
            std::process::exit(1);
        }
    }
}
