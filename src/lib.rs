//! Real-time meeting coach: live microphone transcription with selective
//! AI coaching interventions.
//!
//! Pipeline: [`audio`] capture → streaming [`backend`] transcription →
//! [`scheduler`] batching → [`coach`] orchestration over a [`reasoning`]
//! endpoint. [`session`] owns the lifecycle and wires it all together.

pub mod audio;
pub mod backend;
pub mod coach;
pub mod credentials;
pub mod reasoning;
pub mod scheduler;
pub mod session;
pub mod settings;
pub mod transcript;

pub use backend::BackendKind;
pub use coach::{AgentKind, InterventionEvent};
pub use session::{run_session, NotificationSink, SessionConfig, SessionError, SessionRecorder};
pub use settings::CoachSettings;
pub use transcript::TranscriptSegment;
