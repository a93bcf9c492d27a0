//! Persisted user settings.
//!
//! Stored as JSON under the platform config directory. Unknown or missing
//! fields fall back to defaults, so old settings files keep working across
//! upgrades. API keys are never persisted here; see [`crate::credentials`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;
use crate::coach::{AgentPrompts, AgentToggles};
use crate::scheduler::DEFAULT_INTERVENTION_INTERVAL;

const CONFIG_DIR_NAME: &str = "realtime-coach";
const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoachSettings {
    /// Which transcription engine new sessions use.
    pub stt_provider: BackendKind,

    /// BCP-47 language hint passed to engines that take one.
    pub language: String,

    /// Buffered transcript characters that trigger a coaching invocation.
    pub intervention_interval: usize,

    /// Per-agent on/off switches.
    pub agents: AgentToggles,

    /// User-editable agent instruction text.
    pub prompts: AgentPrompts,
}

impl Default for CoachSettings {
    fn default() -> Self {
        Self {
            stt_provider: BackendKind::GeminiLive,
            language: "ko".to_string(),
            intervention_interval: DEFAULT_INTERVENTION_INTERVAL,
            agents: AgentToggles::default(),
            prompts: AgentPrompts::default(),
        }
    }
}

fn settings_path() -> Result<PathBuf, String> {
    let dir = dirs::config_dir().ok_or("Could not determine config directory")?;
    Ok(dir.join(CONFIG_DIR_NAME).join(SETTINGS_FILE_NAME))
}

pub fn load_settings() -> CoachSettings {
    let path = match settings_path() {
        Ok(p) => p,
        Err(e) => {
            log::warn!("Settings: {}", e);
            return CoachSettings::default();
        }
    };
    load_settings_from(&path)
}

fn load_settings_from(path: &Path) -> CoachSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<CoachSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                CoachSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => CoachSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            CoachSettings::default()
        }
    }
}

pub fn save_settings(settings: &CoachSettings) -> Result<(), String> {
    let path = settings_path()?;
    save_settings_to(&path, settings)
}

fn save_settings_to(path: &Path, settings: &CoachSettings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory {:?}: {}", parent, e))?;
    }

    let contents =
        serde_json::to_string_pretty(settings).map_err(|e| format!("Serialize settings: {}", e))?;

    // Write atomically: write to a temp file in the same directory, then rename.
    // This prevents partial/corrupt settings.json if the process dies mid-write.
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents)
        .map_err(|e| format!("Write temp settings {:?}: {}", tmp_path, e))?;

    // On Unix, rename will atomically replace the destination. On Windows, rename
    // fails if the destination exists, so we remove it first (ignoring NotFound).
    if cfg!(windows) {
        if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(format!("Remove existing settings file {:?}: {}", path, e));
                }
            }
        }
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| format!("Rename temp settings {:?} to {:?}: {}", tmp_path, path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut settings = CoachSettings::default();
        settings.stt_provider = BackendKind::Deepgram;
        settings.intervention_interval = 500;
        settings.agents.answer = false;

        save_settings_to(&path, &settings).unwrap();
        let loaded = load_settings_from(&path);

        assert_eq!(loaded.stt_provider, BackendKind::Deepgram);
        assert_eq!(loaded.intervention_interval, 500);
        assert!(!loaded.agents.answer);
        assert!(loaded.agents.question);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from(&dir.path().join("nope.json"));

        assert_eq!(settings.stt_provider, BackendKind::GeminiLive);
        assert_eq!(settings.intervention_interval, DEFAULT_INTERVENTION_INTERVAL);
        assert_eq!(settings.language, "ko");
    }

    #[test]
    fn corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let settings = load_settings_from(&path);
        assert_eq!(settings.intervention_interval, DEFAULT_INTERVENTION_INTERVAL);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"sttProvider": "deepgram"}"#).unwrap();

        // Field names are snake_case on disk; camelCase key is ignored
        let settings = load_settings_from(&path);
        assert_eq!(settings.stt_provider, BackendKind::GeminiLive);

        std::fs::write(&path, r#"{"stt_provider": "deepgram"}"#).unwrap();
        let settings = load_settings_from(&path);
        assert_eq!(settings.stt_provider, BackendKind::Deepgram);
        assert!(settings.agents.insight);
    }

    #[test]
    fn save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        save_settings_to(&path, &CoachSettings::default()).unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }
}
