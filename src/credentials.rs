//! API credential acquisition.
//!
//! Keys are fetched at session start and never stored in settings. The
//! trait seam lets tests (and future token-vending services) stand in for
//! the environment.

use crate::backend::BackendKind;

/// Which credential a session needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    /// Deepgram streaming API key.
    Deepgram,
    /// Google Generative AI key, shared by Gemini Live and the reasoning
    /// endpoint.
    GoogleGenerativeAi,
}

impl CredentialKind {
    pub fn for_backend(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Deepgram => CredentialKind::Deepgram,
            BackendKind::GeminiLive => CredentialKind::GoogleGenerativeAi,
        }
    }

    fn env_var(&self) -> &'static str {
        match self {
            CredentialKind::Deepgram => "DEEPGRAM_API_KEY",
            CredentialKind::GoogleGenerativeAi => "GOOGLE_GENERATIVE_AI_API_KEY",
        }
    }
}

#[derive(Debug, Clone)]
pub enum CredentialError {
    Missing(&'static str),
    Invalid(String),
}

impl std::fmt::Display for CredentialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialError::Missing(var) => {
                write!(f, "Missing API credential: set {}", var)
            }
            CredentialError::Invalid(e) => write!(f, "Invalid API credential: {}", e),
        }
    }
}

impl std::error::Error for CredentialError {}

/// Source of API keys, resolved once per session.
pub trait CredentialProvider {
    fn fetch(
        &self,
        kind: CredentialKind,
    ) -> impl std::future::Future<Output = Result<String, CredentialError>> + Send;
}

/// Reads keys from the process environment (after dotenv loading).
#[derive(Debug, Default)]
pub struct EnvCredentialProvider;

impl CredentialProvider for EnvCredentialProvider {
    async fn fetch(&self, kind: CredentialKind) -> Result<String, CredentialError> {
        let var = kind.env_var();
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(CredentialError::Missing(var)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_kind_per_backend() {
        assert_eq!(
            CredentialKind::for_backend(BackendKind::Deepgram),
            CredentialKind::Deepgram
        );
        assert_eq!(
            CredentialKind::for_backend(BackendKind::GeminiLive),
            CredentialKind::GoogleGenerativeAi
        );
    }

    #[test]
    fn missing_error_names_the_variable() {
        let err = CredentialError::Missing("DEEPGRAM_API_KEY");
        assert!(err.to_string().contains("DEEPGRAM_API_KEY"));
    }
}
