//! Reasoning endpoint for coaching invocations.
//!
//! The orchestrator hands a fully-built prompt to a [`ReasoningAgent`] and
//! expects raw model text back; all response interpretation (JSON parsing,
//! fence stripping) happens in [`crate::coach`]. The trait seam exists so
//! tests can script replies without a network.

use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const GENERATE_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash-exp:generateContent";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from a reasoning invocation.
#[derive(Debug, Clone)]
pub enum AgentError {
    /// Network-level failure (DNS, TLS, timeout).
    Transport(String),
    /// The endpoint answered with a non-success status.
    Api { status: u16, message: String },
    /// The response body did not have the expected shape.
    Format(String),
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentError::Transport(e) => write!(f, "Reasoning request failed: {}", e),
            AgentError::Api { status, message } => {
                write!(f, "Reasoning API error ({}): {}", status, message)
            }
            AgentError::Format(e) => write!(f, "Unexpected reasoning response: {}", e),
        }
    }
}

impl std::error::Error for AgentError {}

/// A remote (or scripted) reasoning model.
pub trait ReasoningAgent {
    /// Send one prompt, return the model's raw text reply.
    fn invoke(
        &self,
        prompt: &str,
    ) -> impl std::future::Future<Output = Result<String, AgentError>> + Send;
}

// Shared across invocations: connection pooling matters at a 3s cadence.
fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default()
    })
}

// ============================================================================
// Gemini generateContent
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [RequestContent<'a>; 1],
    generation_config: RequestGenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: [RequestPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestGenerationConfig {
    /// Constrains the model to emit a JSON document.
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// Gemini `generateContent` client in JSON-response mode.
pub struct GeminiReasoner {
    api_key: String,
}

impl GeminiReasoner {
    pub fn new(api_key: String) -> Self {
        Self { api_key }
    }
}

impl ReasoningAgent for GeminiReasoner {
    async fn invoke(&self, prompt: &str) -> Result<String, AgentError> {
        let request = GenerateRequest {
            contents: [RequestContent {
                role: "user",
                parts: [RequestPart { text: prompt }],
            }],
            generation_config: RequestGenerationConfig {
                response_mime_type: "application/json",
            },
        };

        let response = http_client()
            .post(GENERATE_URL)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            log::error!("Reasoning API returned {}: {}", status, message);
            return Err(AgentError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Format(e.to_string()))?;

        let text = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| AgentError::Format("no candidates in response".to_string()))?;

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization_shape() {
        let request = GenerateRequest {
            contents: [RequestContent {
                role: "user",
                parts: [RequestPart { text: "analyze this" }],
            }],
            generation_config: RequestGenerationConfig {
                response_mime_type: "application/json",
            },
        };
        let json = serde_json::to_string(&request).unwrap();

        assert!(json.contains("\"contents\":[{"));
        assert!(json.contains("\"role\":\"user\""));
        assert!(json.contains("\"responseMimeType\":\"application/json\""));
    }

    #[test]
    fn response_text_extraction() {
        let json = r#"{
            "candidates": [
                {"content": {"parts": [{"text": "{\"needsIntervention\":false}"}]}}
            ]
        }"#;
        let body: GenerateResponse = serde_json::from_str(json).unwrap();
        let text = &body.candidates[0].content.parts[0].text;
        assert!(text.contains("needsIntervention"));
    }

    #[test]
    fn empty_candidates_deserialize() {
        let body: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(body.candidates.is_empty());
    }

    #[test]
    fn agent_error_display() {
        let err = AgentError::Api {
            status: 429,
            message: "quota".to_string(),
        };
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("quota"));
    }
}
