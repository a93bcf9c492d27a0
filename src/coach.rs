//! Coaching orchestration over transcript snapshots.
//!
//! Each dispatched snapshot goes to the reasoning endpoint with a rolling
//! meeting summary and the enabled agent instructions baked into one
//! prompt. The reply is a JSON verdict: an updated summary, whether to
//! intervene, and which agent speaks. Replies are parsed tolerantly;
//! anything malformed means no intervention and the summary keeps its
//! previous value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reasoning::{AgentError, ReasoningAgent};

/// The three specialist coaching voices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Question,
    Answer,
    Insight,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Question => "question",
            AgentKind::Answer => "answer",
            AgentKind::Insight => "insight",
        }
    }
}

/// Per-agent on/off switches. Everything on by default.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentToggles {
    pub question: bool,
    pub answer: bool,
    pub insight: bool,
}

impl Default for AgentToggles {
    fn default() -> Self {
        Self {
            question: true,
            answer: true,
            insight: true,
        }
    }
}

impl AgentToggles {
    pub fn is_enabled(&self, kind: AgentKind) -> bool {
        match kind {
            AgentKind::Question => self.question,
            AgentKind::Answer => self.answer,
            AgentKind::Insight => self.insight,
        }
    }

    pub fn any_enabled(&self) -> bool {
        self.question || self.answer || self.insight
    }
}

/// Instruction text for each agent, user-editable via settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentPrompts {
    pub question: String,
    pub answer: String,
    pub insight: String,
}

impl Default for AgentPrompts {
    fn default() -> Self {
        Self {
            question: "Ask one Socratic question that surfaces an unverified assumption \
                       or a missed perspective. One question only, at most 20 words."
                .to_string(),
            answer: "Answer the user's direct question accurately in 2-3 sentences. \
                     Mark uncertain information as such; include a concrete example when possible."
                .to_string(),
            insight: "Extract the key value from the conversation: an important decision, \
                      an action item, or a core concept. At most two short bullet points."
                .to_string(),
        }
    }
}

/// Verdict type in the model's reply. Unknown values collapse to `None`,
/// which means no intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterventionType {
    Question,
    Answer,
    Insight,
    #[default]
    None,
}

impl InterventionType {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "QUESTION" => InterventionType::Question,
            "ANSWER" => InterventionType::Answer,
            "INSIGHT" => InterventionType::Insight,
            _ => InterventionType::None,
        }
    }

    fn agent_kind(&self) -> Option<AgentKind> {
        match self {
            InterventionType::Question => Some(AgentKind::Question),
            InterventionType::Answer => Some(AgentKind::Answer),
            InterventionType::Insight => Some(AgentKind::Insight),
            InterventionType::None => None,
        }
    }
}

/// The model's JSON reply. Every field is optional so a sparse or sloppy
/// reply still deserializes; absent fields mean "no intervention".
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CoachVerdict {
    updated_context: Option<String>,
    needs_intervention: bool,
    #[serde(rename = "type")]
    verdict_type: String,
    content: Option<String>,
}

impl CoachVerdict {
    fn intervention_type(&self) -> InterventionType {
        InterventionType::from_tag(&self.verdict_type)
    }
}

/// One piece of coaching surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterventionEvent {
    pub kind: AgentKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Owns the rolling meeting summary and turns snapshots into interventions.
pub struct CoachOrchestrator {
    /// Executive summary carried between invocations. Overwritten wholesale
    /// by each reply that includes one.
    context: String,
    agents: AgentToggles,
    prompts: AgentPrompts,
}

impl CoachOrchestrator {
    pub fn new(agents: AgentToggles, prompts: AgentPrompts) -> Self {
        Self {
            context: String::new(),
            agents,
            prompts,
        }
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// Run one coaching invocation over a transcript snapshot.
    ///
    /// Returns `Ok(None)` when the model declines to intervene, names a
    /// disabled agent, or replies with something unparseable. Only
    /// transport/API failures surface as errors.
    pub async fn process<A: ReasoningAgent>(
        &mut self,
        agent: &A,
        snapshot: &str,
    ) -> Result<Option<InterventionEvent>, AgentError> {
        if !self.agents.any_enabled() {
            log::debug!("All agents disabled, skipping invocation");
            return Ok(None);
        }

        let prompt = self.build_prompt(snapshot);
        let reply = agent.invoke(&prompt).await?;

        let mut verdict = match parse_verdict(&reply) {
            Some(v) => v,
            None => {
                log::warn!("Unparseable coaching reply, skipping: {}", reply);
                return Ok(None);
            }
        };

        // The summary updates even when the model stays quiet
        if let Some(updated) = verdict.updated_context.take() {
            self.context = updated;
        }

        if !verdict.needs_intervention {
            return Ok(None);
        }
        let Some(kind) = verdict.intervention_type().agent_kind() else {
            return Ok(None);
        };
        if !self.agents.is_enabled(kind) {
            log::debug!("Dropping intervention from disabled {} agent", kind.as_str());
            return Ok(None);
        }
        let Some(content) = verdict.content.filter(|c| !c.trim().is_empty()) else {
            return Ok(None);
        };

        Ok(Some(InterventionEvent {
            kind,
            content,
            timestamp: Utc::now(),
        }))
    }

    fn build_prompt(&self, snapshot: &str) -> String {
        let memory = if self.context.trim().is_empty() {
            "Meeting just started."
        } else {
            &self.context
        };

        let mut prompt = format!(
            "You are an advanced Real-time Communication Coach Orchestrator (Chief of Staff).\n\
             \n\
             [MEMORY / PREVIOUS CONTEXT]\n\
             \"{}\"\n\
             \n\
             [CRITICAL RULES]\n\
             - BE SELECTIVE: Only intervene when there is GENUINE VALUE to add.\n\
             - Quality over quantity: A great coach speaks rarely but meaningfully.\n\
             - DO NOT intervene just because you received new text.\n\
             - Set needsIntervention=false UNLESS one of these conditions is met:\n\
             \x20 * User asks a direct question that needs answering\n\
             \x20 * There's a significant insight or pattern worth highlighting\n\
             \x20 * User seems confused or stuck and needs guidance\n\
             \x20 * Important action item or key decision is mentioned\n\
             \n\
             [TASK]\n\
             1. Analyze the new transcript chunk below.\n\
             2. UPDATE the executive summary of the meeting context (max 2 sentences).\n\
             3. ONLY intervene if genuinely valuable - most of the time, needsIntervention should be FALSE.\n\
             \n\
             [AGENTS & INSTRUCTIONS]\n",
            memory
        );

        if self.agents.question {
            prompt.push_str(&format!(
                "- QUESTION AGENT: \"{}\" (Trigger: High ambiguity, missed detail, or user seems stuck)\n",
                self.prompts.question
            ));
        }
        if self.agents.answer {
            prompt.push_str(&format!(
                "- ANSWER AGENT: \"{}\" (Trigger: ONLY when direct question asked that you can answer)\n",
                self.prompts.answer
            ));
        }
        if self.agents.insight {
            prompt.push_str(&format!(
                "- INSIGHT AGENT: \"{}\" (Trigger: Key takeaway, action item, or truly interesting pattern)\n",
                self.prompts.insight
            ));
        }

        prompt.push_str(&format!(
            "\n\
             [OUTPUT FORMAT]\n\
             Return purely JSON:\n\
             {{\n\
             \x20 \"updatedContext\": \"The new running summary of the conversation...\",\n\
             \x20 \"needsIntervention\": boolean (DEFAULT TO FALSE unless genuinely valuable),\n\
             \x20 \"type\": \"QUESTION\" | \"ANSWER\" | \"INSIGHT\" | \"NONE\",\n\
             \x20 \"content\": \"The actual feedback string if intervention is needed.\"\n\
             }}\n\
             \n\
             [NEW TRANSCRIPT CHUNK]\n\
             \"{}\"\n",
            snapshot
        ));

        prompt
    }
}

/// Parse the model's reply, stripping markdown code fences first. The
/// JSON response mime type should make fences impossible, but models
/// emit them anyway often enough to handle.
fn parse_verdict(reply: &str) -> Option<CoachVerdict> {
    let cleaned = reply.replace("```json", "").replace("```", "");
    serde_json::from_str(cleaned.trim()).ok()
}
