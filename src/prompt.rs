use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::BuildError;
use crate::i18n::Localizer;
use crate::models::{AttachmentRef, Message, Sender};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestMode {
    /// First turn: the provider must return a strict structured verdict.
    Analysis,
    /// Later turns: free conversational text with prior turns replayed.
    FollowUp,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn inline(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Part::InlineData {
            inline_data: InlineData {
                mime_type: mime_type.into(),
                data: data.into(),
            },
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            Part::InlineData { .. } => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Model,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct OrderedTurn {
    pub role: TurnRole,
    pub parts: Vec<Part>,
}

/// Provider-agnostic request for one turn.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRequest {
    pub mode: RequestMode,
    pub system_guidance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<OrderedTurn>>,
    pub current_turn_parts: Vec<Part>,
}

/// Whether a turn is the first analysis or a follow-up. Any earlier user message
/// makes it a follow-up even if the turn counter was lost.
pub fn select_mode(turn_count: u32, prior_messages: &[Message]) -> RequestMode {
    let has_prior_user = prior_messages.iter().any(|m| m.sender == Sender::User);
    if turn_count == 0 && !has_prior_user {
        RequestMode::Analysis
    } else {
        RequestMode::FollowUp
    }
}

#[derive(Clone)]
pub struct PromptBuilder {
    localizer: Arc<dyn Localizer>,
}

impl PromptBuilder {
    pub fn new(localizer: Arc<dyn Localizer>) -> Self {
        Self { localizer }
    }

    pub fn build(
        &self,
        user_text: &str,
        attachments: &[AttachmentRef],
        turn_count: u32,
        prior_messages: &[Message],
    ) -> Result<ProviderRequest, BuildError> {
        let user_text = user_text.trim();
        let usable: Vec<&AttachmentRef> = attachments.iter().filter(|a| a.is_usable()).collect();

        let query = if user_text.is_empty() && !usable.is_empty() {
            self.localizer.text("chat.defaultFileAnalysisPrompt")
        } else {
            user_text.to_string()
        };

        let mut parts = Vec::new();
        if !query.is_empty() {
            parts.push(Part::text(query.clone()));
        }
        for attachment in usable {
            if let Some(text) = &attachment.text_content {
                let file_name = [("fileName", attachment.name.as_str())];
                parts.push(Part::text(format!(
                    "\n\n--- {} ---",
                    self.localizer.format("chat.fileContentTitle", &file_name)
                )));
                parts.push(Part::text(text.clone()));
                parts.push(Part::text(format!(
                    "--- {} ---",
                    self.localizer.format("chat.fileContentEnd", &file_name)
                )));
            } else if let Some(data) = &attachment.inline_data {
                parts.push(Part::inline(attachment.mime_type.clone(), data.clone()));
            }
        }

        if parts.is_empty() {
            return Err(BuildError::EmptyRequest);
        }

        let mode = select_mode(turn_count, prior_messages);
        let request = match mode {
            RequestMode::Analysis => ProviderRequest {
                mode,
                system_guidance: self.analysis_guidance(&query),
                history: None,
                current_turn_parts: parts,
            },
            RequestMode::FollowUp => ProviderRequest {
                mode,
                system_guidance: self
                    .localizer
                    .format("gemini.systemPromptFollowUp.base", &[("query", query.as_str())]),
                history: Some(self.replay_history(prior_messages)),
                current_turn_parts: parts,
            },
        };
        log::debug!(
            "Built {:?} request: {} part(s), {} history turn(s)",
            request.mode,
            request.current_turn_parts.len(),
            request.history.as_ref().map_or(0, Vec::len)
        );
        Ok(request)
    }

    fn analysis_guidance(&self, query: &str) -> String {
        let query = if query.is_empty() {
            self.localizer.text("gemini.systemPromptAnalysis.userRequestFallback")
        } else {
            query.to_string()
        };
        self.localizer
            .format("gemini.systemPromptAnalysis.base", &[("query", query.as_str())])
    }

    /// Prior log as role-tagged turns, skipping the seed greeting, pending
    /// placeholders and anything without renderable text.
    pub fn replay_history(&self, prior_messages: &[Message]) -> Vec<OrderedTurn> {
        prior_messages
            .iter()
            .filter(|m| !m.is_seed && !m.is_pending)
            .filter_map(|m| {
                let mut parts = Vec::new();
                if let Some(text) = m.trimmed_text() {
                    parts.push(Part::text(text));
                }
                if m.sender == Sender::Ai {
                    if let Some(analysis) = &m.analysis {
                        let already_shown = m
                            .text
                            .as_deref()
                            .is_some_and(|t| t.contains(&analysis.explanation));
                        if analysis.risk_level.is_some()
                            && !analysis.explanation.is_empty()
                            && !already_shown
                        {
                            parts.push(Part::text(format!(
                                "[{}]: {}",
                                self.localizer.text("chat.riskDisplay.detailedAnalysis"),
                                analysis.explanation
                            )));
                        }
                    }
                }
                if parts.is_empty() {
                    return None;
                }
                let role = match m.sender {
                    Sender::User => TurnRole::User,
                    Sender::Ai => TurnRole::Model,
                };
                Some(OrderedTurn { role, parts })
            })
            .collect()
    }
}
