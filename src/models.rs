use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Who authored a message in the log
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    VeryHigh,
    High,
    Medium,
    Low,
    Safe,
    Unknown,
}

impl RiskLevel {
    /// Lenient mapping from the provider's verdict string. Unrecognized values map to `Unknown`.
    pub fn from_verdict(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().replace([' ', '-'], "_").as_str() {
            "VERY_HIGH" => RiskLevel::VeryHigh,
            "HIGH" => RiskLevel::High,
            "MEDIUM" => RiskLevel::Medium,
            "LOW" => RiskLevel::Low,
            "SAFE" => RiskLevel::Safe,
            _ => RiskLevel::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::VeryHigh => "VERY_HIGH",
            RiskLevel::High => "HIGH",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::Low => "LOW",
            RiskLevel::Safe => "SAFE",
            RiskLevel::Unknown => "UNKNOWN",
        }
    }
}

// An external reference attached to an answer
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct GroundingSource {
    pub uri: String,
    pub title: String,
}

/// Typed verdict for a turn. `risk_level == None` marks a conversational reply
/// that may still carry citations.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub risk_level: Option<RiskLevel>,
    pub explanation: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounding_sources: Option<Vec<GroundingSource>>,
}

impl AnalysisResult {
    pub fn unknown(explanation: impl Into<String>, suggestions: Vec<String>) -> Self {
        Self {
            risk_level: Some(RiskLevel::Unknown),
            explanation: explanation.into(),
            suggestions,
            grounding_sources: None,
        }
    }

    /// Citation-only carrier for a conversational reply.
    pub fn citations(sources: Vec<GroundingSource>) -> Self {
        Self {
            risk_level: None,
            explanation: String::new(),
            suggestions: Vec::new(),
            grounding_sources: Some(sources),
        }
    }

    pub fn is_conversational(&self) -> bool {
        self.risk_level.is_none()
    }
}

/// A file attached to a user turn. Exactly one of `inline_data` / `text_content`
/// is populated. `preview_ref` is either a volatile `blob:` handle (session-local)
/// or a durable `data:` URI synthesized on load.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    pub name: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_ref: Option<String>,
}

impl AttachmentRef {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// True when the attachment carries something a request can use.
    pub fn is_usable(&self) -> bool {
        self.inline_data.as_deref().is_some_and(|d| !d.is_empty())
            || self.text_content.as_deref().is_some_and(|t| !t.is_empty())
    }
}

// Represents a single entry in a conversation log
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: u64,
    pub sender: Sender,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisResult>,
    #[serde(default)]
    pub is_pending: bool,
    // The greeting a fresh conversation starts with
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_seed: bool,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(id: u64, sender: Sender) -> Self {
        Self {
            id,
            sender,
            text: None,
            attachments: Vec::new(),
            analysis: None,
            is_pending: false,
            is_seed: false,
            timestamp: Utc::now(),
        }
    }

    pub fn seed(id: u64, text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            is_seed: true,
            ..Self::new(id, Sender::Ai)
        }
    }

    pub fn user(id: u64, text: Option<String>, attachments: Vec<AttachmentRef>) -> Self {
        Self {
            text,
            attachments,
            ..Self::new(id, Sender::User)
        }
    }

    pub fn pending(id: u64, text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            is_pending: true,
            ..Self::new(id, Sender::Ai)
        }
    }

    pub fn ai_text(id: u64, text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::new(id, Sender::Ai)
        }
    }

    pub fn ai_analysis(id: u64, analysis: AnalysisResult) -> Self {
        Self {
            analysis: Some(analysis),
            ..Self::new(id, Sender::Ai)
        }
    }

    /// Non-empty trimmed text, if any.
    pub fn trimmed_text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

/// One conversation thread. `name` is derived on every save.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default = "Utc::now")]
    pub last_activity_at: DateTime<Utc>,
    #[serde(default)]
    pub turn_count: u32,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    /// A fresh in-memory conversation holding only the seed greeting.
    pub fn new(seed_text: impl Into<String>) -> Self {
        let seed = Message::seed(1, seed_text);
        Self {
            id: Uuid::new_v4(),
            name: String::new(),
            last_activity_at: seed.timestamp,
            turn_count: 0,
            messages: vec![seed],
        }
    }

    /// Whether the log holds anything beyond the seed greeting.
    pub fn has_user_interaction(&self) -> bool {
        self.turn_count > 0 || self.messages.iter().any(|m| m.sender == Sender::User)
    }

    pub fn next_message_id(&self) -> u64 {
        self.messages.iter().map(|m| m.id).max().unwrap_or(0) + 1
    }
}
