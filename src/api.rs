use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::models::GroundingSource;
use crate::prompt::{OrderedTurn, Part, ProviderRequest, TurnRole};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// What the provider returned for one turn.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProviderResponse {
    pub text: String,
    pub citations: Vec<GroundingSource>,
}

// Trait defining the interface for generative-AI backends
#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    /// One call per submitted turn. Implementations must not retry.
    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError>;
}

// --- Gemini REST Implementation ---

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiRequestBody<'a> {
    contents: Vec<GeminiContent<'a>>,
    system_instruction: GeminiSystemInstruction<'a>,
    tools: Vec<GeminiTool>,
}

#[derive(Serialize, Debug)]
struct GeminiContent<'a> {
    role: &'static str,
    parts: &'a [Part],
}

#[derive(Serialize, Debug)]
struct GeminiSystemInstruction<'a> {
    parts: Vec<GeminiTextPart<'a>>,
}

#[derive(Serialize, Debug)]
struct GeminiTextPart<'a> {
    text: &'a str,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    google_search: serde_json::Value,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiResponseBody {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
    grounding_metadata: Option<GeminiGroundingMetadata>,
}

#[derive(Deserialize, Debug)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Deserialize, Debug)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiGroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GeminiGroundingChunk>,
}

#[derive(Deserialize, Debug)]
struct GeminiGroundingChunk {
    web: Option<GeminiWebSource>,
}

#[derive(Deserialize, Debug)]
struct GeminiWebSource {
    uri: Option<String>,
    title: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GeminiErrorWrapper {
    error: GeminiErrorBody,
}

#[derive(Deserialize, Debug)]
struct GeminiErrorBody {
    message: Option<String>,
    status: Option<String>,
}

pub struct GeminiProvider {
    client: Client,
    api_url: String,
    model: String,
    api_key: String,
}

impl GeminiProvider {
    pub fn new(api_url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    fn request_body<'a>(request: &'a ProviderRequest) -> GeminiRequestBody<'a> {
        let history = request.history.as_deref().unwrap_or_default();
        let mut contents: Vec<GeminiContent<'a>> = history.iter().map(content_for_turn).collect();
        contents.push(GeminiContent {
            role: "user",
            parts: &request.current_turn_parts,
        });
        GeminiRequestBody {
            contents,
            system_instruction: GeminiSystemInstruction {
                parts: vec![GeminiTextPart {
                    text: &request.system_guidance,
                }],
            },
            tools: vec![GeminiTool {
                google_search: serde_json::json!({}),
            }],
        }
    }
}

fn content_for_turn(turn: &OrderedTurn) -> GeminiContent<'_> {
    GeminiContent {
        role: match turn.role {
            TurnRole::User => "user",
            TurnRole::Model => "model",
        },
        parts: &turn.parts,
    }
}

fn extract_response(body: GeminiResponseBody) -> Result<ProviderResponse, ProviderError> {
    let Some(candidate) = body.candidates.into_iter().next() else {
        let reason = body
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .unwrap_or_else(|| "no candidates returned".to_string());
        return Err(ProviderError::ProviderRejected {
            status: None,
            message: reason,
        });
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    let citations = candidate
        .grounding_metadata
        .map(|meta| {
            meta.grounding_chunks
                .into_iter()
                .filter_map(|chunk| chunk.web)
                .filter_map(|web| {
                    let uri = web.uri.filter(|u| !u.is_empty())?;
                    let title = web.title.filter(|t| !t.is_empty()).unwrap_or_else(|| uri.clone());
                    Some(GroundingSource { uri, title })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ProviderResponse { text, citations })
}

fn map_http_error(status: StatusCode, body: &str) -> ProviderError {
    let message = serde_json::from_str::<GeminiErrorWrapper>(body)
        .map(|wrapper| {
            let msg = wrapper.error.message.unwrap_or_else(|| body.to_string());
            match wrapper.error.status {
                Some(status_text) if !status_text.is_empty() => format!("{}: {}", status_text, msg),
                _ => msg,
            }
        })
        .unwrap_or_else(|_| body.to_string());

    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        log::error!("Gemini rejected the API key ({}): {}", status, message);
    }
    ProviderError::ProviderRejected {
        status: Some(status.as_u16()),
        message,
    }
}

#[async_trait]
impl GenerativeProvider for GeminiProvider {
    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        if self.api_key.trim().is_empty() {
            return Err(ProviderError::AuthMissing);
        }

        let request_url = format!(
            "{}/{}:generateContent",
            self.api_url.trim_end_matches('/'),
            self.model
        );
        log::info!(
            "Sending {:?} request to {} ({} history turn(s))",
            request.mode,
            request_url,
            request.history.as_ref().map_or(0, Vec::len)
        );

        let response = self
            .client
            .post(&request_url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::request_body(request))
            .send()
            .await
            .map_err(|e| ProviderError::NetworkFailure(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "<Failed to read error body>".to_string());
            log::error!("Gemini request failed with status {}: {}", status, error_body);
            return Err(map_http_error(status, &error_body));
        }

        let body: GeminiResponseBody = response
            .json()
            .await
            .map_err(|e| ProviderError::NetworkFailure(format!("Failed to decode response: {}", e)))?;
        let reply = extract_response(body)?;
        log::info!(
            "Received {} chars with {} citation(s)",
            reply.text.len(),
            reply.citations.len()
        );
        Ok(reply)
    }
}
