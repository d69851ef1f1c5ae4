//! Gemini generateContent API
//!
//! Wire types for the native Gemini REST API, shared by the one-shot
//! (`:generateContent`) and streaming (`:streamGenerateContent`) calls.

use crate::api::invocation::{Invocation, Part, Role};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,

    /// Set on reasoning summaries when thinking output is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
}

impl GeminiPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_modalities: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<ThinkingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingConfig {
    pub thinking_budget: i32,
}

impl GenerateContentRequest {
    /// Translate a provider-neutral invocation
    pub fn from_invocation(invocation: &Invocation) -> Self {
        let contents = invocation
            .turns()
            .iter()
            .map(|turn| Content {
                role: Some(
                    match turn.role {
                        Role::User => "user",
                        Role::Assistant => "model",
                    }
                    .to_string(),
                ),
                parts: turn
                    .parts
                    .iter()
                    .map(|part| match part {
                        Part::Text(text) => GeminiPart::text(text.clone()),
                        Part::Inline(attachment) => GeminiPart {
                            inline_data: Some(InlineData {
                                mime_type: attachment.mime_type.clone(),
                                data: attachment.data.clone(),
                            }),
                            ..Default::default()
                        },
                    })
                    .collect(),
            })
            .collect();

        let options = invocation.options();
        let config = GenerationConfig {
            temperature: options.temperature,
            max_output_tokens: options.max_tokens,
            response_mime_type: options
                .json_mode
                .then(|| "application/json".to_string()),
            response_modalities: options
                .image_output
                .then(|| vec!["TEXT".to_string(), "IMAGE".to_string()]),
            thinking_config: options.thinking_budget.map(|thinking_budget| ThinkingConfig {
                thinking_budget,
            }),
        };
        let has_config = config.temperature.is_some()
            || config.max_output_tokens.is_some()
            || config.response_mime_type.is_some()
            || config.response_modalities.is_some()
            || config.thinking_config.is_some();

        Self {
            contents,
            system_instruction: invocation.system().map(|system| Content {
                role: None,
                parts: vec![GeminiPart::text(system)],
            }),
            generation_config: has_config.then_some(config),
            tools: options
                .web_search
                .then(|| vec![serde_json::json!({ "googleSearch": {} })]),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_feedback: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl GenerateContentResponse {
    fn parts(&self) -> impl Iterator<Item = &GeminiPart> {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.iter())
            .into_iter()
            .flatten()
    }

    /// Concatenated answer text of the first candidate, thoughts excluded
    pub fn text(&self) -> String {
        self.parts()
            .filter(|p| p.thought != Some(true))
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }

    /// Inline binary outputs (generated images) of the first candidate
    pub fn inline_data(&self) -> Vec<&InlineData> {
        self.parts().filter_map(|p| p.inline_data.as_ref()).collect()
    }

    /// Finish reason of the first candidate
    pub fn finish_reason(&self) -> Option<&str> {
        self.candidates.first().and_then(|c| c.finish_reason.as_deref())
    }
}

/// `{"error": {...}}` body returned on failures
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<u16>,

    #[serde(default)]
    pub message: String,

    /// Canonical status, e.g. "RESOURCE_EXHAUSTED"
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub details: Vec<serde_json::Value>,
}

impl ErrorBody {
    /// `reason` fields of ErrorInfo details, e.g. "API_KEY_INVALID"
    pub fn reasons(&self) -> impl Iterator<Item = &str> {
        self.details
            .iter()
            .filter_map(|d| d.get("reason").and_then(|r| r.as_str()))
    }
}
