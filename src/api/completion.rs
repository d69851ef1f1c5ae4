//! Chat Completion API
//!
//! Wire types for OpenAI-compatible chat completion endpoints (Groq, OpenRouter).

use crate::api::invocation::{Invocation, Part, Role};
use serde::{Deserialize, Serialize};

/// A message in a chat conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role: "system", "user" or "assistant"
    pub role: String,

    /// Message content (can be string or array of content parts)
    pub content: MessageContent,

    /// Reasoning text some providers return next to the content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl Message {
    pub fn text(role: &str, text: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: MessageContent::Text(text.into()),
            reasoning: None,
        }
    }
}

/// Message content - can be a simple string or array of parts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple string content
    Text(String),

    /// Array of content parts (for multimodal)
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Convert to string (concatenating parts if needed)
    pub fn to_string_content(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// A content part in a message (for multimodal content)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    /// Text content
    #[serde(rename = "text")]
    Text { text: String },

    /// Image content
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

/// Image URL content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    /// URL or base64 data URL
    pub url: String,
}

/// Structured output request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: String,
}

/// Chat completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model identifier
    pub model: String,

    /// Messages in the conversation
    pub messages: Vec<Message>,

    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Enable streaming
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// JSON mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

impl CompletionRequest {
    /// Create a new completion request
    pub fn new(model: String, messages: Vec<Message>) -> Self {
        Self {
            model,
            messages,
            temperature: None,
            max_tokens: None,
            stream: None,
            response_format: None,
        }
    }

    /// Translate a provider-neutral invocation
    ///
    /// Text-only turns become plain string content; turns with attachments
    /// become part arrays with `data:` URI image parts.
    pub fn from_invocation(model: &str, invocation: &Invocation) -> Self {
        let mut messages = Vec::with_capacity(invocation.turns().len() + 1);

        if let Some(system) = invocation.system() {
            messages.push(Message::text("system", system));
        }

        for turn in invocation.turns() {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };

            let content = if turn.attachments().next().is_none() {
                MessageContent::Text(turn.text())
            } else {
                MessageContent::Parts(
                    turn.parts
                        .iter()
                        .map(|part| match part {
                            Part::Text(text) => ContentPart::Text { text: text.clone() },
                            Part::Inline(attachment) => ContentPart::ImageUrl {
                                image_url: ImageUrl {
                                    url: attachment.data_uri(),
                                },
                            },
                        })
                        .collect(),
                )
            };

            messages.push(Message {
                role: role.to_string(),
                content,
                reasoning: None,
            });
        }

        let options = invocation.options();
        let mut request = Self::new(model.to_string(), messages);
        request.temperature = options.temperature;
        request.max_tokens = options.max_tokens;
        if options.json_mode {
            request.response_format = Some(ResponseFormat {
                format_type: "json_object".to_string(),
            });
        }
        request
    }

    /// Enable streaming
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }
}

/// Chat completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Response ID
    #[serde(default)]
    pub id: String,

    /// Model used
    #[serde(default)]
    pub model: String,

    /// Response choices
    pub choices: Vec<Choice>,

    /// Token usage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// A choice in the completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    /// Choice index
    #[serde(default)]
    pub index: u32,

    /// The message
    pub message: Message,

    /// Finish reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Token usage information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl CompletionResponse {
    /// First choice content, falling back to reasoning when content is empty
    pub fn content(&self) -> Option<String> {
        self.choices.first().map(|c| {
            let content = c.message.content.to_string_content();
            if content.is_empty() {
                c.message.reasoning.clone().unwrap_or_default()
            } else {
                content
            }
        })
    }
}
