//! Task Invocations
//!
//! Provider-neutral description of one unit of work: conversation turns,
//! optional inline attachments and generation options. Adapters translate
//! it into their own wire format.

use serde::{Deserialize, Serialize};

/// Author of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Inline binary attachment, already base64 encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub mime_type: String,
    pub data: String,
}

impl Attachment {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// `data:` URI form used by OpenAI-compatible image parts
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// A piece of turn content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Part {
    Text(String),
    Inline(Attachment),
}

/// One conversation turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::Text(text.into())],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            parts: vec![Part::Text(text.into())],
        }
    }

    /// Concatenated text parts
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(text) => Some(text.as_str()),
                Part::Inline(_) => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.parts.iter().filter_map(|p| match p {
            Part::Inline(attachment) => Some(attachment),
            Part::Text(_) => None,
        })
    }
}

/// Provider-independent generation knobs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Ask for a JSON document as the response
    #[serde(default)]
    pub json_mode: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Reasoning budget in tokens; 0 disables thinking where supported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<i32>,

    /// Enable the provider's web-search grounding tool
    #[serde(default)]
    pub web_search: bool,

    /// Ask for image output alongside text
    #[serde(default)]
    pub image_output: bool,
}

/// Per-link overrides applied on top of an invocation's options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_mode: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_search: Option<bool>,
}

impl OptionOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Options with these overrides applied
    pub fn apply(&self, base: &GenerationOptions) -> GenerationOptions {
        GenerationOptions {
            json_mode: self.json_mode.unwrap_or(base.json_mode),
            temperature: self.temperature.or(base.temperature),
            max_tokens: self.max_tokens.or(base.max_tokens),
            thinking_budget: self.thinking_budget.or(base.thinking_budget),
            web_search: self.web_search.unwrap_or(base.web_search),
            image_output: base.image_output,
        }
    }
}

/// The unit of work submitted to a backend. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    system: Option<String>,
    turns: Vec<Turn>,
    options: GenerationOptions,
}

impl Invocation {
    /// Single user prompt
    pub fn prompt(text: impl Into<String>) -> Self {
        Self::conversation(vec![Turn::user(text)])
    }

    /// Full conversation history
    pub fn conversation(turns: Vec<Turn>) -> Self {
        Self {
            system: None,
            turns,
            options: GenerationOptions::default(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Attach inline files to the last user turn
    pub fn with_attachments(mut self, attachments: impl IntoIterator<Item = Attachment>) -> Self {
        let parts = attachments.into_iter().map(Part::Inline);
        match self.turns.iter_mut().rev().find(|t| t.role == Role::User) {
            Some(turn) => turn.parts.extend(parts),
            None => self.turns.push(Turn {
                role: Role::User,
                parts: parts.collect(),
            }),
        }
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// A copy of this invocation with link overrides applied
    pub fn overridden(&self, overrides: &OptionOverrides) -> Self {
        if overrides.is_empty() {
            return self.clone();
        }
        Self {
            system: self.system.clone(),
            turns: self.turns.clone(),
            options: overrides.apply(&self.options),
        }
    }

    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }
}
