//! Per-task fallback policies
//!
//! Link order is a product decision made per task kind and is not user
//! configurable. Analysis prefers the primary vendor's newest model;
//! refinement tries the secondary vendor before the primary one.

use crate::api::OptionOverrides;
use crate::config::Provider;
use crate::error::Result;
use crate::router::chain::{FallbackChain, Link, TaskKind};

pub const GEMINI_FLASH: &str = "gemini-2.5-flash";
pub const GEMINI_FLASH_PREVIOUS: &str = "gemini-2.0-flash";
pub const GEMINI_FLASH_LITE: &str = "gemini-2.0-flash-lite";
pub const GEMINI_PRO: &str = "gemini-2.5-pro";
pub const GEMINI_IMAGE: &str = "gemini-2.0-flash-preview-image-generation";
pub const GROQ_VISION: &str = "meta-llama/llama-4-scout-17b-16e-instruct";
pub const GROQ_TEXT: &str = "llama-3.3-70b-versatile";
pub const OPENROUTER_VISION: &str = "meta-llama/llama-4-maverick:free";

fn json_mode() -> OptionOverrides {
    OptionOverrides {
        json_mode: Some(true),
        ..Default::default()
    }
}

/// Document analysis: newest Gemini, older Gemini, then two vision models
/// from alternate vendors. A model hint replaces the first layer; a bare
/// model id is taken to be a Gemini model.
pub fn analyze_chain(model_hint: Option<&str>) -> Result<FallbackChain> {
    let chain = FallbackChain::new(
        TaskKind::Analyze,
        vec![
            Link::new(Provider::Gemini, GEMINI_FLASH).with_overrides(json_mode()),
            Link::new(Provider::Gemini, GEMINI_FLASH_PREVIOUS).with_overrides(json_mode()),
            Link::new(Provider::Groq, GROQ_VISION).with_overrides(json_mode()),
            Link::new(Provider::OpenRouter, OPENROUTER_VISION).with_overrides(json_mode()),
        ],
    );

    let hint = match model_hint.map(str::trim).filter(|h| !h.is_empty()) {
        Some(hint) => hint,
        None => return Ok(chain),
    };

    let primary = if hint.contains('/') {
        Link::parse(hint)?
    } else {
        Link::new(Provider::Gemini, hint)
    };
    Ok(chain.with_primary(primary.with_overrides(json_mode())))
}

/// Answer refinement: the caller's link, then Groq before Gemini
pub fn refine_chain(requested: Link) -> FallbackChain {
    let mut links = vec![requested];
    for fallback in [
        Link::new(Provider::Groq, GROQ_TEXT),
        Link::new(Provider::Gemini, GEMINI_FLASH),
    ] {
        if !links.iter().any(|l| l.same_target(&fallback)) {
            links.push(fallback);
        }
    }
    FallbackChain::new(TaskKind::Refine, links)
}

/// Single-shot title generation
pub fn title_link() -> Link {
    Link::new(Provider::Gemini, GEMINI_FLASH_LITE).with_overrides(OptionOverrides {
        temperature: Some(0.3),
        max_tokens: Some(32),
        ..Default::default()
    })
}

/// Single-key image generation
pub fn image_link() -> Link {
    Link::new(Provider::Gemini, GEMINI_IMAGE)
}
