//! Streaming Support
//!
//! Server-Sent Events decoding and text-delta extraction for chat streams.
//! End of stream is the transport closing; `[DONE]` sentinels are skipped.

use crate::api::gemini::GenerateContentResponse;
use crate::error::{GatewayError, Result};
use async_stream::stream;
use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Raw response body chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Incremental text fragments, in arrival order
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A streaming chunk from an OpenAI-compatible API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub model: String,

    /// Choices with deltas
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

/// A choice in a streaming chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub index: u32,

    /// The delta (partial message)
    pub delta: StreamDelta,

    /// Finish reason (set in final chunk)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Delta content in a streaming chunk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamDelta {
    /// Role (usually only in first chunk)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Content delta
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl StreamChunk {
    /// Content of the first choice's delta
    pub fn content(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.delta.content.as_deref())
    }
}

/// Splits a byte stream into complete SSE lines
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every line it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line = self.buffer.split_to(pos + 1);
            lines.push(decode_line(&line));
        }
        lines
    }

    /// Remaining partial line once the transport has closed
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = decode_line(&self.buffer);
        self.buffer.advance(self.buffer.len());
        Some(line)
    }
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

/// Payload of an SSE `data:` line
///
/// Returns `None` for blank lines, comments, other fields and `[DONE]`.
pub fn sse_data(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    Some(data)
}

/// Fail on `{"error": ...}` payloads sent mid-stream
fn check_stream_error(data: &str) -> Result<()> {
    if !data.contains("\"error\"") {
        return Ok(());
    }
    let value: serde_json::Value = serde_json::from_str(data)?;
    match value.get("error") {
        Some(error) => {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(String::from)
                .unwrap_or_else(|| error.to_string());
            Err(GatewayError::Stream(message))
        }
        None => Ok(()),
    }
}

/// Parse an SSE line from an OpenAI-compatible stream into a chunk
pub fn parse_sse_line(line: &str) -> Result<Option<StreamChunk>> {
    let Some(data) = sse_data(line) else {
        return Ok(None);
    };
    check_stream_error(data)?;

    let chunk: StreamChunk = serde_json::from_str(data).map_err(|e| {
        GatewayError::Stream(format!("Failed to parse SSE chunk: {}. Data: {}", e, data))
    })?;
    Ok(Some(chunk))
}

/// Text delta carried by an OpenAI-compatible SSE line
pub fn openai_delta(line: &str) -> Result<Option<String>> {
    Ok(parse_sse_line(line)?.and_then(|chunk| chunk.content().map(String::from)))
}

/// Text delta carried by a Gemini `alt=sse` line
pub fn gemini_delta(line: &str) -> Result<Option<String>> {
    let Some(data) = sse_data(line) else {
        return Ok(None);
    };
    check_stream_error(data)?;

    let response: GenerateContentResponse = serde_json::from_str(data).map_err(|e| {
        GatewayError::Stream(format!("Failed to parse Gemini chunk: {}. Data: {}", e, data))
    })?;
    let text = response.text();
    Ok((!text.is_empty()).then_some(text))
}

/// Turn an SSE byte stream into a stream of non-empty text deltas
///
/// Lazy and pull-driven: nothing is read from the transport until the
/// consumer polls. The first error ends the stream.
pub fn text_deltas(mut bytes: ByteStream, extract: fn(&str) -> Result<Option<String>>) -> DeltaStream {
    let deltas = stream! {
        let mut decoder = SseDecoder::new();

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };

            for line in decoder.push(&chunk) {
                match extract(&line) {
                    Ok(Some(delta)) => yield Ok(delta),
                    Ok(None) => {}
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }
        }

        if let Some(line) = decoder.finish() {
            match extract(&line) {
                Ok(Some(delta)) => yield Ok(delta),
                Ok(None) => {}
                Err(err) => yield Err(err),
            }
        }
    };

    Box::pin(deltas)
}
