//! API Module
//!
//! Provider-neutral invocations plus the wire types of each backend family.

pub mod completion;
pub mod gemini;
pub mod invocation;
pub mod streaming;

pub use completion::{CompletionRequest, CompletionResponse, Message, MessageContent};
pub use gemini::{GenerateContentRequest, GenerateContentResponse, InlineData};
pub use invocation::{Attachment, GenerationOptions, Invocation, OptionOverrides, Part, Role, Turn};
pub use streaming::{parse_sse_line, ByteStream, DeltaStream, SseDecoder, StreamChunk};
