//! Chat delta stream
//!
//! Wraps a backend's delta stream, keeps the text received so far and
//! drives the session's [`ChatState`]. Dropping a `ChatStream` drops the
//! underlying response body, which closes the connection. A stream dropped
//! before it finished leaves the session in [`ChatState::Failed`].

use crate::api::DeltaStream;
use crate::chat::ChatState;
use crate::error::Result;
use crate::router::Link;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

pin_project! {
    /// Incremental text deltas of one chat turn
    ///
    /// Yields each fragment as it arrives (`"Hel"`, `"lo"`), never the
    /// cumulative text. Single pass: once finished it yields nothing more.
    pub struct ChatStream {
        #[pin]
        deltas: DeltaStream,
        text: String,
        state: ChatState,
        shared: Arc<Mutex<ChatState>>,
        served_by: Link,
    }

    impl PinnedDrop for ChatStream {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if this.state.is_terminal() {
                return;
            }
            let mut shared = this.shared.lock();
            if *shared == ChatState::Streaming {
                *shared = ChatState::Failed;
            }
            tracing::debug!(
                provider = %this.served_by.provider,
                received = this.text.len(),
                "chat stream abandoned"
            );
        }
    }
}

impl ChatStream {
    pub(crate) fn new(deltas: DeltaStream, served_by: Link, shared: Arc<Mutex<ChatState>>) -> Self {
        *shared.lock() = ChatState::Streaming;
        Self {
            deltas,
            text: String::new(),
            state: ChatState::Streaming,
            shared,
            served_by,
        }
    }

    /// Text received so far; the partial answer after a failure
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn state(&self) -> ChatState {
        self.state
    }

    /// Provider and model serving this turn
    pub fn served_by(&self) -> &Link {
        &self.served_by
    }

    /// Drain the stream and return the full answer
    ///
    /// On a mid-stream error the partial text stays available through
    /// [`ChatStream::text`].
    pub async fn collect_text(&mut self) -> Result<String> {
        while let Some(delta) = self.next().await {
            delta?;
        }
        Ok(self.text.clone())
    }
}

impl std::fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStream")
            .field("state", &self.state)
            .field("served_by", &self.served_by.to_string())
            .field("received", &self.text.len())
            .finish()
    }
}

impl Stream for ChatStream {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if this.state.is_terminal() {
            return Poll::Ready(None);
        }

        match this.deltas.poll_next(cx) {
            Poll::Ready(Some(Ok(delta))) => {
                this.text.push_str(&delta);
                Poll::Ready(Some(Ok(delta)))
            }
            Poll::Ready(Some(Err(err))) => {
                tracing::warn!(
                    provider = %this.served_by.provider,
                    model = %this.served_by.model,
                    received = this.text.len(),
                    error = %err,
                    "chat stream failed"
                );
                *this.state = ChatState::Failed;
                *this.shared.lock() = ChatState::Failed;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                tracing::debug!(
                    provider = %this.served_by.provider,
                    received = this.text.len(),
                    "chat stream completed"
                );
                *this.state = ChatState::Completed;
                *this.shared.lock() = ChatState::Completed;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
