//! Streaming response aggregation
//!
//! The upstream client may emit plain deltas or cumulative "content so far"
//! snapshots, and does not say which. A chunk that starts with everything
//! accumulated so far replaces the accumulator; anything else is appended.
//! A delta that happens to begin with the accumulated text is therefore
//! misread as cumulative. The upstream chunk contract is unknown, so the
//! heuristic is kept as is.

use futures::{Stream, StreamExt};

use crate::core::errors::{GatewayError, Result};

/// One item from the upstream model stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    /// Plain text fragment
    Delta(String),
    /// Content object carrying text (delta or cumulative)
    Content(String),
    /// Structured error reported mid-stream
    Error(String),
}

/// Reduces chunks to a single text value
#[derive(Debug, Default)]
pub struct Accumulator {
    text: String,
    chunks: usize,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one chunk in. An error chunk aborts aggregation.
    pub fn push(&mut self, chunk: StreamChunk) -> Result<()> {
        let content = match chunk {
            StreamChunk::Error(message) => {
                return Err(GatewayError::UpstreamStreamError { message });
            }
            StreamChunk::Delta(text) | StreamChunk::Content(text) => text,
        };

        self.chunks += 1;

        if content.is_empty() {
            return Ok(());
        }

        if !self.text.is_empty() && content.starts_with(&self.text) {
            self.text = content;
        } else {
            self.text.push_str(&content);
        }

        Ok(())
    }

    /// Text accumulated so far
    pub fn current(&self) -> &str {
        &self.text
    }

    pub fn chunks_seen(&self) -> usize {
        self.chunks
    }

    /// Finish the stream. Blank output counts as a failure.
    pub fn finish(self) -> Result<String> {
        if self.text.trim().is_empty() {
            return Err(GatewayError::EmptyResult);
        }
        Ok(self.text)
    }
}

/// Drain a chunk stream into its final text
pub async fn aggregate<S>(stream: S) -> Result<String>
where
    S: Stream<Item = Result<StreamChunk>>,
{
    futures::pin_mut!(stream);
    let mut accumulator = Accumulator::new();

    while let Some(chunk) = stream.next().await {
        accumulator.push(chunk?)?;
    }

    accumulator.finish()
}
