//! Streamed Responses
//!
//! A streamed query answer is a finite sequence of text fragments closed by
//! an explicit [`StreamEvent::End`]. Consumption is pull based and one-shot.

use futures_util::stream::{self, BoxStream, Stream, StreamExt};

use crate::error::{MaplinkError, PlatformError, Result};

/// Item produced by a platform stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Chunk(String),
    /// Terminal marker; nothing follows it
    End,
}

/// Non-restartable sequence of response fragments
pub struct ResponseStream {
    inner: BoxStream<'static, std::result::Result<StreamEvent, PlatformError>>,
    finished: bool,
    received: usize,
}

impl ResponseStream {
    pub fn new<S>(events: S) -> Self
    where
        S: Stream<Item = std::result::Result<StreamEvent, PlatformError>> + Send + 'static,
    {
        Self {
            inner: events.boxed(),
            finished: false,
            received: 0,
        }
    }

    /// Stream over a fixed list of events
    pub fn from_events(events: Vec<std::result::Result<StreamEvent, PlatformError>>) -> Self {
        Self::new(stream::iter(events))
    }

    /// Next fragment, or `None` once the end marker was seen. A stream that
    /// closes without the marker yields a transient error once, then `None`.
    pub async fn next_chunk(&mut self) -> Option<Result<String>> {
        if self.finished {
            return None;
        }

        match self.inner.next().await {
            Some(Ok(StreamEvent::Chunk(text))) => {
                self.received += 1;
                Some(Ok(text))
            }
            Some(Ok(StreamEvent::End)) => {
                self.finished = true;
                None
            }
            Some(Err(e)) => {
                self.finished = true;
                Some(Err(MaplinkError::remote("stream query", 1, e)))
            }
            None => {
                self.finished = true;
                Some(Err(MaplinkError::RemoteTransient {
                    operation: "stream query",
                    attempts: 1,
                    source: PlatformError::Transport(format!(
                        "stream closed without end marker after {} fragment(s)",
                        self.received
                    )),
                }))
            }
        }
    }

    /// Whether the stream is exhausted
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Fragments delivered so far
    pub fn received(&self) -> usize {
        self.received
    }

    /// Drain every remaining fragment
    pub async fn collect_chunks(mut self) -> Result<Vec<String>> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            chunks.push(chunk?);
        }
        Ok(chunks)
    }
}
