//! Newline-delimited JSON fragments from a streaming chat endpoint.
//!
//! Each line looks like `{"message":{"role":"assistant","content":"Ho"},"done":false}`.
//! `fragments` turns raw byte chunks into a lazy stream of parsed fragments;
//! `assemble` folds it into the final text.

use std::fmt::Display;

use futures::{Stream, StreamExt, stream};
use serde::Deserialize;
use tracing::warn;

use crate::error::LlmError;
use crate::llm::GenerationResult;

/// One parsed line of the response stream.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Fragment {
    #[serde(default)]
    pub message: Option<FragmentMessage>,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct FragmentMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl Fragment {
    /// The content increment, if any.
    pub fn content(&self) -> Option<&str> {
        self.message.as_ref()?.content.as_deref()
    }
}

/// Parse one line. Blank lines are ignored, malformed ones logged and skipped.
pub fn parse_fragment(line: &str) -> Option<Fragment> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(fragment) => Some(fragment),
        Err(e) => {
            warn!(error = %e, "Skipping malformed stream fragment");
            None
        }
    }
}

struct LineSplitter<S> {
    chunks: S,
    buffer: Vec<u8>,
    exhausted: bool,
}

impl<S> LineSplitter<S> {
    fn next_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.buffer.drain(..=pos).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    fn take_rest(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Lazily split a byte-chunk stream into parsed fragments.
///
/// Lines may span chunk boundaries; a final line without a trailing newline is
/// still parsed. A transport error is yielded once and ends the stream.
pub fn fragments<S, B, E>(chunks: S) -> impl Stream<Item = Result<Fragment, LlmError>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    let splitter = LineSplitter {
        chunks,
        buffer: Vec::new(),
        exhausted: false,
    };

    stream::unfold(splitter, |mut state| async move {
        loop {
            if let Some(line) = state.next_line() {
                if let Some(fragment) = parse_fragment(&line) {
                    return Some((Ok(fragment), state));
                }
                continue;
            }

            if state.exhausted {
                let line = state.take_rest()?;
                if let Some(fragment) = parse_fragment(&line) {
                    return Some((Ok(fragment), state));
                }
                continue;
            }

            match state.chunks.next().await {
                Some(Ok(chunk)) => state.buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    state.exhausted = true;
                    state.buffer.clear();
                    return Some((Err(LlmError::Stream(e.to_string())), state));
                }
                None => state.exhausted = true,
            }
        }
    })
}

/// Concatenate fragment contents in arrival order until `done` or stream end.
pub async fn assemble<S, B, E>(chunks: S) -> Result<GenerationResult, LlmError>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut fragments = std::pin::pin!(fragments(chunks));
    let mut text = String::new();

    while let Some(fragment) = fragments.next().await {
        let fragment = fragment?;
        if let Some(content) = fragment.content() {
            text.push_str(content);
        }
        if fragment.done {
            break;
        }
    }

    Ok(if text.is_empty() {
        GenerationResult::Empty
    } else {
        GenerationResult::Text(text)
    })
}
