//! Reply generation.
//!
//! `ReplyGenerator` is the seam the poller talks to. `CompletionClient` is the
//! production implementation: it posts the email body to a streaming chat
//! endpoint and folds the newline-delimited JSON fragments into one reply.

pub mod completion;
pub mod stream;

pub use completion::CompletionClient;

use async_trait::async_trait;

use crate::error::LlmError;

/// Sent when the endpoint answered but produced no text.
pub const NO_ANSWER_FALLBACK: &str = "No answer could be generated.";

/// Sent when the request or the stream failed.
pub const PROCESSING_FAILURE_FALLBACK: &str = "The message could not be processed.";

/// Outcome of a completed generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationResult {
    /// Non-empty generated text.
    Text(String),
    /// The stream finished without any content.
    Empty,
}

impl GenerationResult {
    /// The reply body. Never empty.
    pub fn into_reply(self) -> String {
        match self {
            GenerationResult::Text(text) => text,
            GenerationResult::Empty => NO_ANSWER_FALLBACK.to_string(),
        }
    }
}

/// Produces a reply body for an email.
///
/// Failures are returned as-is; the caller substitutes
/// `PROCESSING_FAILURE_FALLBACK`.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Run one generation for `body`.
    async fn generate(&self, body: &str) -> Result<GenerationResult, LlmError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Returns canned outcomes and records the bodies it was asked about.
    pub(crate) struct ScriptedGenerator {
        pub reply: Mutex<Box<dyn FnMut() -> Result<GenerationResult, LlmError> + Send>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        pub fn answering(text: &str) -> Self {
            let text = text.to_string();
            Self::with(move || Ok(GenerationResult::Text(text.clone())))
        }

        pub fn with(
            reply: impl FnMut() -> Result<GenerationResult, LlmError> + Send + 'static,
        ) -> Self {
            Self {
                reply: Mutex::new(Box::new(reply)),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReplyGenerator for ScriptedGenerator {
        async fn generate(&self, body: &str) -> Result<GenerationResult, LlmError> {
            self.calls.lock().unwrap().push(body.to_string());
            let mut reply = self.reply.lock().unwrap();
            (*reply)()
        }
    }
}
