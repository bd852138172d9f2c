//! Error types for the mail responder.

use std::path::PathBuf;

/// Errors the poll loop contains. Configuration errors never reach it; they
/// end the process in `main`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Transmit error: {0}")]
    Transmit(#[from] TransmitError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// What the poll loop does when a stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Reply with the fixed failure text instead of a generated one.
    Fallback,
    /// Give up on the current message, carry on with the rest of the cycle.
    SkipItem,
    /// Give up on this step of the cycle, try again on the next tick.
    SkipCycle,
}

impl Error {
    /// Classify an error by how far its damage reaches.
    pub fn disposition(&self) -> Disposition {
        match self {
            Error::Store(_) | Error::Mailbox(_) => Disposition::SkipCycle,
            Error::Transmit(_) => Disposition::SkipItem,
            Error::Llm(_) => Disposition::Fallback,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration file {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Dedup store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Corrupt processed-id file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Mailbox (IMAP) errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Failed to connect to {host}:{port}: {reason}")]
    ConnectFailed {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Authentication failed for {user}: {reason}")]
    AuthFailed { user: String, reason: String },

    #[error("Command {command} failed: {response}")]
    CommandFailed { command: String, response: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reply transmission (SMTP) errors.
#[derive(Debug, thiserror::Error)]
pub enum TransmitError {
    #[error("Invalid {field} address {address:?}: {reason}")]
    InvalidAddress {
        field: &'static str,
        address: String,
        reason: String,
    },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP relay error: {0}")]
    Relay(String),

    #[error("SMTP send failed: {0}")]
    SendFailed(String),
}

/// Completion endpoint errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Request to {url} failed: {reason}")]
    RequestFailed { url: String, reason: String },

    #[error("Endpoint {url} returned status {status}")]
    BadStatus { url: String, status: u16 },

    #[error("Response stream broke off: {0}")]
    Stream(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailbox_and_store_errors_skip_the_cycle() {
        let err: Error = MailboxError::Protocol("garbage".into()).into();
        assert_eq!(err.disposition(), Disposition::SkipCycle);

        let err: Error = StoreError::Write {
            path: "processed_ids.json".into(),
            source: std::io::Error::other("disk full"),
        }
        .into();
        assert_eq!(err.disposition(), Disposition::SkipCycle);
    }

    #[test]
    fn send_errors_skip_the_item() {
        let err: Error = TransmitError::SendFailed("535 auth".into()).into();
        assert_eq!(err.disposition(), Disposition::SkipItem);
    }

    #[test]
    fn generation_errors_fall_back() {
        let err: Error = LlmError::Stream("reset".into()).into();
        assert_eq!(err.disposition(), Disposition::Fallback);
    }
}
