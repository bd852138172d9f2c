//! Mailbox reader: lists unseen messages, parses them, keeps the keyword matches.
//!
//! The reader only talks to the mailbox through `MailboxConnector` and
//! `MailboxSession`, so the IMAP client can be swapped for an in-memory one
//! in tests. Everything here is blocking; the poller runs it on tokio's
//! blocking pool.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::channels::email_types::{InboundMessage, subject_matches};
use crate::error::MailboxError;

/// Opens authenticated sessions against a mail source.
pub trait MailboxConnector: Send + Sync {
    /// Connect and authenticate.
    fn connect(&self) -> Result<Box<dyn MailboxSession>, MailboxError>;
}

/// One authenticated mailbox session.
pub trait MailboxSession {
    /// Select a folder.
    fn select(&mut self, folder: &str) -> Result<(), MailboxError>;

    /// Stable identifiers (UIDs) of messages without the `\Seen` flag.
    fn search_unseen(&mut self) -> Result<Vec<String>, MailboxError>;

    /// Full raw message.
    fn fetch_raw(&mut self, id: &str) -> Result<Vec<u8>, MailboxError>;

    /// End the session.
    fn logout(&mut self) -> Result<(), MailboxError>;
}

/// Selects candidate messages from one folder.
#[derive(Clone)]
pub struct MailboxReader {
    connector: Arc<dyn MailboxConnector>,
    folder: String,
}

impl MailboxReader {
    pub fn new(connector: Arc<dyn MailboxConnector>, folder: impl Into<String>) -> Self {
        Self {
            connector,
            folder: folder.into(),
        }
    }

    /// Unseen, not yet processed messages whose subject contains `keyword`.
    ///
    /// Connection, select and search failures are returned so the caller can
    /// skip the cycle. Failures on a single message only skip that message.
    /// The session is logged out on every path once it was established.
    pub fn fetch_candidates(
        &self,
        keyword: &str,
        already_processed: &HashSet<String>,
    ) -> Result<Vec<InboundMessage>, MailboxError> {
        let mut session = self.connector.connect()?;

        let result = self.scan(session.as_mut(), keyword, already_processed);

        if let Err(e) = session.logout() {
            warn!(error = %e, "Mailbox logout failed");
        }

        result
    }

    fn scan(
        &self,
        session: &mut dyn MailboxSession,
        keyword: &str,
        already_processed: &HashSet<String>,
    ) -> Result<Vec<InboundMessage>, MailboxError> {
        session.select(&self.folder)?;
        let unseen = session.search_unseen()?;
        info!(folder = %self.folder, unseen = unseen.len(), "Listed unseen messages");

        let mut candidates = Vec::new();
        for id in unseen {
            if already_processed.contains(&id) {
                debug!(id = %id, "Already processed, skipping");
                continue;
            }

            let raw = match session.fetch_raw(&id) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(id = %id, error = %e, "Failed to fetch message");
                    continue;
                }
            };

            let Some(msg) = InboundMessage::parse(id.clone(), &raw) else {
                warn!(id = %id, "Message could not be parsed, skipping");
                continue;
            };

            if !subject_matches(&msg.subject, keyword) {
                debug!(id = %id, subject = %msg.subject, "Subject does not match filter");
                continue;
            }

            info!(id = %id, subject = %msg.subject, sender = %msg.sender, "Message matches filter");
            candidates.push(msg);
        }

        Ok(candidates)
    }
}
