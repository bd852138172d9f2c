//! Mail I/O: reading the mailbox and sending replies.

pub mod email_types;
pub mod imap;
pub mod mailbox;
pub mod smtp;

pub use email_types::{InboundMessage, OutboundReply};
pub use imap::ImapConnector;
pub use mailbox::{MailboxConnector, MailboxReader, MailboxSession};
pub use smtp::{MailTransmitter, SmtpTransmitter, dispatch};
