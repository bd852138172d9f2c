//! Reply dispatch over SMTP via lettre.

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::info;

use crate::channels::email_types::OutboundReply;
use crate::config::SmtpConfig;
use crate::error::TransmitError;

/// Sends one reply. Blocking.
pub trait MailTransmitter: Send + Sync {
    fn send(&self, reply: &OutboundReply) -> Result<(), TransmitError>;
}

/// Send `reply`. Failures are returned for the poller to classify and log.
pub fn dispatch(
    transmitter: &dyn MailTransmitter,
    reply: &OutboundReply,
) -> Result<(), TransmitError> {
    transmitter.send(reply)?;
    info!(to = %reply.to, subject = %reply.subject, "Reply sent");
    Ok(())
}

/// SMTP transmitter authenticated with the mailbox account.
pub struct SmtpTransmitter {
    config: SmtpConfig,
}

impl SmtpTransmitter {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    /// Build the RFC 5322 message for `reply`.
    pub fn build_message(&self, reply: &OutboundReply) -> Result<Message, TransmitError> {
        let from: Mailbox =
            self.config
                .from_address
                .parse()
                .map_err(|e: lettre::address::AddressError| TransmitError::InvalidAddress {
                    field: "from",
                    address: self.config.from_address.clone(),
                    reason: e.to_string(),
                })?;
        let to: Mailbox =
            reply
                .to
                .parse()
                .map_err(|e: lettre::address::AddressError| TransmitError::InvalidAddress {
                    field: "to",
                    address: reply.to.clone(),
                    reason: e.to_string(),
                })?;

        let mut builder = Message::builder()
            .from(from)
            .to(to)
            .subject(reply.subject.as_str())
            .header(ContentType::TEXT_PLAIN);

        if let Some(id) = &reply.in_reply_to {
            let id = format!("<{id}>");
            builder = builder.in_reply_to(id.clone()).references(id);
        }

        builder
            .body(reply.body.clone())
            .map_err(|e| TransmitError::Build(e.to_string()))
    }

    fn transport(&self) -> Result<SmtpTransport, TransmitError> {
        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.expose_secret().to_string(),
        );

        let builder = if self.config.starttls {
            SmtpTransport::starttls_relay(&self.config.host)
        } else {
            SmtpTransport::relay(&self.config.host)
        }
        .map_err(|e| TransmitError::Relay(e.to_string()))?;

        Ok(builder
            .port(self.config.port)
            .credentials(creds)
            .timeout(Some(self.config.timeout))
            .build())
    }
}

impl MailTransmitter for SmtpTransmitter {
    fn send(&self, reply: &OutboundReply) -> Result<(), TransmitError> {
        let email = self.build_message(reply)?;
        let transport = self.transport()?;

        info!(
            host = %self.config.host,
            port = self.config.port,
            to = %reply.to,
            "Connecting to SMTP server"
        );
        transport
            .send(&email)
            .map_err(|e| TransmitError::SendFailed(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records every reply; optionally rejects them all like a failed AUTH.
    #[derive(Default)]
    pub(crate) struct RecordingTransmitter {
        pub sent: Mutex<Vec<OutboundReply>>,
        pub attempts: Mutex<usize>,
        pub reject: bool,
    }

    impl RecordingTransmitter {
        pub fn rejecting() -> Self {
            Self {
                reject: true,
                ..Self::default()
            }
        }

        pub fn sent(&self) -> Vec<OutboundReply> {
            self.sent.lock().unwrap().clone()
        }

        pub fn attempts(&self) -> usize {
            *self.attempts.lock().unwrap()
        }
    }

    impl MailTransmitter for RecordingTransmitter {
        fn send(&self, reply: &OutboundReply) -> Result<(), TransmitError> {
            *self.attempts.lock().unwrap() += 1;
            if self.reject {
                return Err(TransmitError::SendFailed(
                    "535 5.7.8 Authentication credentials invalid".into(),
                ));
            }
            self.sent.lock().unwrap().push(reply.clone());
            Ok(())
        }
    }
}
