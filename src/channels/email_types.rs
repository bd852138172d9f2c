//! Email types: inbound and outbound messages, body extraction and the subject filter.

use mail_parser::{MessageParser, MimeHeaders, PartType};

/// A message pulled from the mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Mailbox-assigned identifier (IMAP sequence number).
    pub id: String,
    /// Decoded subject, empty when the header is missing.
    pub subject: String,
    /// Bare address of the first `From` mailbox.
    pub sender: String,
    /// First plain-text, non-attachment part. Empty if there is none.
    pub body: String,
    /// `Message-ID` header, without angle brackets.
    pub message_id: Option<String>,
}

impl InboundMessage {
    /// Parse a raw RFC 822 message. Returns `None` if it is not a message at all.
    pub fn parse(id: impl Into<String>, raw: &[u8]) -> Option<Self> {
        let parsed = MessageParser::default().parse(raw)?;

        let sender = parsed
            .from()
            .and_then(|addr| addr.first())
            .and_then(|a| a.address())
            .map(|s| s.to_string())
            .unwrap_or_default();

        Some(Self {
            id: id.into(),
            subject: parsed.subject().unwrap_or_default().to_string(),
            sender,
            body: extract_plain_body(&parsed).unwrap_or_default(),
            message_id: parsed.message_id().map(|s| s.to_string()),
        })
    }
}

/// A reply ready for the transmitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundReply {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub in_reply_to: Option<String>,
}

impl OutboundReply {
    /// Reply to `msg` with `body`. The subject is always `"Re: "` + original.
    pub fn reply_to(msg: &InboundMessage, body: String) -> Self {
        Self {
            to: msg.sender.clone(),
            subject: format!("Re: {}", msg.subject),
            body,
            in_reply_to: msg.message_id.clone(),
        }
    }
}

/// Case-insensitive substring match of `keyword` in `subject`.
///
/// An empty subject never matches.
pub fn subject_matches(subject: &str, keyword: &str) -> bool {
    !subject.is_empty() && subject.to_lowercase().contains(&keyword.to_lowercase())
}

/// Find the first `text/plain` part that is not an attachment.
///
/// Parts without a `Content-Type` default to `text/plain`. Parts whose text
/// could not be decoded are passed over in favor of later ones. A single-part
/// message is used as is, whatever its `Content-Disposition` says.
pub fn extract_plain_body(parsed: &mail_parser::Message) -> Option<String> {
    let multipart = parsed.parts.len() > 1;
    parsed.parts.iter().find_map(|part| {
        let is_plain = match MimeHeaders::content_type(part) {
            Some(ct) => {
                ct.ctype().eq_ignore_ascii_case("text")
                    && ct.subtype().is_none_or(|s| s.eq_ignore_ascii_case("plain"))
            }
            None => true,
        };
        let is_attachment = multipart
            && MimeHeaders::content_disposition(part)
                .is_some_and(|cd| cd.ctype().eq_ignore_ascii_case("attachment"));
        if !is_plain || is_attachment {
            return None;
        }

        match &part.body {
            PartType::Text(text) => Some(text.to_string()),
            PartType::Binary(bytes) | PartType::InlineBinary(bytes) => {
                std::str::from_utf8(bytes).ok().map(str::to_string)
            }
            _ => None,
        }
    })
}
