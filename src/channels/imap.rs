//! Blocking IMAP client over TLS (rustls).
//!
//! Speaks just enough IMAP4rev1 for the reader: LOGIN, SELECT, UID SEARCH
//! UNSEEN, UID FETCH RFC822 and LOGOUT. Messages are addressed by UID, which
//! stays stable across expunges. The session is generic over the byte stream so
//! the protocol handling can be exercised against a scripted stream in tests.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tracing::debug;

use crate::channels::mailbox::{MailboxConnector, MailboxSession};
use crate::config::ImapConfig;
use crate::error::MailboxError;

/// Largest literal accepted from the server.
const MAX_LITERAL_BYTES: usize = 50 * 1024 * 1024;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Opens IMAPS sessions using the configured account.
pub struct ImapConnector {
    config: ImapConfig,
    tls: Arc<rustls::ClientConfig>,
}

impl ImapConnector {
    pub fn new(config: ImapConfig) -> Self {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        Self { config, tls }
    }

    fn open_stream(&self) -> Result<TlsStream, MailboxError> {
        let connect_err = |reason: String| MailboxError::ConnectFailed {
            host: self.config.host.clone(),
            port: self.config.port,
            reason,
        };

        let tcp = TcpStream::connect((&*self.config.host, self.config.port))
            .map_err(|e| connect_err(e.to_string()))?;
        tcp.set_read_timeout(Some(self.config.timeout))?;
        tcp.set_write_timeout(Some(self.config.timeout))?;

        let server_name = ServerName::try_from(self.config.host.clone())
            .map_err(|e| connect_err(format!("invalid server name: {e}")))?;
        let conn = rustls::ClientConnection::new(Arc::clone(&self.tls), server_name)
            .map_err(|e| connect_err(format!("TLS setup failed: {e}")))?;

        Ok(rustls::StreamOwned::new(conn, tcp))
    }
}

impl MailboxConnector for ImapConnector {
    fn connect(&self) -> Result<Box<dyn MailboxSession>, MailboxError> {
        debug!(host = %self.config.host, port = self.config.port, "Connecting to IMAP server");
        let stream = self.open_stream()?;
        let mut session = ImapSession::start(stream)?;
        session.login(&self.config.username, self.config.password.expose_secret())?;
        debug!(user = %self.config.username, "IMAP login succeeded");
        Ok(Box::new(session))
    }
}

/// Reply to one tagged command.
#[derive(Debug, Default)]
struct Response {
    /// Untagged (`* ...`) and continuation lines, CRLF stripped.
    lines: Vec<String>,
    /// Literal payloads (`{n}` followed by n bytes), in order.
    literals: Vec<Vec<u8>>,
    /// The tagged completion line.
    status: String,
}

/// An IMAP connection past the greeting.
pub struct ImapSession<S: Read + Write> {
    stream: BufReader<S>,
    next_tag: u32,
}

impl<S: Read + Write> ImapSession<S> {
    /// Wrap a fresh connection and consume the server greeting.
    pub fn start(stream: S) -> Result<Self, MailboxError> {
        let mut session = Self {
            stream: BufReader::new(stream),
            next_tag: 1,
        };
        let greeting = session.read_line()?;
        if !(greeting.starts_with("* OK") || greeting.starts_with("* PREAUTH")) {
            return Err(MailboxError::Protocol(format!(
                "unexpected greeting: {}",
                greeting.trim_end()
            )));
        }
        Ok(session)
    }

    pub fn login(&mut self, user: &str, password: &str) -> Result<(), MailboxError> {
        let command = format!("LOGIN {} {}", quote(user), quote(password));
        match self.command(&command) {
            Ok(_) => Ok(()),
            Err(MailboxError::CommandFailed { response, .. }) => Err(MailboxError::AuthFailed {
                user: user.to_string(),
                reason: response,
            }),
            Err(e) => Err(e),
        }
    }

    /// Read exactly `size` literal bytes, refusing oversized announcements.
    fn read_literal(&mut self, size: u64) -> Result<Vec<u8>, MailboxError> {
        if size > MAX_LITERAL_BYTES as u64 {
            return Err(MailboxError::Protocol(format!(
                "literal of {size} bytes exceeds the {MAX_LITERAL_BYTES} byte limit"
            )));
        }
        let mut literal = Vec::new();
        self.stream.by_ref().take(size).read_to_end(&mut literal)?;
        if literal.len() as u64 != size {
            return Err(MailboxError::Protocol(format!(
                "literal truncated after {} of {size} bytes",
                literal.len()
            )));
        }
        Ok(literal)
    }

    fn read_line(&mut self) -> Result<String, MailboxError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(MailboxError::Protocol("IMAP connection closed".into()));
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Send a tagged command and collect everything up to its completion.
    fn command(&mut self, command: &str) -> Result<Response, MailboxError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let writer = self.stream.get_mut();
        writer.write_all(format!("{tag} {command}\r\n").as_bytes())?;
        writer.flush()?;

        let mut words = command.split_whitespace();
        let verb = match words.next() {
            Some("UID") => format!("UID {}", words.next().unwrap_or_default()),
            Some(word) => word.to_string(),
            None => String::new(),
        };
        let mut response = Response::default();
        loop {
            let line = self.read_line()?;

            if let Some(size) = literal_size(&line) {
                response.literals.push(self.read_literal(size)?);
                response.lines.push(line.trim_end().to_string());
                continue;
            }

            if let Some(rest) = line.strip_prefix(tag.as_str())
                && rest.starts_with(' ')
            {
                let status = line.trim_end().to_string();
                if rest.trim_start().starts_with("OK") {
                    response.status = status;
                    return Ok(response);
                }
                return Err(MailboxError::CommandFailed {
                    command: verb,
                    response: status,
                });
            }

            response.lines.push(line.trim_end().to_string());
        }
    }
}

impl<S: Read + Write> MailboxSession for ImapSession<S> {
    fn select(&mut self, folder: &str) -> Result<(), MailboxError> {
        let response = self.command(&format!("SELECT {}", quote(folder)))?;
        debug!(folder, status = %response.status, "Folder selected");
        Ok(())
    }

    fn search_unseen(&mut self) -> Result<Vec<String>, MailboxError> {
        let response = self.command("UID SEARCH UNSEEN")?;
        Ok(response
            .lines
            .iter()
            .filter_map(|line| line.strip_prefix("* SEARCH"))
            .flat_map(|ids| ids.split_whitespace().map(str::to_string))
            .collect())
    }

    fn fetch_raw(&mut self, id: &str) -> Result<Vec<u8>, MailboxError> {
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MailboxError::Protocol(format!("invalid message uid {id:?}")));
        }
        let response = self.command(&format!("UID FETCH {id} RFC822"))?;
        response
            .literals
            .into_iter()
            .next()
            .ok_or_else(|| MailboxError::Protocol(format!("no message body in UID FETCH {id}")))
    }

    fn logout(&mut self) -> Result<(), MailboxError> {
        self.command("LOGOUT")?;
        Ok(())
    }
}

/// IMAP quoted string.
fn quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// `n` if the line ends with a `{n}` literal marker.
fn literal_size(line: &str) -> Option<u64> {
    let line = line.trim_end_matches(['\r', '\n']);
    let inner = line.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].parse().ok()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Replays canned server output and records what the client wrote.
    struct ScriptedStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl ScriptedStream {
        fn new(server: &str) -> Self {
            Self {
                input: Cursor::new(server.as_bytes().to_vec()),
                output: Vec::new(),
            }
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn written(session: &mut ImapSession<ScriptedStream>) -> String {
        String::from_utf8(session.stream.get_ref().output.clone()).unwrap()
    }

    const MESSAGE: &str = "Subject: URGENTE\r\n\r\nhola\r\n";

    #[test]
    fn full_session() {
        let server = format!(
            "* OK IMAP ready\r\n\
             A1 OK LOGIN completed\r\n\
             * 3 EXISTS\r\n\
             * FLAGS (\\Seen)\r\n\
             A2 OK [READ-WRITE] SELECT completed\r\n\
             * SEARCH 41 57\r\n\
             A3 OK UID SEARCH completed\r\n\
             * 2 FETCH (UID 41 RFC822 {{{}}}\r\n{}FLAGS (\\Seen))\r\n\
             A4 OK FETCH completed\r\n\
             * BYE logging out\r\n\
             A5 OK LOGOUT completed\r\n",
            MESSAGE.len(),
            MESSAGE
        );
        let mut session = ImapSession::start(ScriptedStream::new(&server)).unwrap();

        session.login("bot@example.com", "pa\"ss").unwrap();
        session.select("INBOX").unwrap();
        assert_eq!(session.search_unseen().unwrap(), vec!["41", "57"]);
        assert_eq!(session.fetch_raw("41").unwrap(), MESSAGE.as_bytes());
        session.logout().unwrap();

        let sent = written(&mut session);
        assert_eq!(
            sent,
            "A1 LOGIN \"bot@example.com\" \"pa\\\"ss\"\r\n\
             A2 SELECT \"INBOX\"\r\n\
             A3 UID SEARCH UNSEEN\r\n\
             A4 UID FETCH 41 RFC822\r\n\
             A5 LOGOUT\r\n"
        );
    }

    #[test]
    fn empty_search() {
        let server = "* OK ready\r\n* SEARCH\r\nA1 OK SEARCH completed\r\n";
        let mut session = ImapSession::start(ScriptedStream::new(server)).unwrap();
        assert!(session.search_unseen().unwrap().is_empty());
    }

    #[test]
    fn rejected_login_is_auth_failure() {
        let server = "* OK ready\r\nA1 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n";
        let mut session = ImapSession::start(ScriptedStream::new(server)).unwrap();
        let err = session.login("bot", "wrong").unwrap_err();
        assert!(matches!(err, MailboxError::AuthFailed { .. }));
    }

    #[test]
    fn bad_command_is_command_failure() {
        let server = "* OK ready\r\nA1 BAD unknown mailbox\r\n";
        let mut session = ImapSession::start(ScriptedStream::new(server)).unwrap();
        let err = session.select("Nope").unwrap_err();
        assert!(matches!(err, MailboxError::CommandFailed { ref command, .. } if command == "SELECT"));
    }

    #[test]
    fn fetch_without_literal_is_protocol_error() {
        let server = "* OK ready\r\n* 9 FETCH (FLAGS (\\Seen))\r\nA1 OK FETCH completed\r\n";
        let mut session = ImapSession::start(ScriptedStream::new(server)).unwrap();
        let err = session.fetch_raw("9").unwrap_err();
        assert!(matches!(err, MailboxError::Protocol(_)));
    }

    #[test]
    fn oversized_literal_is_protocol_error() {
        let server = "* OK ready\r\n* 1 FETCH (UID 7 RFC822 {99999999999999}\r\n";
        let mut session = ImapSession::start(ScriptedStream::new(server)).unwrap();
        let err = session.fetch_raw("7").unwrap_err();
        assert!(matches!(err, MailboxError::Protocol(ref m) if m.contains("exceeds")));
    }

    #[test]
    fn truncated_literal_is_protocol_error() {
        let server = "* OK ready\r\n* 1 FETCH (UID 7 RFC822 {100}\r\nshort";
        let mut session = ImapSession::start(ScriptedStream::new(server)).unwrap();
        let err = session.fetch_raw("7").unwrap_err();
        assert!(matches!(err, MailboxError::Protocol(ref m) if m.contains("truncated")));
    }

    #[test]
    fn failed_uid_command_names_both_words() {
        let server = "* OK ready\r\nA1 BAD UID not supported\r\n";
        let mut session = ImapSession::start(ScriptedStream::new(server)).unwrap();
        let err = session.search_unseen().unwrap_err();
        assert!(matches!(err, MailboxError::CommandFailed { ref command, .. } if command == "UID SEARCH"));
    }

    #[test]
    fn fetch_rejects_non_numeric_id() {
        let mut session = ImapSession::start(ScriptedStream::new("* OK ready\r\n")).unwrap();
        assert!(session.fetch_raw("1 RFC822\r\nA9 LOGOUT").is_err());
        assert!(written(&mut session).is_empty());
    }

    #[test]
    fn bad_greeting() {
        let result = ImapSession::start(ScriptedStream::new("* BYE go away\r\n"));
        assert!(matches!(result, Err(MailboxError::Protocol(_))));
    }

    #[test]
    fn connection_closed_mid_response() {
        let server = "* OK ready\r\n* SEARCH 1\r\n";
        let mut session = ImapSession::start(ScriptedStream::new(server)).unwrap();
        assert!(matches!(session.search_unseen(), Err(MailboxError::Protocol(_))));
    }

    #[test]
    fn literal_marker_parsing() {
        assert_eq!(literal_size("* 1 FETCH (UID 9 RFC822 {42}\r\n"), Some(42));
        assert_eq!(literal_size("* 1 FETCH (FLAGS ())\r\n"), None);
        assert_eq!(literal_size("{x}\r\n"), None);
    }

    #[test]
    fn quoting_escapes() {
        assert_eq!(quote(r#"a"b\c"#), r#""a\"b\\c""#);
    }
}
