//! Forwarding accepted mail to the upstream SMTP server
//!
//! Every delivery opens its own connection, runs a single transaction and
//! closes it again. Nothing is retried; the first failure decides the
//! reply the inbound client gets.

use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpStream, ToSocketAddrs};

use log::{debug, warn};
use thiserror::Error;

use crate::config::RelayConfig;
use crate::smtp::envelope::Envelope;
use crate::smtp::response::{SmtpResponse, parse_reply_line};

/// Why an upstream delivery failed
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("upstream refused the connection")]
    ConnectionRefused,

    #[error("upstream rejected message data: {} {}", .0.code, .0.message)]
    DataRefused(SmtpResponse),

    #[error("upstream rejected HELO: {} {}", .0.code, .0.message)]
    HeloRejected(SmtpResponse),

    #[error("upstream does not support SMTPUTF8")]
    SmtpUtf8NotSupported,

    #[error("upstream refused all {} recipients", .0.len())]
    RecipientsRefused(Vec<(String, SmtpResponse)>),

    #[error("upstream refused sender: {} {}", .0.code, .0.message)]
    SenderRefused(SmtpResponse),

    #[error("upstream greeted with {} {}", .0.code, .0.message)]
    BadGreeting(SmtpResponse),

    #[error("upstream closed the connection unexpectedly")]
    Disconnected,

    #[error("malformed reply from upstream: {0:?}")]
    MalformedReply(String),

    #[error("could not resolve upstream host {0}")]
    Unresolvable(String),

    #[error("IO error talking to upstream: {0}")]
    Io(#[from] io::Error),
}

impl RelayError {
    /// Whether this is one of the failures with a dedicated reply
    pub fn is_known(&self) -> bool {
        matches!(
            self,
            RelayError::ConnectionRefused
                | RelayError::DataRefused(_)
                | RelayError::HeloRejected(_)
                | RelayError::SmtpUtf8NotSupported
                | RelayError::RecipientsRefused(_)
                | RelayError::SenderRefused(_)
        )
    }

    /// The reply sent to the inbound client for this failure
    pub fn to_response(&self) -> SmtpResponse {
        let message = match self {
            RelayError::ConnectionRefused => "Upstream SMTP Server Refused Our Connection",
            RelayError::DataRefused(_) => "Upstream SMTP Server Refused Message Data",
            RelayError::HeloRejected(_) => "Upstream SMTP Server Returned Invalid HELO response",
            RelayError::SmtpUtf8NotSupported => "Upstream SMTP Server Refused SMTPUTF8",
            RelayError::RecipientsRefused(_) => "Recipients Refused By Upstream SMTP Server",
            RelayError::SenderRefused(_) => "Upstream SMTP Server Refused Sender Value",
            _ => "Requested action aborted: local error in processing",
        };
        SmtpResponse::error("451", message)
    }
}

/// Result of one delivery attempt
pub type RelayOutcome = Result<(), RelayError>;

/// Client side of the relay, one short-lived connection per message
#[derive(Debug, Clone)]
pub struct RelayClient {
    config: RelayConfig,
}

impl RelayClient {
    pub fn new(config: RelayConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Deliver `envelope` upstream.
    ///
    /// The connection is closed before this returns, on success or failure.
    pub fn deliver(&self, envelope: &Envelope) -> RelayOutcome {
        let mut connection = self.connect()?;
        let outcome = connection.transact(envelope, &self.config.local_hostname);
        connection.quit();
        outcome
    }

    fn connect(&self) -> Result<UpstreamConnection, RelayError> {
        let target = (self.config.host.as_str(), self.config.port);
        let addrs: Vec<_> = target
            .to_socket_addrs()
            .map_err(|_| RelayError::Unresolvable(self.config.host.clone()))?
            .collect();
        if addrs.is_empty() {
            return Err(RelayError::Unresolvable(self.config.host.clone()));
        }

        let mut failures = Vec::new();
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.config.timeout) {
                Ok(stream) => {
                    debug!("Connected to upstream {addr}");
                    stream.set_read_timeout(Some(self.config.timeout))?;
                    stream.set_write_timeout(Some(self.config.timeout))?;
                    return UpstreamConnection::open(stream);
                }
                Err(e) => {
                    debug!("Connecting to upstream {addr} failed: {e}");
                    failures.push(e);
                }
            }
        }

        Err(connect_failure(&self.config.host, failures))
    }
}

/// Classify a connect that failed on every address.
///
/// A refusal from any address is reported as a refused connection,
/// otherwise the last error is kept.
fn connect_failure(host: &str, mut failures: Vec<io::Error>) -> RelayError {
    if failures
        .iter()
        .any(|e| e.kind() == ErrorKind::ConnectionRefused)
    {
        return RelayError::ConnectionRefused;
    }
    match failures.pop() {
        Some(e) => RelayError::Io(e),
        None => RelayError::Unresolvable(host.to_owned()),
    }
}

struct UpstreamConnection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl UpstreamConnection {
    /// Wrap a fresh stream and consume the greeting
    fn open(stream: TcpStream) -> Result<Self, RelayError> {
        let writer = stream.try_clone()?;
        let mut connection = Self {
            reader: BufReader::new(stream),
            writer,
        };

        let greeting = connection.read_response()?;
        if greeting.code != "220" {
            connection.quit();
            return Err(RelayError::BadGreeting(greeting));
        }
        Ok(connection)
    }

    fn transact(&mut self, envelope: &Envelope, local_hostname: &str) -> RelayOutcome {
        let hello = self.hello(local_hostname)?;

        let mut mail_params = String::new();
        if envelope.needs_smtputf8() {
            if !hello.has_capability("SMTPUTF8") {
                return Err(RelayError::SmtpUtf8NotSupported);
            }
            mail_params.push_str(" SMTPUTF8");
        }
        if envelope.is_8bit() && hello.has_capability("8BITMIME") {
            mail_params.push_str(" BODY=8BITMIME");
        }

        let reply = self.command(&format!("MAIL FROM:<{}>{mail_params}", envelope.from))?;
        if reply.code != "250" {
            return Err(RelayError::SenderRefused(reply));
        }

        let mut refused = Vec::new();
        for recipient in &envelope.to {
            let reply = self.command(&format!("RCPT TO:<{recipient}>"))?;
            if reply.code != "250" && reply.code != "251" {
                warn!(
                    "Upstream refused recipient {recipient}: {} {}",
                    reply.code, reply.message
                );
                refused.push((recipient.clone(), reply));
            }
        }
        if refused.len() == envelope.to.len() {
            return Err(RelayError::RecipientsRefused(refused));
        }

        let reply = self.command("DATA")?;
        if reply.code != "354" {
            return Err(RelayError::DataRefused(reply));
        }

        self.writer.write_all(encode_data(&envelope.content).as_bytes())?;
        self.writer.flush()?;
        let reply = self.read_response()?;
        if reply.code != "250" {
            return Err(RelayError::DataRefused(reply));
        }

        Ok(())
    }

    /// EHLO, falling back to HELO. Returns the reply that was accepted.
    fn hello(&mut self, local_hostname: &str) -> Result<SmtpResponse, RelayError> {
        let reply = self.command(&format!("EHLO {local_hostname}"))?;
        if reply.code == "250" {
            return Ok(reply);
        }

        let reply = self.command(&format!("HELO {local_hostname}"))?;
        if reply.code == "250" {
            Ok(reply)
        } else {
            Err(RelayError::HeloRejected(reply))
        }
    }

    fn command(&mut self, line: &str) -> Result<SmtpResponse, RelayError> {
        debug!("upstream <- {line}");
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\r\n")?;
        self.writer.flush()?;
        self.read_response()
    }

    fn read_response(&mut self) -> Result<SmtpResponse, RelayError> {
        let mut code: Option<String> = None;
        let mut texts = Vec::new();

        loop {
            let mut buffer = Vec::new();
            if self.reader.read_until(b'\n', &mut buffer)? == 0 {
                return Err(RelayError::Disconnected);
            }
            let line = String::from_utf8_lossy(&buffer);
            let parsed = parse_reply_line(&line)
                .ok_or_else(|| RelayError::MalformedReply(line.trim_end().to_string()))?;

            let first = code.get_or_insert_with(|| parsed.code.to_string());
            if first.as_str() != parsed.code {
                return Err(RelayError::MalformedReply(line.trim_end().to_string()));
            }
            texts.push(parsed.text.to_string());

            if parsed.last {
                break;
            }
        }

        let code = code.unwrap_or_default();
        debug!("upstream -> {code} {}", texts.join(" / "));
        let message = texts.remove(0);
        if texts.is_empty() {
            Ok(SmtpResponse::new(&code, &message))
        } else {
            Ok(SmtpResponse::new_multiline(&code, &message, texts))
        }
    }

    /// Say goodbye, ignoring whatever happens
    fn quit(&mut self) {
        if self.writer.write_all(b"QUIT\r\n").is_ok() {
            let _ = self.writer.flush();
            let _ = self.read_response();
        }
        let _ = self.writer.shutdown(std::net::Shutdown::Both);
    }
}

/// Put message content into wire form: CRLF line endings, leading dots
/// doubled, terminated by a lone dot.
fn encode_data(content: &str) -> String {
    let mut encoded = String::with_capacity(content.len() + 16);
    for line in content.lines() {
        if line.starts_with('.') {
            encoded.push('.');
        }
        encoded.push_str(line);
        encoded.push_str("\r\n");
    }
    encoded.push_str(".\r\n");
    encoded
}
