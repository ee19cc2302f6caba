//! Listener and per-connection SMTP sessions

use crate::config::IDENT;
use crate::rewrite::ContentRewriter;
use crate::smtp::commands::SmtpCommandHandler;
use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::policy::RecipientPolicy;
use crate::smtp::relay::RelayClient;
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::SmtpSession;

use log::{debug, error, info, warn};
use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often the accept loop checks for a shutdown request
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long shutdown waits for in-flight sessions
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Flag telling the accept loop to stop
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Main SMTP server: accepts connections and relays their mail upstream
#[derive(Debug, Clone)]
pub struct SmtpServer {
    /// Server hostname
    hostname: String,
    /// Upstream delivery
    relay: RelayClient,
}

impl SmtpServer {
    /// Create a new SMTP server
    pub fn new(hostname: &str, relay: RelayClient) -> Self {
        Self {
            hostname: hostname.to_owned(),
            relay,
        }
    }

    /// Bind `addr` and serve until `shutdown` is triggered (blocking)
    pub fn start(
        &self,
        addr: impl ToSocketAddrs,
        shutdown: ShutdownSignal,
    ) -> Result<(), SmtpError> {
        let listener = TcpListener::bind(addr)?;
        self.start_with_listener(listener, shutdown)
    }

    /// Serve on an existing listener until `shutdown` is triggered (blocking)
    pub fn start_with_listener(
        &self,
        listener: TcpListener,
        shutdown: ShutdownSignal,
    ) -> Result<(), SmtpError> {
        listener.set_nonblocking(true)?;
        info!(
            "Listening on {}, relaying to {}:{}. Ready for connections.",
            listener.local_addr()?,
            self.relay.config().host,
            self.relay.config().port
        );

        let mut workers: Vec<JoinHandle<()>> = Vec::new();

        while !shutdown.is_triggered() {
            match listener.accept() {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {peer}");
                    workers.retain(|worker| !worker.is_finished());
                    match self.spawn_session(stream, peer.to_string()) {
                        Ok(worker) => workers.push(worker),
                        Err(e) => error!("Could not start session for {peer}: {e}"),
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    warn!("Error accepting connection: {e}");
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }

        info!("Received shutdown signal. Stopped accepting connections.");
        drop(listener);
        info!("Listening socket closed.");

        wait_for_sessions(workers, SHUTDOWN_GRACE);
        Ok(())
    }

    fn spawn_session(&self, stream: TcpStream, peer: String) -> std::io::Result<JoinHandle<()>> {
        // Accepted sockets may inherit non-blocking mode from the listener
        stream.set_nonblocking(false)?;

        let hostname = self.hostname.clone();
        let relay = self.relay.clone();
        thread::Builder::new()
            .name(format!("session {peer}"))
            .spawn(move || {
                if let Err(e) = handle_client(stream, &hostname, &relay) {
                    warn!("Error handling client {peer}: {e}");
                }
                debug!("Connection from {peer} closed");
            })
    }
}

fn wait_for_sessions(mut workers: Vec<JoinHandle<()>>, grace: Duration) {
    workers.retain(|worker| !worker.is_finished());
    if !workers.is_empty() {
        info!("Waiting for {} in-flight sessions.", workers.len());
    }

    let deadline = Instant::now() + grace;
    while !workers.is_empty() && Instant::now() < deadline {
        thread::sleep(ACCEPT_POLL_INTERVAL);
        workers.retain(|worker| !worker.is_finished());
    }

    if workers.is_empty() {
        info!("Session workers stopped.");
    } else {
        warn!(
            "Leaving {} sessions behind after {:?}.",
            workers.len(),
            grace
        );
    }
}

/// Run one SMTP session over `stream` until QUIT or disconnect
fn handle_client(
    mut stream: TcpStream,
    hostname: &str,
    relay: &RelayClient,
) -> Result<(), SmtpError> {
    let command_handler = SmtpCommandHandler::new(hostname, RecipientPolicy::default());
    let rewriter = ContentRewriter::new()?;
    let mut session = SmtpSession::new();
    let mut reader = BufReader::new(stream.try_clone()?);

    // Send greeting
    send_response(&mut stream, &SmtpResponse::greeting(hostname, IDENT))?;

    let mut line_buffer = Vec::new();
    loop {
        let limit = if session.in_data_mode() {
            // Room left for content, plus a stuffed dot and the CRLF. Never
            // smaller than the ".\r\n" terminator.
            SmtpLimits::MAX_DATA_SIZE.saturating_sub(session.data.len()) + 3
        } else {
            SmtpLimits::COMMAND_LINE_MAX_LENGTH
        };

        match read_line_bounded(&mut reader, &mut line_buffer, limit) {
            Ok(LineRead::Closed) => {
                if session.in_data_mode() {
                    warn!("Client disconnected in the middle of DATA");
                }
                break;
            }
            Ok(LineRead::TooLong) => {
                if session.in_data_mode() {
                    debug!("Dropping message content: line exceeds the size limit");
                    session.data_overflow = true;
                } else {
                    let e = SmtpError::LineTooLong {
                        max: SmtpLimits::COMMAND_LINE_MAX_LENGTH,
                    };
                    send_response(
                        &mut stream,
                        &SmtpResponse::error(e.to_response_code(), &e.to_response_message()),
                    )?;
                }
            }
            Ok(LineRead::Line) => {
                // Invalid UTF-8 is replaced rather than rejected
                let line = String::from_utf8_lossy(&line_buffer);
                let line = strip_line_ending(&line);

                if session.in_data_mode() {
                    if let Some(response) = handle_data_line(line, &mut session, &rewriter, relay)
                    {
                        send_response(&mut stream, &response)?;
                    }
                    continue;
                }

                let command = line.trim();
                if command.is_empty() {
                    continue;
                }

                match command_handler.process_command(command, &mut session) {
                    Ok(response) => {
                        send_response(&mut stream, &response)?;
                        if response.code == "221" {
                            break; // QUIT command
                        }
                    }
                    Err(e) => {
                        let response =
                            SmtpResponse::error(e.to_response_code(), &e.to_response_message());
                        send_response(&mut stream, &response)?;
                    }
                }
            }
            Err(e) => {
                warn!("Error reading from client: {e}");
                break;
            }
        }
    }

    Ok(())
}

/// Outcome of reading one line from the client
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    /// `buffer` holds the line, line ending included when one arrived
    Line,
    /// The line ran past the limit and was discarded up to its newline
    TooLong,
    /// The client closed the connection
    Closed,
}

/// Read one line of at most `limit` bytes, line ending included.
///
/// Bytes past the limit are never buffered.
fn read_line_bounded<R: BufRead>(
    reader: &mut R,
    buffer: &mut Vec<u8>,
    limit: usize,
) -> io::Result<LineRead> {
    buffer.clear();
    let read = reader
        .by_ref()
        .take(limit as u64 + 1)
        .read_until(b'\n', buffer)?;
    if read == 0 {
        return Ok(LineRead::Closed);
    }
    if buffer.len() <= limit {
        return Ok(LineRead::Line);
    }

    let complete = buffer.last() == Some(&b'\n');
    buffer.clear();
    if complete {
        return Ok(LineRead::TooLong);
    }
    loop {
        let (found_newline, used) = {
            let available = reader.fill_buf()?;
            if available.is_empty() {
                return Ok(LineRead::Closed);
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(i) => (true, i + 1),
                None => (false, available.len()),
            }
        };
        reader.consume(used);
        if found_newline {
            return Ok(LineRead::TooLong);
        }
    }
}

/// Remove one `\n` and then at most one `\r`
fn strip_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Handle a line of data during DATA mode.
///
/// Returns the final reply once the terminating dot arrives.
fn handle_data_line(
    line: &str,
    session: &mut SmtpSession,
    rewriter: &ContentRewriter,
    relay: &RelayClient,
) -> Option<SmtpResponse> {
    if line == "." {
        return Some(dispatch_message(session, rewriter, relay));
    }

    let line = line.strip_prefix('.').unwrap_or(line);
    if let Err(e) = session.add_data_line(line) {
        // Only reported once the client finishes sending
        debug!("Dropping message content: {e}");
    }
    None
}

/// Rewrite the collected message and relay it; the reply covers the whole message
fn dispatch_message(
    session: &mut SmtpSession,
    rewriter: &ContentRewriter,
    relay: &RelayClient,
) -> SmtpResponse {
    let mut envelope = match session.finish_data_collection() {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Message not relayed: {e}");
            return SmtpResponse::error(e.to_response_code(), &e.to_response_message());
        }
    };

    envelope.content = rewriter.rewrite(&envelope.content);

    match relay.deliver(&envelope) {
        Ok(()) => {
            info!(
                "Relayed message from <{}> to {:?} ({} bytes)",
                envelope.from,
                envelope.to,
                envelope.content_size()
            );
            SmtpResponse::accepted_for_delivery()
        }
        Err(e) if e.is_known() => {
            warn!("Relay of message from <{}> failed: {e}", envelope.from);
            e.to_response()
        }
        Err(e) => {
            error!(
                "Unexpected error relaying message from <{}> to {:?}: {e:?}",
                envelope.from, envelope.to
            );
            e.to_response()
        }
    }
}

/// Send a response to the client
fn send_response(stream: &mut TcpStream, response: &SmtpResponse) -> Result<(), SmtpError> {
    let formatted = response.format();
    if response.multiline.is_none() && formatted.len() > SmtpLimits::REPLY_LINE_MAX_LENGTH {
        // Truncate message if too long
        let truncated_response =
            SmtpResponse::new(&response.code, "Response too long (truncated)");
        stream.write_all(truncated_response.format().as_bytes())?;
    } else {
        stream.write_all(formatted.as_bytes())?;
    }
    stream.flush()?;
    Ok(())
}
