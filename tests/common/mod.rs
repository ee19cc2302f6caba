//! Shared helpers: a scripted upstream SMTP server and a line-based client

#![allow(dead_code)]

use bmta::config::{HOSTNAME, RelayConfig};
use bmta::{RelayClient, ShutdownSignal, SmtpServer};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Replies the fake upstream gives, each a complete wire reply
#[derive(Debug, Clone)]
pub struct Replies {
    pub greeting: String,
    pub ehlo: String,
    pub helo: String,
    pub mail: String,
    pub refused_recipients: Vec<String>,
    pub data: String,
    pub data_end: String,
}

impl Default for Replies {
    fn default() -> Self {
        Self {
            greeting: "220 upstream ESMTP ready\r\n".to_string(),
            ehlo: "250-upstream\r\n250-8BITMIME\r\n250 SMTPUTF8\r\n".to_string(),
            helo: "250 upstream\r\n".to_string(),
            mail: "250 2.1.0 Ok\r\n".to_string(),
            refused_recipients: Vec::new(),
            data: "354 End data with <CR><LF>.<CR><LF>\r\n".to_string(),
            data_end: "250 2.0.0 Ok: queued\r\n".to_string(),
        }
    }
}

/// What one upstream connection saw
#[derive(Debug, Default)]
pub struct Transcript {
    /// Command lines, without line endings
    pub commands: Vec<String>,
    /// Raw DATA payload up to (excluding) the terminating dot line
    pub data: String,
}

impl Transcript {
    pub fn recipients(&self) -> Vec<String> {
        self.commands
            .iter()
            .filter_map(|command| command.strip_prefix("RCPT TO:<"))
            .map(|rest| rest.trim_end_matches('>').to_string())
            .collect()
    }

    pub fn mail_command(&self) -> Option<&str> {
        self.commands
            .iter()
            .find(|command| command.starts_with("MAIL FROM:"))
            .map(String::as_str)
    }
}

/// Start a fake upstream on a free port. Each finished connection sends
/// its transcript to the returned receiver.
pub fn spawn_upstream(replies: Replies) -> (u16, mpsc::Receiver<Transcript>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            let transcript = serve_upstream(stream, &replies);
            if tx.send(transcript).is_err() {
                break;
            }
        }
    });

    (port, rx)
}

fn serve_upstream(mut stream: TcpStream, replies: &Replies) -> Transcript {
    let mut transcript = Transcript::default();
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    if stream.write_all(replies.greeting.as_bytes()).is_err() {
        return transcript;
    }

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let command = line.trim_end().to_string();
        let verb = command
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_uppercase();
        transcript.commands.push(command.clone());

        let reply = match verb.as_str() {
            "EHLO" => replies.ehlo.clone(),
            "HELO" => replies.helo.clone(),
            "MAIL" => replies.mail.clone(),
            "RCPT" => {
                let refused = replies
                    .refused_recipients
                    .iter()
                    .any(|addr| command.contains(&format!("<{addr}>")));
                if refused {
                    "550 5.1.1 No such user\r\n".to_string()
                } else {
                    "250 2.1.5 Ok\r\n".to_string()
                }
            }
            "DATA" => {
                stream.write_all(replies.data.as_bytes()).unwrap();
                if !replies.data.starts_with("354") {
                    continue;
                }
                loop {
                    let mut data_line = String::new();
                    if reader.read_line(&mut data_line).unwrap_or(0) == 0 {
                        return transcript;
                    }
                    if data_line == ".\r\n" {
                        break;
                    }
                    transcript.data.push_str(&data_line);
                }
                replies.data_end.clone()
            }
            "RSET" | "NOOP" => "250 Ok\r\n".to_string(),
            "QUIT" => {
                let _ = stream.write_all(b"221 Bye\r\n");
                break;
            }
            _ => "500 Unrecognized command\r\n".to_string(),
        };

        if stream.write_all(reply.as_bytes()).is_err() {
            break;
        }
    }

    transcript
}

/// A port nothing listens on
pub fn refused_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

pub fn relay_config(port: u16) -> RelayConfig {
    RelayConfig::new("127.0.0.1", port).with_timeout(Duration::from_secs(5))
}

/// A relay server on a free port forwarding to `upstream_port`
pub struct TestRelay {
    pub addr: String,
    pub shutdown: ShutdownSignal,
    pub handle: JoinHandle<Result<(), bmta::SmtpError>>,
}

pub fn start_relay(upstream_port: u16) -> TestRelay {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let server = SmtpServer::new(HOSTNAME, RelayClient::new(relay_config(upstream_port)));
    let shutdown = ShutdownSignal::new();
    let signal = shutdown.clone();

    let handle = thread::spawn(move || server.start_with_listener(listener, signal));

    TestRelay {
        addr,
        shutdown,
        handle,
    }
}

/// Inbound SMTP client that reads whole (possibly multiline) replies
pub struct Client {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Client {
    /// Connect and return the client with the greeting line
    pub fn connect(addr: &str) -> (Self, String) {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        let mut client = Self { stream, reader };
        let greeting = client.read_reply();
        (client, greeting)
    }

    /// Read one reply; continuation lines are joined with `\n`
    pub fn read_reply(&mut self) -> String {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            self.reader.read_line(&mut line).unwrap();
            let line = line.trim_end().to_string();
            let last = line.as_bytes().get(3) != Some(&b'-');
            lines.push(line);
            if last {
                break;
            }
        }
        lines.join("\n")
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
        self.stream.flush().unwrap();
    }

    pub fn send_line(&mut self, line: &str) {
        self.stream.write_all(line.as_bytes()).unwrap();
        self.stream.write_all(b"\r\n").unwrap();
        self.stream.flush().unwrap();
    }

    pub fn command(&mut self, line: &str) -> String {
        self.send_line(line);
        self.read_reply()
    }

    /// Send DATA, the message lines and the terminating dot; returns the final reply
    pub fn send_message(&mut self, lines: &[&str]) -> String {
        let reply = self.command("DATA");
        assert!(reply.starts_with("354"), "DATA refused: {reply}");
        for line in lines {
            self.send_line(line);
        }
        self.command(".")
    }
}
