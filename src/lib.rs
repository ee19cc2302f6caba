//! # bmta
//!
//! A small SMTP relay. It accepts mail on port 2525, rewrites each
//! message and forwards it to a single upstream SMTP server.
//!
//! ## What happens to a message
//!
//! - Recipients outside `va.gov` are refused with
//!   `550 not relaying to that domain` and never forwarded.
//! - IPv4 addresses anywhere in the message are redacted to
//!   `x.x.<third>.<fourth>`.
//! - `BPS-<digits>` ticket references are linked to the tracker: inline
//!   anchors for HTML mail, an appended link list otherwise.
//! - The rewritten message is delivered over a fresh upstream connection.
//!   The upstream result becomes the reply to DATA, either
//!   `250 Message Accepted For Delivery` or a `451` explaining which step
//!   upstream refused.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bmta::config::{HOSTNAME, RelayConfig};
//! use bmta::{RelayClient, ShutdownSignal, SmtpServer};
//!
//! let relay = RelayClient::new(RelayConfig::new("smtp.example.com", 25));
//! let server = SmtpServer::new(HOSTNAME, relay);
//! let shutdown = ShutdownSignal::new();
//!
//! // Blocks until `shutdown.trigger()` is called from another thread
//! server.start("127.0.0.1:2525", shutdown).unwrap();
//! ```
//!
//! ## Supported SMTP commands
//!
//! `HELO`, `EHLO`, `MAIL FROM`, `RCPT TO`, `DATA`, `RSET`, `NOOP`,
//! `VRFY`, `HELP` and `QUIT`.
//!
//! ## Notes
//!
//! - No authentication, TLS or queueing. A message the upstream server
//!   will not take is refused with a temporary failure for the sending
//!   MTA to retry.
//! - Each connection runs on its own thread.

pub mod config;
pub mod rewrite;
mod smtp;

pub use rewrite::ContentRewriter;
pub use smtp::{
    Envelope, PolicyDecision, RecipientPolicy, RelayClient, RelayError, RelayOutcome,
    ShutdownSignal, SmtpError, SmtpLimits, SmtpResponse, SmtpServer, SmtpSession, SmtpState,
};
