//! Content rewriting applied to every message before it is relayed
//!
//! Two passes run over the whole message, headers included:
//!
//! 1. Dotted-quad IPv4 addresses lose their first two octets
//!    (`10.20.30.40` becomes `x.x.30.40`).
//! 2. Ticket references (`BPS-123`, any case) are linked to the tracker.
//!    HTML messages get an anchor in place; anything else keeps the text
//!    as is and gains a trailing list of links.

use regex::{Captures, Regex};

/// Base URL of the ticket tracker
pub const TICKET_BROWSE_URL: &str = "https://vajira.max.gov/browse/";

/// Header line opening the appended list of ticket links
pub const TICKET_LINKS_HEADING: &str = "Links to tickets found in message body:";

const IP_PATTERN: &str = r"(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)";
const TICKET_PATTERN: &str = r"(?i)(?P<ticket>BPS-\d+)";
const HTML_PATTERN: &str = r"(?im)^Content-Type: text/html";

/// Compiled patterns for the rewrite passes.
///
/// Each session builds its own instance.
#[derive(Debug, Clone)]
pub struct ContentRewriter {
    ip_pattern: Regex,
    ticket_pattern: Regex,
    html_pattern: Regex,
}

impl ContentRewriter {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            ip_pattern: Regex::new(IP_PATTERN)?,
            ticket_pattern: Regex::new(TICKET_PATTERN)?,
            html_pattern: Regex::new(HTML_PATTERN)?,
        })
    }

    /// Run both passes in order and return the rewritten message
    pub fn rewrite(&self, content: &str) -> String {
        let redacted = self.redact_ips(content);
        self.link_tickets(&redacted)
    }

    /// Replace every IPv4 address with `x.x.<third>.<fourth>`.
    ///
    /// An address may touch any character except another digit, so
    /// `host_10.1.2.3` is redacted while `256.1.1.1` is left alone.
    pub fn redact_ips(&self, content: &str) -> String {
        let bytes = content.as_bytes();
        let mut redacted = String::with_capacity(content.len());
        let mut copied = 0;
        let mut search = 0;

        while let Some(found) = self.ip_pattern.find_at(content, search) {
            let digit_before = bytes[..found.start()]
                .last()
                .is_some_and(u8::is_ascii_digit);
            let digit_after = bytes.get(found.end()).is_some_and(u8::is_ascii_digit);
            if digit_before || digit_after {
                // matches always start on an ASCII digit
                search = found.start() + 1;
                continue;
            }

            redacted.push_str(&content[copied..found.start()]);
            redacted.push_str(&redact_ip(found.as_str()));
            copied = found.end();
            search = found.end();
        }

        redacted.push_str(&content[copied..]);
        redacted
    }

    /// Whether the message declares an HTML content type on any line
    pub fn is_html(&self, content: &str) -> bool {
        self.html_pattern.is_match(content)
    }

    /// Link ticket references, choosing the form by content type
    pub fn link_tickets(&self, content: &str) -> String {
        if self.is_html(content) {
            self.ticket_pattern
                .replace_all(content, |caps: &Captures| ticket_anchor(caps))
                .into_owned()
        } else {
            let mut rewritten = content.to_owned();
            rewritten.push_str(&self.ticket_appendix(content));
            rewritten
        }
    }

    /// The trailing link list for a plain-text message.
    ///
    /// Every occurrence is listed, duplicates included. Empty when the
    /// message has no ticket references.
    pub fn ticket_appendix(&self, content: &str) -> String {
        let mut appendix = String::new();
        for ticket in self.ticket_pattern.find_iter(content) {
            if appendix.is_empty() {
                appendix.push_str("\r\n\r\n");
                appendix.push_str(TICKET_LINKS_HEADING);
            }
            let ticket = ticket.as_str().to_uppercase();
            appendix.push_str(&format!("\r\n{ticket}: {TICKET_BROWSE_URL}{ticket}"));
        }
        appendix
    }
}

const REDACTED_IP: &str = "x.x.x.x";

fn redact_ip(ip: &str) -> String {
    let octets: Vec<&str> = ip.split('.').collect();
    match octets.as_slice() {
        [_, _, third, fourth] => format!("x.x.{third}.{fourth}"),
        _ => REDACTED_IP.to_owned(),
    }
}

fn ticket_anchor(caps: &Captures) -> String {
    match caps.name("ticket") {
        Some(ticket) => {
            let ticket = ticket.as_str();
            format!(
                "<a href=\"{TICKET_BROWSE_URL}{}\">{ticket}</a>",
                ticket.to_uppercase()
            )
        }
        None => caps
            .get(0)
            .map_or_else(String::new, |token| token.as_str().to_owned()),
    }
}
