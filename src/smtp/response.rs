//! SMTP response handling

/// Represents an SMTP response, either sent to a client or read from upstream
#[derive(Debug, Clone, PartialEq)]
pub struct SmtpResponse {
    /// The SMTP response code (e.g., "250", "354", "500")
    pub code: String,
    /// The human-readable message
    pub message: String,
    /// Optional continuation lines, used by EHLO responses
    pub multiline: Option<Vec<String>>,
}

impl SmtpResponse {
    /// Create a new SMTP response
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            multiline: None,
        }
    }

    /// Create a new multiline SMTP response
    pub fn new_multiline(code: &str, message: &str, lines: Vec<String>) -> Self {
        Self {
            code: code.to_owned(),
            message: message.to_owned(),
            multiline: Some(lines),
        }
    }

    /// Create a success response (250 OK)
    pub fn ok() -> Self {
        Self::new("250", "OK")
    }

    /// Create a greeting response (220)
    pub fn greeting(hostname: &str, ident: &str) -> Self {
        Self::new("220", &format!("{hostname} {ident}"))
    }

    /// Create a HELO response (250)
    pub fn helo(hostname: &str) -> Self {
        Self::new("250", hostname)
    }

    /// Create an EHLO response (250) advertising the supported extensions
    pub fn ehlo(hostname: &str, max_size: usize) -> Self {
        let capabilities = vec![
            format!("SIZE {max_size}"),
            "8BITMIME".to_owned(),
            "SMTPUTF8".to_owned(),
            "HELP".to_owned(),
        ];
        Self::new_multiline("250", hostname, capabilities)
    }

    /// Create a DATA intermediate response (354)
    pub fn data_start() -> Self {
        Self::new("354", "End data with <CR><LF>.<CR><LF>")
    }

    /// Final DATA response once upstream took the message
    pub fn accepted_for_delivery() -> Self {
        Self::new("250", "Message Accepted For Delivery")
    }

    pub fn vrfy() -> Self {
        Self::new(
            "252",
            "Cannot VRFY user, but will accept message and attempt delivery",
        )
    }

    pub fn help() -> Self {
        Self::new(
            "250",
            "Supported commands: EHLO HELO MAIL RCPT DATA RSET NOOP QUIT VRFY HELP",
        )
    }

    /// Create a QUIT response (221)
    pub fn quit() -> Self {
        Self::new("221", "Bye")
    }

    /// Create an error response from an error
    pub fn error(code: &str, message: &str) -> Self {
        Self::new(code, message)
    }

    /// Format the response for sending over the wire
    pub fn format(&self) -> String {
        if let Some(ref lines) = self.multiline {
            let mut result = format!("{}-{}\r\n", self.code, self.message);
            for (i, line) in lines.iter().enumerate() {
                if i == lines.len() - 1 {
                    // Last line uses space instead of dash
                    result.push_str(&format!("{} {}\r\n", self.code, line));
                } else {
                    result.push_str(&format!("{}-{}\r\n", self.code, line));
                }
            }
            result
        } else {
            format!("{} {}\r\n", self.code, self.message)
        }
    }

    /// Check whether the message or any continuation line names `keyword`.
    ///
    /// Used against upstream EHLO replies to discover extensions.
    pub fn has_capability(&self, keyword: &str) -> bool {
        let matches = |line: &str| {
            line.split_whitespace()
                .next()
                .is_some_and(|word| word.eq_ignore_ascii_case(keyword))
        };
        matches(&self.message)
            || self
                .multiline
                .as_ref()
                .is_some_and(|lines| lines.iter().any(|line| matches(line)))
    }
}

/// One physical line of a reply as read off the wire
#[derive(Debug, PartialEq)]
pub struct ReplyLine<'a> {
    pub code: &'a str,
    pub last: bool,
    pub text: &'a str,
}

/// Split a reply line (`250-text`, `250 text` or `250`) into its parts
pub fn parse_reply_line(line: &str) -> Option<ReplyLine<'_>> {
    let line = line.trim_end_matches(['\r', '\n']);
    let code = line.get(..3)?;
    if !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    match line.as_bytes().get(3) {
        None => Some(ReplyLine {
            code,
            last: true,
            text: "",
        }),
        Some(b' ') => Some(ReplyLine {
            code,
            last: true,
            text: &line[4..],
        }),
        Some(b'-') => Some(ReplyLine {
            code,
            last: false,
            text: &line[4..],
        }),
        Some(_) => None,
    }
}
