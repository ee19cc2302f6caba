//! Per-connection SMTP state: greeting, envelope and collected content

use crate::smtp::envelope::Envelope;
use crate::smtp::error::{SmtpError, SmtpLimits};

/// Where a session is in the command sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpState {
    /// Connection accepted, waiting for HELO or EHLO
    Connected,
    /// HELO/EHLO received, ready for MAIL
    Greeted,
    /// MAIL FROM accepted, no recipient accepted yet
    MailFromSet,
    /// At least one recipient accepted, ready for DATA or more RCPT
    RcptAccumulating,
    /// DATA accepted, collecting message content
    DataInProgress,
}

/// One inbound connection's view of the conversation
#[derive(Debug)]
pub struct SmtpSession {
    pub state: SmtpState,
    /// Reverse-path, empty for the null sender
    pub from: Option<String>,
    /// Forward-paths that passed the recipient policy
    pub to: Vec<String>,
    /// Message content collected during DATA, CRLF line endings
    pub data: String,
    /// Set once the content exceeds the size limit; later lines are dropped
    pub data_overflow: bool,
    /// Domain the client announced
    pub client_domain: Option<String>,
    /// Whether the client greeted with EHLO
    pub extended: bool,
}

impl SmtpSession {
    pub fn new() -> Self {
        Self {
            state: SmtpState::Connected,
            from: None,
            to: Vec::new(),
            data: String::new(),
            data_overflow: false,
            client_domain: None,
            extended: false,
        }
    }

    /// Drop the current transaction. A greeted session stays greeted.
    pub fn reset(&mut self) {
        if self.state != SmtpState::Connected {
            self.state = SmtpState::Greeted;
        }
        self.from = None;
        self.to.clear();
        self.data.clear();
        self.data_overflow = false;
    }

    /// Record HELO/EHLO. Any open transaction is abandoned.
    pub fn set_client_domain(&mut self, domain: String, extended: bool) -> Result<(), SmtpError> {
        if domain.len() > SmtpLimits::DOMAIN_MAX_LENGTH {
            return Err(SmtpError::DomainTooLong {
                max: SmtpLimits::DOMAIN_MAX_LENGTH,
            });
        }

        self.client_domain = Some(domain);
        self.extended = extended;
        self.state = SmtpState::Greeted;
        self.reset();
        Ok(())
    }

    /// Open a transaction for `sender`
    pub fn set_sender(&mut self, sender: String) -> Result<(), SmtpError> {
        if sender.len() > SmtpLimits::PATH_MAX_LENGTH {
            return Err(SmtpError::PathTooLong {
                max: SmtpLimits::PATH_MAX_LENGTH,
            });
        }

        self.from = Some(sender);
        self.to.clear();
        self.data.clear();
        self.state = SmtpState::MailFromSet;
        Ok(())
    }

    /// Add a recipient address that has already passed the policy check
    pub fn add_recipient(&mut self, recipient: String) -> Result<(), SmtpError> {
        if recipient.len() > SmtpLimits::PATH_MAX_LENGTH {
            return Err(SmtpError::PathTooLong {
                max: SmtpLimits::PATH_MAX_LENGTH,
            });
        }

        if self.to.len() >= SmtpLimits::MAX_RECIPIENTS {
            return Err(SmtpError::TooManyRecipients {
                max: SmtpLimits::MAX_RECIPIENTS,
            });
        }

        self.to.push(recipient);
        self.state = SmtpState::RcptAccumulating;
        Ok(())
    }

    /// Switch to collecting content; needs at least one recipient
    pub fn start_data_mode(&mut self) -> Result<(), SmtpError> {
        if self.state != SmtpState::RcptAccumulating {
            return Err(SmtpError::InvalidState("need RCPT command".to_string()));
        }

        self.data.clear();
        self.data_overflow = false;
        self.state = SmtpState::DataInProgress;
        Ok(())
    }

    /// Whether content lines are being collected
    pub fn in_data_mode(&self) -> bool {
        self.state == SmtpState::DataInProgress
    }

    /// Append one line of content, without its line ending.
    ///
    /// Once the size limit is hit the line is dropped and the overflow is
    /// remembered until the transaction ends.
    pub fn add_data_line(&mut self, line: &str) -> Result<(), SmtpError> {
        if self.data_overflow || self.data.len() + line.len() + 2 > SmtpLimits::MAX_DATA_SIZE {
            self.data_overflow = true;
            return Err(SmtpError::TooMuchData {
                max: SmtpLimits::MAX_DATA_SIZE,
            });
        }

        self.data.push_str(line);
        self.data.push_str("\r\n");
        Ok(())
    }

    /// Finish data collection and hand out the envelope.
    ///
    /// The transaction is cleared whether or not this succeeds.
    pub fn finish_data_collection(&mut self) -> Result<Envelope, SmtpError> {
        if !self.in_data_mode() {
            return Err(SmtpError::InvalidState(
                "not in data collection mode".to_string(),
            ));
        }

        let result = if self.data_overflow {
            Err(SmtpError::TooMuchData {
                max: SmtpLimits::MAX_DATA_SIZE,
            })
        } else {
            match self.from.take() {
                Some(from) if !self.to.is_empty() => Ok(Envelope::new(
                    from,
                    std::mem::take(&mut self.to),
                    std::mem::take(&mut self.data),
                )),
                _ => Err(SmtpError::InvalidState(
                    "incomplete transaction".to_string(),
                )),
            }
        };

        self.reset();
        result
    }

    /// Whether `verb` is allowed in the current state
    pub fn can_execute_command(&self, verb: &str) -> bool {
        use SmtpState::*;

        match (verb.to_ascii_uppercase().as_str(), self.state) {
            ("EHLO" | "HELO" | "NOOP" | "VRFY" | "HELP" | "QUIT", _) => true,
            ("MAIL", Greeted) => true,
            ("RCPT", MailFromSet | RcptAccumulating) => true,
            ("DATA", RcptAccumulating) => true,
            ("RSET", state) => state != Connected,
            _ => false,
        }
    }
}

impl Default for SmtpSession {
    fn default() -> Self {
        Self::new()
    }
}
