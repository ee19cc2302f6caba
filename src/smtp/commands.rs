//! Command dispatch for inbound sessions

use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::policy::{PolicyDecision, RecipientPolicy};
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::SmtpSession;

/// Turns command lines into replies, updating the session as it goes
#[derive(Debug)]
pub struct SmtpCommandHandler<'a> {
    hostname: &'a str,
    policy: RecipientPolicy,
}

impl<'a> SmtpCommandHandler<'a> {
    pub fn new(hostname: &'a str, policy: RecipientPolicy) -> Self {
        Self { hostname, policy }
    }

    /// Handle one command line, without its line ending.
    ///
    /// Errors carry the reply code and text for the client.
    pub fn process_command(
        &self,
        command_line: &str,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        // The limit counts the CRLF the caller already stripped
        if command_line.len() + 2 > SmtpLimits::COMMAND_LINE_MAX_LENGTH {
            return Err(SmtpError::LineTooLong {
                max: SmtpLimits::COMMAND_LINE_MAX_LENGTH,
            });
        }

        let command_line = command_line.trim();
        if command_line.is_empty() {
            return Err(SmtpError::InvalidCommand);
        }
        let (verb, argument) = command_line
            .split_once(char::is_whitespace)
            .unwrap_or((command_line, ""));
        let argument = argument.trim_start();

        match verb.to_ascii_uppercase().as_str() {
            "HELO" => self.handle_helo(argument, session, false),
            "EHLO" => self.handle_helo(argument, session, true),
            "MAIL" => self.handle_mail(argument, session),
            "RCPT" => self.handle_rcpt(argument, session),
            "DATA" => self.handle_data(argument, session),
            "RSET" => self.handle_rset(session),
            "NOOP" => Ok(SmtpResponse::ok()),
            "VRFY" => Ok(SmtpResponse::vrfy()),
            "HELP" => Ok(SmtpResponse::help()),
            "QUIT" => Ok(SmtpResponse::quit()),
            _ => Err(SmtpError::InvalidCommand),
        }
    }

    fn handle_helo(
        &self,
        argument: &str,
        session: &mut SmtpSession,
        extended: bool,
    ) -> Result<SmtpResponse, SmtpError> {
        let Some(domain) = argument.split_whitespace().next() else {
            return Err(SmtpError::InvalidSyntax(format!(
                "{} requires domain argument",
                if extended { "EHLO" } else { "HELO" }
            )));
        };

        session.set_client_domain(domain.to_string(), extended)?;

        if extended {
            Ok(SmtpResponse::ehlo(self.hostname, SmtpLimits::MAX_DATA_SIZE))
        } else {
            Ok(SmtpResponse::helo(self.hostname))
        }
    }

    fn handle_mail(
        &self,
        argument: &str,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        if !session.can_execute_command("MAIL") {
            let detail = if session.from.is_some() {
                "nested MAIL command"
            } else {
                "send HELO first"
            };
            return Err(SmtpError::InvalidState(detail.to_string()));
        }

        let addr = parse_path(argument, "FROM:")?;

        // The null reverse-path is allowed for bounces
        if !addr.is_empty() {
            validate_email_address(addr)?;
        }

        session.set_sender(addr.to_string())?;

        Ok(SmtpResponse::ok())
    }

    /// Each recipient is judged on its own; a refusal leaves the envelope as it was
    fn handle_rcpt(
        &self,
        argument: &str,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        if !session.can_execute_command("RCPT") {
            return Err(SmtpError::InvalidState("need MAIL command".to_string()));
        }

        let addr = parse_path(argument, "TO:")?;
        if addr.is_empty() {
            return Err(SmtpError::InvalidSyntax(
                "TO address cannot be empty".to_string(),
            ));
        }

        validate_email_address(addr)?;

        match self.policy.evaluate(addr) {
            PolicyDecision::Accept => {
                session.add_recipient(addr.to_string())?;
                Ok(SmtpResponse::ok())
            }
            PolicyDecision::Reject(reason) => {
                log::info!("Refused recipient {addr}: {reason}");
                Err(SmtpError::RelayDenied(reason))
            }
        }
    }

    fn handle_data(
        &self,
        argument: &str,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        if !session.can_execute_command("DATA") {
            return Err(SmtpError::InvalidState("need RCPT command".to_string()));
        }

        if !argument.is_empty() {
            return Err(SmtpError::InvalidSyntax(
                "DATA command takes no arguments".to_string(),
            ));
        }

        session.start_data_mode()?;

        Ok(SmtpResponse::data_start())
    }

    fn handle_rset(&self, session: &mut SmtpSession) -> Result<SmtpResponse, SmtpError> {
        if !session.can_execute_command("RSET") {
            return Err(SmtpError::InvalidState("send HELO first".to_string()));
        }

        session.reset();
        Ok(SmtpResponse::ok())
    }
}

/// Extract the address from `FROM:<addr> [params]` or `TO:<addr> [params]`.
///
/// ESMTP parameters after the closing bracket are ignored.
fn parse_path<'l>(argument: &'l str, keyword: &str) -> Result<&'l str, SmtpError> {
    let syntax = || SmtpError::InvalidSyntax(format!("expected '{keyword}<address>'"));

    let head = argument.get(..keyword.len()).ok_or_else(syntax)?;
    if !head.eq_ignore_ascii_case(keyword) {
        return Err(syntax());
    }

    let path = argument[keyword.len()..].trim_start();
    path.strip_prefix('<')
        .and_then(|rest| rest.split_once('>'))
        .map(|(addr, _params)| addr)
        .ok_or_else(|| {
            SmtpError::InvalidSyntax("address must be enclosed in angle brackets".to_string())
        })
}

/// Check `local@domain` shape and the RFC 5321 part lengths
fn validate_email_address(addr: &str) -> Result<(), SmtpError> {
    let Some((user_part, domain_part)) = addr.rsplit_once('@') else {
        return Err(SmtpError::InvalidSyntax(
            "address must contain @ symbol".to_string(),
        ));
    };

    if user_part.len() > SmtpLimits::USER_MAX_LENGTH {
        return Err(SmtpError::UserTooLong {
            max: SmtpLimits::USER_MAX_LENGTH,
        });
    }

    if domain_part.len() > SmtpLimits::DOMAIN_MAX_LENGTH {
        return Err(SmtpError::DomainTooLong {
            max: SmtpLimits::DOMAIN_MAX_LENGTH,
        });
    }

    if user_part.is_empty() || domain_part.is_empty() {
        return Err(SmtpError::InvalidSyntax(
            "invalid address format".to_string(),
        ));
    }

    Ok(())
}
