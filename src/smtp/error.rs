//! Error types for the inbound side of the relay
//!
//! The `Display` text of a protocol error is the text of the reply the
//! client receives.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SmtpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("content pattern failed to compile: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Syntax error, command unrecognized")]
    InvalidCommand,

    #[error("Bad sequence of commands: {0}")]
    InvalidState(String),

    #[error("Syntax error: {0}")]
    InvalidSyntax(String),

    #[error("{0}")]
    RelayDenied(&'static str),

    #[error("Line too long (max {max} characters)")]
    LineTooLong { max: usize },

    #[error("Path too long (max {max} characters)")]
    PathTooLong { max: usize },

    #[error("Too many recipients (max {max})")]
    TooManyRecipients { max: usize },

    #[error("Message exceeds fixed maximum message size (max {max} bytes)")]
    TooMuchData { max: usize },

    #[error("Domain name too long (max {max} characters)")]
    DomainTooLong { max: usize },

    #[error("User name too long (max {max} characters)")]
    UserTooLong { max: usize },
}

/// Size limits, RFC 5321 section 4.5.3
pub struct SmtpLimits;

impl SmtpLimits {
    pub const USER_MAX_LENGTH: usize = 64;
    pub const DOMAIN_MAX_LENGTH: usize = 255;
    /// Reverse-path or forward-path, brackets included
    pub const PATH_MAX_LENGTH: usize = 256;
    /// Including CRLF
    pub const COMMAND_LINE_MAX_LENGTH: usize = 512;
    /// Including CRLF
    pub const REPLY_LINE_MAX_LENGTH: usize = 512;
    pub const MAX_RECIPIENTS: usize = 100;
    /// Advertised as SIZE in the EHLO reply
    pub const MAX_DATA_SIZE: usize = 32 * 1024 * 1024;
}

impl SmtpError {
    /// Reply code sent to the client for this error
    pub fn to_response_code(&self) -> &'static str {
        match self {
            SmtpError::Io(_) => "421",
            SmtpError::Pattern(_) => "451",
            SmtpError::TooManyRecipients { .. } => "452",
            SmtpError::InvalidCommand | SmtpError::LineTooLong { .. } => "500",
            SmtpError::InvalidSyntax(_)
            | SmtpError::PathTooLong { .. }
            | SmtpError::DomainTooLong { .. }
            | SmtpError::UserTooLong { .. } => "501",
            SmtpError::InvalidState(_) => "503",
            SmtpError::RelayDenied(_) => "550",
            SmtpError::TooMuchData { .. } => "552",
        }
    }

    /// Reply text sent to the client for this error
    pub fn to_response_message(&self) -> String {
        match self {
            // Local failures are logged in full, never echoed to the client
            SmtpError::Io(_) => "Service not available".to_string(),
            SmtpError::Pattern(_) => "Requested action aborted: local error in processing".to_string(),
            other => other.to_string(),
        }
    }
}
