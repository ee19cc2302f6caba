//! The message transaction handed from a session to the relay client

/// Sender, recipients and content of one accepted message
#[derive(Debug, Clone)]
pub struct Envelope {
    /// The reverse-path from MAIL FROM, empty for the null sender
    pub from: String,

    /// Recipients that passed the policy check, in the order given
    pub to: Vec<String>,

    /// The message content including headers, with CRLF line endings
    pub content: String,
}

impl Envelope {
    /// Create a new envelope
    pub fn new(from: String, to: Vec<String>, content: String) -> Self {
        Self { from, to, content }
    }

    /// Get the size of the content in bytes
    pub fn content_size(&self) -> usize {
        self.content.len()
    }

    /// Whether any envelope address needs the SMTPUTF8 extension upstream
    pub fn needs_smtputf8(&self) -> bool {
        !self.from.is_ascii() || self.to.iter().any(|addr| !addr.is_ascii())
    }

    /// Whether the content carries octets outside 7-bit ASCII
    pub fn is_8bit(&self) -> bool {
        !self.content.is_ascii()
    }
}
