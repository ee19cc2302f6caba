//! Recipient acceptance policy

/// The only domain this relay forwards mail to
pub const ALLOWED_DOMAIN: &str = "va.gov";

/// Reply text for recipients outside the allowed domain
pub const RELAY_DENIED: &str = "not relaying to that domain";

/// Outcome of evaluating a single recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Accept,
    Reject(&'static str),
}

/// Accepts recipients whose address ends in exactly `@<domain>`.
///
/// The comparison is case-sensitive, so `user@VA.GOV` is rejected.
#[derive(Debug, Clone)]
pub struct RecipientPolicy {
    suffix: String,
}

impl RecipientPolicy {
    pub fn new(domain: &str) -> Self {
        Self {
            suffix: format!("@{domain}"),
        }
    }

    pub fn evaluate(&self, address: &str) -> PolicyDecision {
        if address.ends_with(&self.suffix) {
            PolicyDecision::Accept
        } else {
            PolicyDecision::Reject(RELAY_DENIED)
        }
    }
}

impl Default for RecipientPolicy {
    fn default() -> Self {
        Self::new(ALLOWED_DOMAIN)
    }
}
