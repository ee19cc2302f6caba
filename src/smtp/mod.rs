//! SMTP server and client halves of the relay

pub mod commands;
pub mod envelope;
pub mod error;
pub mod policy;
pub mod relay;
pub mod response;
pub mod server;
pub mod session;

pub use envelope::Envelope;
pub use error::{SmtpError, SmtpLimits};
pub use policy::{PolicyDecision, RecipientPolicy};
pub use relay::{RelayClient, RelayError, RelayOutcome};
pub use response::SmtpResponse;
pub use server::{ShutdownSignal, SmtpServer};
pub use session::{SmtpSession, SmtpState};
