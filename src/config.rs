//! Command line flags and the settings derived from them

use std::time::Duration;

use clap::Parser;

/// Name this relay announces in its greeting and to the upstream server
pub const HOSTNAME: &str = "bmta";

/// Version string appended to the greeting
pub const IDENT: &str = "v1.0";

/// Port the relay accepts mail on. Not tied to the upstream `--port` flag.
pub const LISTEN_PORT: u16 = 2525;

/// BIP Mail Transfer Agent
#[derive(Debug, Parser)]
#[command(name = "bmta", about, version)]
pub struct Args {
    /// upstream SMTP host to forward emails to
    #[arg(short = 's', long = "server", env = "BMTA_SERVER", default_value = "smtp.va.gov")]
    pub server: String,

    /// upstream SMTP port to forward emails to
    #[arg(short = 'p', long = "port", env = "BMTA_PORT", default_value_t = 25)]
    pub port: u16,

    /// seconds to wait on the upstream server before giving up
    #[arg(long = "timeout", env = "BMTA_TIMEOUT", default_value_t = 60)]
    pub timeout_seconds: u64,
}

/// Where and how accepted mail is forwarded
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Upstream host name or address
    pub host: String,
    /// Upstream port
    pub port: u16,
    /// Bound on connect, read and write against the upstream server
    pub timeout: Duration,
    /// Name sent in EHLO/HELO
    pub local_hostname: String,
}

impl RelayConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_owned(),
            port,
            timeout: Duration::from_secs(60),
            local_hostname: HOSTNAME.to_owned(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl From<&Args> for RelayConfig {
    fn from(args: &Args) -> Self {
        Self::new(&args.server, args.port).with_timeout(Duration::from_secs(args.timeout_seconds))
    }
}
