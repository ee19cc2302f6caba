use bmta::config::{Args, HOSTNAME, LISTEN_PORT, RelayConfig};
use bmta::{RelayClient, ShutdownSignal, SmtpServer};
use clap::Parser;
use env_logger::Env;
use log::{error, info};
use std::io::Write;
use std::process;

fn main() {
    init_logging();
    let args = Args::parse();

    let shutdown = ShutdownSignal::new();
    let handle = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received interrupt signal. Shutting down service.");
        handle.trigger();
    }) {
        error!("Failed to install signal handler: {e}");
        process::exit(1);
    }

    let relay = RelayClient::new(RelayConfig::from(&args));
    let server = SmtpServer::new(HOSTNAME, relay);

    if let Err(e) = server.start(("0.0.0.0", LISTEN_PORT), shutdown) {
        error!("Failed to start server: {e}");
        process::exit(1);
    }

    info!("Shutdown complete.");
}

/// `<timestamp> :: <LEVEL> :: <module> :: <message>` on stdout, info by default
fn init_logging() {
    env_logger::Builder::from_env(Env::new().filter_or("RUST_LOG", "info"))
        .target(env_logger::Target::Stdout)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} :: {} :: {} :: {}",
                buf.timestamp(),
                record.level(),
                record.module_path().unwrap_or("bmta"),
                record.args()
            )
        })
        .init();
}
