use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgGroup, Args, Subcommand};
use xmlstream_transport::Endpoint;

use crate::exit::{transport_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod echo;
pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one payload, optionally waiting for a reply element.
    Send(SendArgs),
    /// Stay connected and print every received element and status change.
    Listen(ListenArgs),
    /// Run a test peer that answers every chunk it receives.
    Echo(EchoArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Echo(args) => echo::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("payload").required(true).args(["text", "xml", "file"])))]
pub struct SendArgs {
    /// Peer to connect to (host:port).
    pub endpoint: String,
    /// Raw text, sent verbatim.
    #[arg(long)]
    pub text: Option<String>,
    /// One XML element, checked for well-formedness before sending.
    #[arg(long)]
    pub xml: Option<String>,
    /// Send a file's contents verbatim.
    #[arg(long)]
    pub file: Option<PathBuf>,
    /// Wait for one received element and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
    /// Connect timeout (e.g. 3s). Default: OS default.
    #[arg(long)]
    pub connect_timeout: Option<String>,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Peer to connect to (host:port).
    pub endpoint: String,
    /// Exit after receiving N elements.
    #[arg(long)]
    pub count: Option<usize>,
    /// Exit instead of reconnecting when the peer goes away.
    #[arg(long)]
    pub no_reconnect: bool,
    /// Liveness probe interval (e.g. 150ms).
    #[arg(long)]
    pub poll_interval: Option<String>,
    /// Delay between reconnect attempts (e.g. 1s).
    #[arg(long)]
    pub reconnect_interval: Option<String>,
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Address to bind (host:port, port 0 picks a free port).
    pub bind: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_endpoint(input: &str) -> CliResult<Endpoint> {
    input
        .parse()
        .map_err(|err| transport_error("invalid endpoint", err))
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

pub(crate) fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn parse_endpoint_reports_usage() {
        assert_eq!(parse_endpoint("localhost:2255").unwrap().port(), 2255);
        let err = parse_endpoint("no-port").expect_err("missing port should fail");
        assert_eq!(err.code, USAGE);
    }
}
