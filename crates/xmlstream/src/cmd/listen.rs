use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};
use xmlstream_client::{ClientConfig, ClientEvent, XmlStreamClient};

use crate::cmd::{install_ctrlc_handler, parse_duration, parse_endpoint, ListenArgs};
use crate::exit::{client_error, connect_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_event, OutputFormat};

// How often the event loop checks for Ctrl-C.
const TICK: Duration = Duration::from_millis(100);

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint = parse_endpoint(&args.endpoint)?;
    let config = build_config(&args)?;
    let label = endpoint.to_string();

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let retry_interval = config.reconnect_interval;
    let client =
        XmlStreamClient::new(endpoint, config).map_err(|err| client_error("client failed", err))?;
    let events = client.subscribe();

    // The first connect retries the same way the client reconnects later.
    let mut attempt = 0u32;
    while running.load(Ordering::SeqCst) {
        match client.connect() {
            Ok(()) => break,
            Err(err) if args.no_reconnect => return Err(connect_error("connect failed", err)),
            Err(err) => {
                attempt += 1;
                warn!(attempt, endpoint = %label, error = %err, "connect failed; retrying");
                thread::sleep(retry_interval);
            }
        }
    }

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let event = match events.recv_timeout(TICK) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        print_event(&event, &label, format);

        match event {
            ClientEvent::DataReceived(_) => {
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
            ClientEvent::StatusChanged(false) if args.no_reconnect => {
                client.close();
                return Err(CliError::new(FAILURE, format!("connection to {label} lost")));
            }
            _ => {}
        }
    }

    info!(endpoint = %label, received = printed, "listen finished");
    client.close();
    Ok(SUCCESS)
}

fn build_config(args: &ListenArgs) -> CliResult<ClientConfig> {
    let mut config = ClientConfig::default().with_auto_reconnect(!args.no_reconnect);
    if let Some(interval) = &args.poll_interval {
        config = config.with_poll_interval(parse_duration(interval)?);
    }
    if let Some(interval) = &args.reconnect_interval {
        config = config.with_reconnect_interval(parse_duration(interval)?);
    }
    Ok(config)
}
