use std::fs;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use xmlstream_client::{ClientConfig, ClientEvent, Element, Payload, XmlStreamClient};

use crate::cmd::{parse_duration, parse_endpoint, SendArgs};
use crate::exit::{
    client_error, connect_error, io_error, send_error, CliError, CliResult, DATA_INVALID,
    FAILURE, SUCCESS, TIMEOUT, USAGE,
};
use crate::output::{print_event, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint = parse_endpoint(&args.endpoint)?;
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let connect_timeout = args
        .connect_timeout
        .as_deref()
        .map(parse_duration)
        .transpose()?;
    let payload = resolve_payload(&args)?;

    let config = ClientConfig::default()
        .with_auto_reconnect(false)
        .with_connect_timeout(connect_timeout);
    let label = endpoint.to_string();
    let client =
        XmlStreamClient::new(endpoint, config).map_err(|err| client_error("client failed", err))?;
    let events = client.subscribe();

    client
        .connect()
        .map_err(|err| connect_error("connect failed", err))?;
    client
        .send(payload)
        .map_err(|err| send_error("send failed", err))?;

    if args.wait {
        let element = wait_for_element(&events, wait_timeout)?;
        print_event(&ClientEvent::DataReceived(element), &label, format);
    }

    client.close();
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Payload> {
    if let Some(text) = &args.text {
        return Ok(Payload::Text(text.clone()));
    }
    if let Some(xml) = &args.xml {
        let element = Element::parse(xml)
            .map_err(|err| CliError::new(DATA_INVALID, format!("--xml is not one element: {err}")))?;
        return Ok(Payload::Element(element));
    }
    if let Some(path) = &args.file {
        return fs::read_to_string(path)
            .map(Payload::Text)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Err(CliError::new(USAGE, "one of --text, --xml or --file is required"))
}

/// First received element, skipping the connect status.
fn wait_for_element(events: &Receiver<ClientEvent>, timeout: Duration) -> CliResult<Element> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(ClientEvent::DataReceived(element)) => return Ok(element),
            Ok(ClientEvent::StatusChanged(false)) => {
                return Err(CliError::new(FAILURE, "peer closed before replying"));
            }
            Ok(_) => continue,
            Err(RecvTimeoutError::Timeout) => {
                return Err(CliError::new(
                    TIMEOUT,
                    format!("no reply within {}ms", timeout.as_millis()),
                ));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(CliError::new(FAILURE, "client stopped before a reply arrived"));
            }
        }
    }
}
