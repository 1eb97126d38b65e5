use std::io::{IsTerminal, Write};
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use xmlstream_client::ClientEvent;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
enum EventOutput<'a> {
    Element {
        endpoint: &'a str,
        name: &'a str,
        xml: String,
        timestamp: String,
    },
    Status {
        endpoint: &'a str,
        alive: bool,
        timestamp: String,
    },
    ReconnectFailed {
        endpoint: &'a str,
        attempt: u32,
        error: &'a str,
        timestamp: String,
    },
}

impl<'a> EventOutput<'a> {
    fn new(event: &'a ClientEvent, endpoint: &'a str) -> Self {
        let timestamp = now_unix_seconds();
        match event {
            ClientEvent::DataReceived(element) => EventOutput::Element {
                endpoint,
                name: element.name(),
                xml: element.to_xml(),
                timestamp,
            },
            ClientEvent::StatusChanged(alive) => EventOutput::Status {
                endpoint,
                alive: *alive,
                timestamp,
            },
            ClientEvent::ReconnectFailed { attempt, error } => EventOutput::ReconnectFailed {
                endpoint,
                attempt: *attempt,
                error: error.as_str(),
                timestamp,
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            EventOutput::Element { .. } => "ELEMENT",
            EventOutput::Status { .. } => "STATUS",
            EventOutput::ReconnectFailed { .. } => "RECONNECT",
        }
    }

    fn detail(&self) -> String {
        match self {
            EventOutput::Element { xml, .. } => xml.clone(),
            EventOutput::Status { alive: true, .. } => "CONNECTED".to_string(),
            EventOutput::Status { alive: false, .. } => "DISCONNECTED".to_string(),
            EventOutput::ReconnectFailed { attempt, error, .. } => {
                format!("attempt {attempt}: {error}")
            }
        }
    }
}

pub fn print_event(event: &ClientEvent, endpoint: &str, format: OutputFormat) {
    let out = EventOutput::new(event, endpoint);
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "ENDPOINT", "DETAIL"])
                .add_row(vec![out.kind().to_string(), endpoint.to_string(), out.detail()]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} endpoint={} {}",
                out.kind().to_lowercase(),
                endpoint,
                out.detail()
            );
        }
        OutputFormat::Raw => {
            // Only element payloads go to stdout in raw mode.
            if let EventOutput::Element { xml, .. } = &out {
                print_raw(xml.as_bytes());
                print_raw(b"\n");
            }
        }
    }
}

/// Announce the bound address of a server command.
pub fn print_listening(addr: SocketAddr, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({ "event": "listening", "address": addr.to_string() })
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => println!("listening on {addr}"),
        OutputFormat::Raw => println!("{addr}"),
    }
    let _ = std::io::stdout().flush();
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
