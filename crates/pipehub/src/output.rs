use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use pipehub_engine::ConnectionId;
use serde::Serialize;

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

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Connected,
    Message,
    Disconnected,
}

impl EventKind {
    fn as_str(self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Message => "message",
            EventKind::Disconnected => "disconnected",
        }
    }
}

/// One line of CLI output describing an engine event.
///
/// `connection` is set on the server side only; the client has a single
/// connection.
#[derive(Debug)]
pub struct EventRecord<'a> {
    pub kind: EventKind,
    pub connection: Option<ConnectionId>,
    pub payload: Option<&'a [u8]>,
    pub messages: Option<u64>,
}

impl<'a> EventRecord<'a> {
    pub fn connected(connection: Option<ConnectionId>) -> Self {
        Self {
            kind: EventKind::Connected,
            connection,
            payload: None,
            messages: None,
        }
    }

    pub fn message(connection: Option<ConnectionId>, payload: &'a [u8]) -> Self {
        Self {
            kind: EventKind::Message,
            connection,
            payload: Some(payload),
            messages: None,
        }
    }

    pub fn disconnected(connection: Option<ConnectionId>, messages: Option<u64>) -> Self {
        Self {
            kind: EventKind::Disconnected,
            connection,
            payload: None,
            messages,
        }
    }
}

#[derive(Serialize)]
struct EventOutput {
    event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    connection: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    messages: Option<u64>,
    timestamp: String,
}

pub fn print_event(record: &EventRecord<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Raw => {
            if let Some(payload) = record.payload {
                print_raw(payload);
            }
        }
        _ => {
            if let Some(line) = render_event(record, format) {
                println!("{line}");
            }
        }
    }
}

/// Render a record for the text formats. `None` for raw output.
pub fn render_event(record: &EventRecord<'_>, format: OutputFormat) -> Option<String> {
    let connection = record.connection.map(ConnectionId::get);
    match format {
        OutputFormat::Json => {
            let out = EventOutput {
                event: record.kind.as_str(),
                connection,
                payload_size: record.payload.map(<[u8]>::len),
                payload: record.payload.map(payload_preview),
                messages: record.messages,
                timestamp: now_unix_seconds(),
            };
            Some(serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string()))
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "CONNECTION", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    record.kind.as_str().to_string(),
                    connection.map_or_else(|| "-".to_string(), |id| id.to_string()),
                    record
                        .payload
                        .map_or_else(|| "-".to_string(), |p| p.len().to_string()),
                    record.payload.map_or_else(String::new, payload_preview),
                ]);
            Some(table.to_string())
        }
        OutputFormat::Pretty => {
            let mut line = format!("event={}", record.kind.as_str());
            if let Some(id) = connection {
                line.push_str(&format!(" connection={id}"));
            }
            if let Some(payload) = record.payload {
                line.push_str(&format!(
                    " size={} payload={}",
                    payload.len(),
                    payload_preview(payload)
                ));
            }
            if let Some(messages) = record.messages {
                line.push_str(&format!(" messages={messages}"));
            }
            Some(line)
        }
        OutputFormat::Raw => None,
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_message_carries_payload_and_size() {
        let record = EventRecord::message(None, b"ping");
        let line = render_event(&record, OutputFormat::Json).expect("json renders");
        let value: serde_json::Value = serde_json::from_str(&line).expect("valid json");

        assert_eq!(value["event"], "message");
        assert_eq!(value["payload"], "ping");
        assert_eq!(value["payload_size"], 4);
        assert!(value.get("connection").is_none());
    }

    #[test]
    fn json_disconnect_reports_message_count() {
        let record = EventRecord::disconnected(None, Some(3));
        let line = render_event(&record, OutputFormat::Json).expect("json renders");
        let value: serde_json::Value = serde_json::from_str(&line).expect("valid json");

        assert_eq!(value["event"], "disconnected");
        assert_eq!(value["messages"], 3);
        assert!(value.get("payload").is_none());
    }

    #[test]
    fn pretty_marks_binary_payloads() {
        let record = EventRecord::message(None, &[0xff, 0xfe]);
        let line = render_event(&record, OutputFormat::Pretty).expect("pretty renders");
        assert_eq!(line, "event=message size=2 payload=<binary 2 bytes>");
    }

    #[test]
    fn raw_renders_nothing() {
        let record = EventRecord::connected(None);
        assert!(render_event(&record, OutputFormat::Raw).is_none());
    }
}
