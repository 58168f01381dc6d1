use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

use fabgate_wire::{Frame, FrameKind};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
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

#[derive(Serialize)]
struct FrameOutput<'a> {
    kind: &'a str,
    sequence: u16,
    timestamp: u32,
    device: &'a str,
    payload_size: usize,
    payload: String,
}

pub fn print_frames(frames: &[Frame], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let rows: Vec<FrameOutput<'_>> = frames
                .iter()
                .map(|frame| FrameOutput {
                    kind: kind_name(frame.kind),
                    sequence: frame.sequence,
                    timestamp: frame.timestamp,
                    device: &frame.device_id,
                    payload_size: frame.payload.len(),
                    payload: payload_preview(frame.payload.as_ref()),
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string(&rows).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "SEQ", "TIME", "DEVICE", "SIZE", "PAYLOAD"]);
            for frame in frames {
                table.add_row(vec![
                    kind_name(frame.kind).to_string(),
                    frame.sequence.to_string(),
                    frame.timestamp.to_string(),
                    frame.device_id.clone(),
                    frame.payload.len().to_string(),
                    payload_preview(frame.payload.as_ref()),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for frame in frames {
                println!(
                    "kind={} seq={} time={} device={} size={} payload={}",
                    kind_name(frame.kind),
                    frame.sequence,
                    frame.timestamp,
                    frame.device_id,
                    frame.payload.len(),
                    payload_preview(frame.payload.as_ref())
                );
            }
        }
    }
}

/// Render a `{"services": [...], "link": bool}` status reply.
pub fn print_status(reply: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(reply).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SERVICE", "STATE", "ONLINE"]);
            for service in services_of(reply) {
                table.add_row(vec![
                    field_str(service, "name").to_string(),
                    field_str(service, "state").to_string(),
                    if service.get("online").and_then(Value::as_bool) == Some(true) {
                        "yes".to_string()
                    } else {
                        "no".to_string()
                    },
                ]);
            }
            println!("{table}");
            println!("link: {}", link_word(reply));
        }
        OutputFormat::Pretty => {
            for service in services_of(reply) {
                println!(
                    "{}: {} (online={})",
                    field_str(service, "name"),
                    field_str(service, "state"),
                    service.get("online").and_then(Value::as_bool) == Some(true)
                );
            }
            println!("link: {}", link_word(reply));
        }
    }
}

fn services_of(reply: &Value) -> impl Iterator<Item = &Value> {
    reply
        .get("services")
        .and_then(Value::as_array)
        .map(|services| services.iter())
        .into_iter()
        .flatten()
}

fn field_str<'a>(doc: &'a Value, key: &str) -> &'a str {
    doc.get(key).and_then(Value::as_str).unwrap_or("?")
}

fn link_word(reply: &Value) -> &'static str {
    if reply.get("link").and_then(Value::as_bool) == Some(true) {
        "connected"
    } else {
        "disconnected"
    }
}

fn kind_name(kind: FrameKind) -> &'static str {
    match kind {
        FrameKind::Single => "SINGLE",
        FrameKind::MultiBegin => "BEGIN",
        FrameKind::MultiAppend => "APPEND",
        FrameKind::MultiFinish => "FINISH",
    }
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}
