use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use iqtap_capture::CaptureReport;
use iqtap_frame::BinaryEvent;
use iqtap_session::{HookContext, Message, SessionHooks};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One compact JSON document per line.
    Json,
    Table,
    /// Indented JSON.
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

/// JSON with a four-space indent.
pub fn to_pretty<T: Serialize>(value: &T) -> String {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    if value.serialize(&mut ser).is_err() {
        return "{}".to_string();
    }
    String::from_utf8(out).unwrap_or_else(|_| "{}".to_string())
}

fn to_compact<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

pub fn print_message(msg: &Message, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", to_compact(msg)),
        OutputFormat::Pretty => println!("{}", to_pretty(msg)),
        OutputFormat::Table => {
            let value = serde_json::to_value(msg).unwrap_or(Value::Null);
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            if let Value::Object(fields) = value {
                for (key, value) in fields {
                    let cell = match value {
                        Value::String(text) => text,
                        other => to_compact(&other),
                    };
                    table.add_row(vec![key, cell]);
                }
            }
            println!("{table}");
        }
    }
}

#[derive(Serialize)]
struct EventOutput<'a> {
    label: &'a str,
    data: Option<&'a Value>,
    size: usize,
    #[serde(rename = "type")]
    event_type: u32,
    length: u32,
}

pub fn print_event(event: &BinaryEvent, format: OutputFormat) {
    let out = EventOutput {
        label: event.label(),
        data: event.header.fields.get("data"),
        size: event.payload.len(),
        event_type: event.trailer.event_type,
        length: event.trailer.length,
    };
    match format {
        OutputFormat::Json => println!("{}", to_compact(&out)),
        OutputFormat::Pretty => println!("{}", to_pretty(&out)),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["LABEL", "DATA", "SIZE", "TYPE", "LEN"])
                .add_row(vec![
                    out.label.to_string(),
                    out.data.map(to_compact).unwrap_or_default(),
                    out.size.to_string(),
                    out.event_type.to_string(),
                    out.length.to_string(),
                ]);
            println!("{table}");
        }
    }
}

/// Prints what a `ws` session delivers.
pub struct PrintHook {
    pub format: OutputFormat,
    /// Suppress delivered messages.
    pub quiet: bool,
    /// Print side-channel events.
    pub events: bool,
}

impl SessionHooks for PrintHook {
    fn on_message(&mut self, msg: &Message, _ctx: &mut HookContext<'_>) {
        if !self.quiet {
            print_message(msg, self.format);
        }
    }

    fn on_event(&mut self, event: &BinaryEvent, _ctx: &mut HookContext<'_>) {
        if self.events {
            print_event(event, self.format);
        }
    }
}

pub fn print_capture_report(report: &CaptureReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", to_compact(report)),
        OutputFormat::Pretty => println!("{}", to_pretty(report)),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "PORT", "CELLS", "RAW", "RECORDS", "SAMPLES", "BYTES", "FILES", "STATUS",
                ]);
            for port in &report.ports {
                if let Some(reason) = &port.rejected {
                    table.add_row(vec![
                        port.index.to_string(),
                        port.cells.to_string(),
                        "-".to_string(),
                        "-".to_string(),
                        "-".to_string(),
                        "-".to_string(),
                        "-".to_string(),
                        format!("rejected: {reason}"),
                    ]);
                    continue;
                }
                for file in &port.files {
                    let status = match &file.overflow {
                        Some(overflow) => format!("overflow: {overflow}"),
                        None => "ok".to_string(),
                    };
                    table.add_row(vec![
                        port.index.to_string(),
                        port.cells.to_string(),
                        file.raw.display().to_string(),
                        file.records.to_string(),
                        file.samples.to_string(),
                        file.bytes_written.to_string(),
                        file.output_files.to_string(),
                        status,
                    ]);
                }
            }
            println!("{table}");
            if let Some(date) = &report.date {
                println!("captured {date} into {}", report.dir.display());
            }
        }
    }
}
