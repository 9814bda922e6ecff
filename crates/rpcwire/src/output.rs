use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use rpcwire_transport::ProbeOutcome;
use serde::Serialize;
use serde_json::Value;

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

#[derive(Serialize)]
struct ResultOutput<'a> {
    procedure: &'a str,
    marker: u64,
    result: &'a Value,
}

pub fn print_result(procedure: &str, marker: u64, result: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ResultOutput {
                procedure,
                marker,
                result,
            };
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
                .set_header(vec!["PROCEDURE", "MARKER", "RESULT"])
                .add_row(vec![procedure.to_string(), marker.to_string(), compact(result)]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let body = serde_json::to_string_pretty(result).unwrap_or_else(|_| compact(result));
            println!("{procedure} #{marker} =>\n{body}");
        }
        OutputFormat::Raw => print_raw(result),
    }
}

#[derive(Serialize)]
struct ProbeOutput<'a> {
    url: &'a str,
    probe_url: &'a str,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a str>,
}

pub fn print_probe(url: &str, probe_url: &str, outcome: &ProbeOutcome, format: OutputFormat) {
    let (label, status, detail) = match outcome {
        ProbeOutcome::Reachable(status) => ("reachable", Some(*status), None),
        ProbeOutcome::Unauthorized => ("unauthorized", Some(401), None),
        ProbeOutcome::Unreachable(detail) => ("unreachable", None, Some(detail.as_str())),
    };

    match format {
        OutputFormat::Json => {
            let out = ProbeOutput {
                url,
                probe_url,
                outcome: label,
                status,
                detail,
            };
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
                .set_header(vec!["URL", "PROBE", "OUTCOME", "STATUS"])
                .add_row(vec![
                    url.to_string(),
                    probe_url.to_string(),
                    label.to_string(),
                    status.map_or_else(|| "-".to_string(), |s| s.to_string()),
                ]);
            println!("{table}");
            if let Some(detail) = detail {
                println!("detail: {detail}");
            }
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            let mut line = format!("{url} via {probe_url}: {label}");
            if let Some(status) = status {
                line.push_str(&format!(" (HTTP {status})"));
            }
            if let Some(detail) = detail {
                line.push_str(&format!(": {detail}"));
            }
            println!("{line}");
        }
    }
}

fn compact(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Strings print without quotes, anything else as compact JSON.
fn print_raw(value: &Value) {
    let mut stdout = std::io::stdout().lock();
    let _ = match value {
        Value::String(text) => writeln!(stdout, "{text}"),
        other => writeln!(stdout, "{}", compact(other)),
    };
    let _ = stdout.flush();
}
