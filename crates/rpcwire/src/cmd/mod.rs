use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use serde_json::Value;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod probe;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Call a procedure and print its result.
    Call(CallArgs),
    /// Run the diagnostic HTTP probe against a server address.
    Probe(ProbeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Call(args) => call::run(args, format),
        Command::Probe(args) => probe::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Server address (ws:// or wss://).
    pub url: String,
    /// Procedure name.
    pub procedure: String,
    /// Arguments. Each is parsed as JSON, falling back to a plain string.
    #[arg(allow_negative_numbers = true)]
    pub args: Vec<String>,
    /// Skip the result cache.
    #[arg(long)]
    pub force: bool,
    /// Give up if the call has not finished within this duration (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s", env = "RPCWIRE_TIMEOUT")]
    pub timeout: String,
    /// Print every partial result as it arrives.
    #[arg(long)]
    pub stream: bool,
    /// Reconnection attempts before giving up.
    #[arg(long, default_value_t = 5, env = "RPCWIRE_RETRIES")]
    pub retries: u32,
    /// Schema directory for result validation.
    #[arg(long, value_name = "DIR")]
    pub validate: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Server address (ws:// or wss://).
    pub url: String,
    /// Request timeout (e.g. 10s, 500ms).
    #[arg(long, default_value = "10s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Include build details.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(number) => (number, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

/// `3` is a number, `[1,2]` an array, `hello` the string "hello".
pub(crate) fn parse_argument(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

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
        assert_eq!(parse_duration("1h").unwrap_err().code, USAGE);
    }

    #[test]
    fn arguments_prefer_json() {
        assert_eq!(parse_argument("3"), json!(3));
        assert_eq!(parse_argument("-2.5"), json!(-2.5));
        assert_eq!(parse_argument("[1,2]"), json!([1, 2]));
        assert_eq!(parse_argument("{\"a\":true}"), json!({"a": true}));
        assert_eq!(parse_argument("\"quoted\""), json!("quoted"));
        assert_eq!(parse_argument("hello"), json!("hello"));
        assert_eq!(parse_argument(""), json!(""));
    }
}
