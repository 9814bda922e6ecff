use std::time::Duration;

use rpcwire_client::{Client, ClientConfig, ClientEvent, DisconnectReason, EventKind};
use rpcwire_schema::SchemaRegistry;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::cmd::{parse_argument, parse_duration, CallArgs};
use crate::exit::{
    client_error, disconnect_code, io_error, schema_error, CliError, CliResult, DATA_INVALID,
    FAILURE, INTERNAL, SUCCESS, TIMEOUT,
};
use crate::output::{print_result, OutputFormat};

/// What the callbacks and event listeners report back to the command.
#[derive(Debug)]
enum Outcome {
    Result(Value),
    Error(Value),
    TimedOut,
    Disconnected(DisconnectReason),
    Settled,
}

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let schemas = args
        .validate
        .as_deref()
        .map(SchemaRegistry::from_directory)
        .transpose()
        .map_err(|err| schema_error("failed to load schemas", err))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("failed to start runtime", err))?;

    runtime.block_on(call(args, schemas, timeout, format))
}

async fn call(
    args: CallArgs,
    schemas: Option<SchemaRegistry>,
    timeout: Duration,
    format: OutputFormat,
) -> CliResult<i32> {
    let config = ClientConfig {
        retry_budget: args.retries,
        ..ClientConfig::default()
    };
    let mut builder = Client::builder(&args.url).config(config);
    if let Some(schemas) = schemas {
        builder = builder.schemas(schemas);
    }
    let client = builder
        .build()
        .map_err(|err| client_error("failed to start client", err))?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let arguments: Vec<Value> = args.args.iter().map(|raw| parse_argument(raw)).collect();

    let handle = if args.force {
        client.call_force(&args.procedure, arguments)
    } else {
        client.call(&args.procedure, arguments)
    }
    .map_err(|err| client_error("call failed", err))?;
    let marker = handle.marker();

    let events_tx = tx.clone();
    client.events().on_any(move |event| {
        let outcome = match event {
            ClientEvent::Disconnected(reason) => Outcome::Disconnected(*reason),
            ClientEvent::CallSettled { marker: settled } if *settled == marker => {
                Outcome::Settled
            }
            _ => return,
        };
        let _ = events_tx.send(outcome);
    });
    client.events().on(EventKind::Reconnecting, |event| {
        if let ClientEvent::Reconnecting { attempt, delay } = event {
            tracing::info!(attempt, ?delay, "reconnecting");
        }
    });

    let result_tx = tx.clone();
    let error_tx = tx.clone();
    let timeout_tx = tx;
    drop(
        handle
            .then(move |value| {
                let _ = result_tx.send(Outcome::Result(value.clone()));
                value
            })
            .catch(move |error| {
                let _ = error_tx.send(Outcome::Error(error));
            })
            .timeout(timeout, move || {
                let _ = timeout_tx.send(Outcome::TimedOut);
            }),
    );

    let mut last = None;
    let mut failure = None;
    let mut stopped = None;

    let code = loop {
        let outcome = tokio::select! {
            outcome = rx.recv() => outcome,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break Ok(FAILURE);
            }
        };

        match outcome {
            Some(Outcome::Result(value)) => {
                if args.stream {
                    print_result(&args.procedure, marker, &value, format);
                }
                last = Some(value);
            }
            Some(Outcome::Error(error)) => failure = Some(error),
            Some(Outcome::Disconnected(reason)) => stopped = Some(reason),
            Some(Outcome::TimedOut) => {
                break Err(CliError::new(
                    TIMEOUT,
                    format!("{} did not finish within {timeout:?}", args.procedure),
                ));
            }
            Some(Outcome::Settled) => {
                break finish(&args, marker, last.take(), failure.take(), stopped, format);
            }
            None => break Err(CliError::new(INTERNAL, "client stopped unexpectedly")),
        }
    };

    client.disconnect();
    code
}

fn finish(
    args: &CallArgs,
    marker: u64,
    last: Option<Value>,
    failure: Option<Value>,
    stopped: Option<DisconnectReason>,
    format: OutputFormat,
) -> CliResult<i32> {
    if let Some(reason) = stopped {
        return Err(CliError::new(
            disconnect_code(reason),
            format!("{}: {reason}", args.url),
        ));
    }

    if let Some(error) = failure {
        let code = match error.get("code").and_then(Value::as_str) {
            Some("schema_violation") => DATA_INVALID,
            _ => FAILURE,
        };
        return Err(CliError::new(
            code,
            format!("{} failed: {error}", args.procedure),
        ));
    }

    if !args.stream {
        if let Some(value) = &last {
            print_result(&args.procedure, marker, value, format);
        }
    }
    Ok(SUCCESS)
}
