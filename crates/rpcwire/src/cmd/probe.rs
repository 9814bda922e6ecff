use rpcwire_transport::{Endpoint, HttpProber, ProbeOutcome, Prober};

use crate::cmd::{parse_duration, ProbeArgs};
use crate::exit::{
    io_error, transport_error, CliResult, PERMISSION_DENIED, PROBE_UNREACHABLE, SUCCESS,
};
use crate::output::{print_probe, OutputFormat};

pub fn run(args: ProbeArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let endpoint =
        Endpoint::parse(&args.url).map_err(|err| transport_error("invalid address", err))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("failed to start runtime", err))?;

    let prober = HttpProber::with_timeout(timeout);
    let outcome = runtime.block_on(prober.probe(endpoint.probe_url()));
    tracing::debug!(url = %endpoint, ?outcome, "probe finished");

    print_probe(
        endpoint.url().as_str(),
        endpoint.probe_url().as_str(),
        &outcome,
        format,
    );

    Ok(match outcome {
        ProbeOutcome::Reachable(_) => SUCCESS,
        ProbeOutcome::Unauthorized => PERMISSION_DENIED,
        ProbeOutcome::Unreachable(_) => PROBE_UNREACHABLE,
    })
}
