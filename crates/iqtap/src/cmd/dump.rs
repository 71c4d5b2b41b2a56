use iqtap_capture::{
    prepare_output_dir, run_capture, CaptureConfig, DemuxConfig, DEFAULT_DURATION_MS,
};
use iqtap_session::connect;
use iqtap_transport::resolve_server;
use tracing::warn;

use crate::cmd::DumpArgs;
use crate::exit::{capture_error, session_error, CliResult, SUCCESS};
use crate::output::{print_capture_report, OutputFormat};

fn capture_config(args: &DumpArgs) -> CaptureConfig {
    let mut demux = DemuxConfig {
        keep_raw: args.keep_raw,
        ..DemuxConfig::default()
    };
    if let Some(size) = args.buffer_size {
        demux.buffer_size = size;
    }
    CaptureConfig {
        dir: args.path.clone(),
        duration_ms: args.duration_ms.unwrap_or(DEFAULT_DURATION_MS),
        rf_ports: args.rf_ports.clone(),
        tx: args.tx,
        rx: args.rx,
        demux,
    }
}

pub async fn run(args: DumpArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = capture_config(&args);
    config
        .validate()
        .map_err(|err| capture_error("dump", err))?;
    // Nothing touches the network until the directory is usable.
    config.dir = prepare_output_dir(&config.dir).map_err(|err| capture_error("dump", err))?;

    let session_config = config.session_config(args.session.session_config()?);
    let server = resolve_server(&args.server);
    let session = connect(&server, &args.session.transport_options(), session_config)
        .await
        .map_err(|err| session_error(&server, err))?;

    let report = run_capture(session, &config)
        .await
        .map_err(|err| capture_error(&server, err))?;
    let overflows = report.overflows();
    if overflows > 0 {
        warn!(files = overflows, "some raw files were cut short by an overflow");
    }
    print_capture_report(&report, format);
    Ok(SUCCESS)
}
