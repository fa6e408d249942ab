use std::process::ExitCode;

use clap::Parser;
use stokes_slurper::{
    args::{convert_filter, Args},
    capture::UdpBatchReader,
    config::RunConfig,
    error::Error,
    header::{annotate, read_header},
    ringbuffer::DadaRingBuffer,
    RunContext,
};
use tracing::{error, info};

fn run(args: Args) -> Result<(), Error> {
    let settings = args.into_settings();
    let config = RunConfig::derive(&settings)?;
    info!(
        case = config.science_case,
        mode = config.science_mode,
        start = config.start,
        end = config.end,
        pages = config.pages(),
        "Starting run"
    );

    // Read everything from disk before we touch the network or shared memory
    let mut headers = settings
        .headers
        .iter()
        .map(|path| read_header(path))
        .collect::<Result<Vec<_>, _>>()?;
    for header in &mut headers {
        annotate(header, &config);
    }

    let source = UdpBatchReader::bind(settings.port, settings.socket_buffer)?;
    let rings = settings
        .keys
        .iter()
        .map(|&key| DadaRingBuffer::connect(key))
        .collect::<Result<Vec<_>, _>>()?;

    let mut ctx = RunContext::new(config, source, rings, &headers)?;
    ctx.run()?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    // Set the tracing level from the verbosity flags
    tracing_subscriber::fmt()
        .with_max_level(convert_filter(args.verbose.log_level_filter()))
        .init();
    match run(args) {
        Ok(()) => {
            info!("Run complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
