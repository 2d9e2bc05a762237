//! # nvprobe
//!
//! Writes a fixed payload to a file or block device node, reads it back,
//! prints what came back, then idles until SIGINT or SIGTERM.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use nvprobe_config::{
    log_cli_debug, log_cli_error, log_cli_info, log_probe_info, log_probe_warn, Config,
    ConfigError, HeartbeatConfig, LogLevel,
};
use nvprobe_io::{ProbeOptions, ReadBack, PAYLOAD};

mod error;
mod shutdown;

use error::CliError;
use shutdown::Shutdown;

const USAGE_ERROR: &str =
    "Error: no file path given. The first argument should be the block device file path";

/// Grace period for blocking I/O still in flight once the main flow is done
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

/// Block device write/read probe
#[derive(Parser, Debug)]
#[command(name = "nvprobe")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Block device or file to write the payload to
    #[arg(value_name = "PATH")]
    path: Option<PathBuf>,

    /// Seconds between heartbeat messages
    #[arg(long, value_name = "SECS")]
    interval: Option<u64>,

    /// Print the read-back without checking it against the payload
    #[arg(long)]
    no_verify: bool,

    /// fsync the target after writing
    #[arg(long)]
    sync: bool,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    /// Exit after the round trip instead of idling
    #[arg(long)]
    once: bool,
}

fn main() -> ExitCode {
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => return report(CliError::Runtime(e)),
    };

    let result = rt.block_on(async_main());
    // A hung device or config read must not keep the process alive after shutdown
    rt.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(e),
    }
}

/// Signal handlers go in before anything that touches the disk.
async fn async_main() -> Result<(), CliError> {
    let mut shutdown = Shutdown::listen().map_err(CliError::Signal)?;
    let cli = Cli::parse();

    let config = tokio::select! {
        loaded = tokio::task::spawn_blocking(Config::load) => loaded?,
        _ = shutdown.requested() => return Ok(()),
    };

    let level = cli
        .log_level
        .or_else(|| config.as_ref().ok().map(|c| c.log.level))
        .unwrap_or(LogLevel::Warn);
    nvprobe_config::init_logging(level);

    run(cli, config, shutdown).await
}

/// Single top-level error sink: one message, one exit status per kind.
fn report(err: CliError) -> ExitCode {
    let code = err.exit_code();
    match &err {
        CliError::Usage => println!("{USAGE_ERROR}"),
        CliError::Probe(probe) => {
            log_cli_error!(
                "Probe failed",
                path = tracing::field::display(probe.path().display()),
                error = tracing::field::display(probe),
                exit_code = code
            );
            eprintln!("Error: {err}");
        }
        _ => {
            log_cli_error!(
                "Aborting",
                error = tracing::field::display(&err),
                exit_code = code
            );
            eprintln!("Error: {err}");
        }
    }
    ExitCode::from(code)
}

async fn run(
    cli: Cli,
    config: Result<Config, ConfigError>,
    mut shutdown: Shutdown,
) -> Result<(), CliError> {
    let path = cli.path.ok_or(CliError::Usage)?;
    let mut config = config?;
    if let Some(secs) = cli.interval {
        config.heartbeat.interval_secs = secs;
    }
    config.validate()?;

    let opts = ProbeOptions {
        mode: config.probe.file_mode,
        sync: cli.sync || config.probe.sync,
    };
    let verify = config.probe.verify && !cli.no_verify;
    log_cli_debug!("Starting probe", verify = verify, sync = opts.sync);

    let read = tokio::select! {
        read = probe(&path, opts) => read?,
        received = shutdown.requested() => {
            log_cli_info!("Probe interrupted", signal = received.as_str());
            return Ok(());
        }
    };

    if verify {
        nvprobe_io::verify(&path, PAYLOAD, &read)?;
        log_probe_info!("Read-back verified", bytes = read.len());
    } else if !read.matches(PAYLOAD) {
        log_probe_warn!(
            "Read-back differs from payload",
            requested = read.requested,
            actual = read.len()
        );
    }

    if cli.once {
        return Ok(());
    }

    idle(&config.heartbeat, &mut shutdown).await;
    Ok(())
}

/// Write-then-read on a blocking thread, reporting progress on stdout.
async fn probe(path: &Path, opts: ProbeOptions) -> Result<ReadBack, CliError> {
    println!("Writing to file {}", path.display());

    let target = path.to_path_buf();
    let read = tokio::task::spawn_blocking(move || nvprobe_io::round_trip(&target, PAYLOAD, &opts))
        .await??;

    println!("Read {} bytes: \"{}\"", read.len(), read.as_lossy_str());
    Ok(read)
}

/// Heartbeat until a termination signal arrives.
async fn idle(heartbeat: &HeartbeatConfig, shutdown: &mut Shutdown) {
    let interval = heartbeat.interval();
    loop {
        println!("{}", heartbeat.message);
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            received = shutdown.requested() => {
                log_cli_info!("Idle loop stopped", signal = received.as_str());
                return;
            }
        }
    }
}
