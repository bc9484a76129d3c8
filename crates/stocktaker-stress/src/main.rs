use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use stocktaker_service::config::Config as StocktakerConfig;
use stocktaker_service::logging::{ensure_log_error, init_logging};
use stocktaker_service::metrics::init_metrics;

mod logging;
mod stresstest;
mod workloads;

use stresstest::perform_stresstest;
use workloads::WorkloadsConfig;

/// Command line interface parser.
#[derive(Parser)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to the workload definition file.
    #[arg(long, short, value_name = "FILE")]
    workloads: PathBuf,

    /// Duration of the stresstest.
    #[arg(long, short, value_parser = humantime::parse_duration)]
    duration: Duration,

    /// Keep logging and metrics active, but send them to local sinks instead of the configured
    /// targets.
    #[arg(long)]
    mock_telemetry: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // parse configs
    let workloads_file =
        std::fs::File::open(&cli.workloads).context("failed to open workloads file")?;
    let workloads: WorkloadsConfig =
        serde_yaml::from_reader(workloads_file).context("failed to parse workloads YAML")?;

    let service_config =
        StocktakerConfig::get(cli.config.as_deref()).context("failed loading config")?;

    let mut guard = if cli.mock_telemetry {
        let config = logging::Config {
            backtraces: service_config.logging.enable_backtraces,
            tracing: true,
            metrics: true,
        };
        // SAFETY: No other threads have been spawned yet.
        unsafe { logging::init(config) }?
    } else {
        // SAFETY: No other threads have been spawned yet.
        unsafe { init_logging(&service_config) };
        logging::Guard::default()
    };

    let sentry = sentry::init(sentry::ClientOptions {
        dsn: service_config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        traces_sample_rate: 1.0,
        ..Default::default()
    });

    if !cli.mock_telemetry {
        let environment = sentry.options().environment.as_deref();
        init_metrics(&service_config.metrics, environment)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    let result = runtime.block_on(async {
        if let Some(udp_sink) = guard.udp_sink.take() {
            tokio::spawn(udp_sink);
        }
        perform_stresstest(service_config, workloads, cli.duration).await
    });

    if let Err(error) = &result {
        ensure_log_error(error);
    }
    result
}
