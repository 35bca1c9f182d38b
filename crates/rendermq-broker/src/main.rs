//! Broker binary: reads the distributed-queue config, picks its own section
//! by name, and runs the reactor until a `SHUTDOWN` monitor command arrives.

use clap::Parser;
use rendermq_cli_common::{init_logging, LogArgs, OrBail};

#[derive(Debug, Parser)]
#[command(about = "RenderMQ broker: priority task queue and worker dispatch")]
struct Args {
    /// Path to the distributed-queue ini configuration file.
    #[arg(long = "config", default_value = "dqueue.conf")]
    config: String,

    /// This broker's section name within the config file.
    #[arg(long = "name")]
    name: String,

    #[command(flatten)]
    log: LogArgs,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log);

    let config = rendermq_config::Config::from_file(&args.config).or_bail("failed to read broker config");
    let endpoints = config
        .brokers
        .get(&args.name)
        .unwrap_or_else(|| {
            tracing::error!(broker = %args.name, "no such broker section in config");
            std::process::exit(1);
        });

    tracing::info!(broker = %args.name, in_req = %endpoints.in_req, out_req = %endpoints.out_req, "starting broker");

    rendermq_broker::reactor::run(
        &args.name,
        endpoints,
        config.timings.heartbeat_interval_secs,
        config.timings.resubmit_interval_secs,
        config.timings.zombie_time_secs,
    )?;

    Ok(())
}
