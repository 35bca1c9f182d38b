//! Worker binary: connects to every configured broker, requests jobs, and
//! renders them. Since actual tile rendering is an external collaborator
//! (spec's non-goal), this binary's handler just marks every job `Done`
//! with an empty payload — real deployments would link in a renderer here.

use clap::Parser;
use rendermq_cli_common::{init_logging, LogArgs, OrBail};
use rendermq_proto::Status;

#[derive(Debug, Parser)]
#[command(about = "RenderMQ worker: requests and completes render jobs")]
struct Args {
    /// Path to the distributed-queue ini configuration file.
    #[arg(long = "config", default_value = "dqueue.conf")]
    config: String,

    /// Unique identifier for this worker; defaults to a random UUID-like value.
    #[arg(long = "id")]
    id: Option<String>,

    /// Milliseconds to block in each poll iteration.
    #[arg(long = "poll-timeout-ms", default_value_t = 1000)]
    poll_timeout_ms: i64,

    /// Seconds to wait for a `GET_JOB` reply before assuming a broker died.
    #[arg(long = "broker-timeout-secs", default_value_t = 30)]
    broker_timeout_secs: i64,

    #[command(flatten)]
    log: LogArgs,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log);

    let config = rendermq_config::Config::from_file(&args.config).or_bail("failed to read worker config");
    let worker_id = args.id.unwrap_or_else(default_worker_id);

    tracing::info!(worker_id = %worker_id, brokers = config.broker_names.len(), "starting worker");

    rendermq_worker::reactor::run(&worker_id, &config.brokers, args.poll_timeout_ms, args.broker_timeout_secs, |mut job| {
        job.status = Status::Done;
        job.payload = Some(Vec::new());
        job
    })?;

    Ok(())
}

fn default_worker_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    format!("worker-{nanos:x}")
}
