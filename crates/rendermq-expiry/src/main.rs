use clap::{Parser, ValueEnum};
use rendermq_cli_common::{init_logging, LogArgs, OrBail};
use rendermq_expiry::reactor::ExpiryEndpoints;
use rendermq_expiry::FsmState;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Role {
    Primary,
    Backup,
}

#[derive(Debug, Parser)]
#[command(about = "RenderMQ expiry service: binary-star tile expiry lookup")]
struct Args {
    #[arg(long = "config", default_value = "dqueue.conf")]
    config: String,
    #[arg(long = "role", value_enum)]
    role: Role,
    #[command(flatten)]
    log: LogArgs,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log);
    let config = rendermq_config::Config::from_file(&args.config).or_bail("failed to read expiry config");

    let (section, peer_section, initial) = match args.role {
        Role::Primary => ("primary", "backup", FsmState::Primary),
        Role::Backup => ("backup", "primary", FsmState::Backup),
    };

    let endpoints = ExpiryEndpoints {
        frontend: config.get_required("expiry", &format!("{section}.frontend")).or_bail("missing frontend endpoint").to_string(),
        statepub: config.get_required("expiry", &format!("{section}.statepub")).or_bail("missing statepub endpoint").to_string(),
        peer_statepub: config.get_required("expiry", &format!("{peer_section}.statepub")).or_bail("missing peer statepub endpoint").to_string(),
    };

    let heartbeat_interval_secs = config.get_i64("expiry", "heartbeat_interval_secs", config.timings.heartbeat_interval_secs).or_bail("bad heartbeat_interval_secs");

    tracing::info!(role = ?args.role, frontend = %endpoints.frontend, "starting expiry server");
    rendermq_expiry::reactor::run(initial, &endpoints, heartbeat_interval_secs)?;
    Ok(())
}
