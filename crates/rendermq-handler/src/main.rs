use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;

use rendermq_cli_common::{init_logging, LogArgs, OrBail};
use rendermq_handler::admission::QueueThresholds;
use rendermq_handler::pipeline::dirty_list_from_config;
use rendermq_handler::reactor::HandlerRunner;
use rendermq_handler::storage::InMemoryStorage;
use rendermq_handler::style::StyleRules;
use rendermq_handler::{Pipeline, PipelineConfig};

#[derive(Debug, Parser)]
#[command(about = "RenderMQ tile request handler: HTTP front end over the broker ring")]
struct Args {
    #[arg(long = "config", default_value = "dqueue.conf")]
    config: String,
    #[arg(long = "handler-id")]
    handler_id: String,
    #[arg(long = "listen", default_value = "0.0.0.0:8080")]
    listen: SocketAddr,
    #[command(flatten)]
    log: LogArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log);

    let config = rendermq_config::Config::from_file(&args.config).or_bail("failed to read handler config");

    let thresholds = QueueThresholds {
        stale: config.get_i64("handler", "stale_threshold", 50).or_bail("bad stale_threshold") as usize,
        satisfy: config.get_i64("handler", "satisfy_threshold", 100).or_bail("bad satisfy_threshold") as usize,
        max: config.get_i64("handler", "max_threshold", 200).or_bail("bad max_threshold") as usize,
    };
    let stale_render_background = config.get("handler", "stale_render_background") == Some("true");
    let max_age_secs = config.get_i64("handler", "max_age_secs", 3600).or_bail("bad max_age_secs");

    let runner = HandlerRunner::spawn(
        args.handler_id.clone(),
        config.brokers.clone(),
        config.timings.liveness_time_secs,
        config.timings.resubscribe_interval_secs,
        config.timings.settle_time_secs,
    );

    let pipeline = Arc::new(Pipeline {
        style_rules: StyleRules::from_config(&config),
        storage: Arc::new(InMemoryStorage::new()),
        runner,
        config: PipelineConfig {
            thresholds,
            stale_render_background,
            max_age_secs,
            dirty_list: dirty_list_from_config(&config),
        },
    });

    tracing::info!(handler_id = %args.handler_id, listen = %args.listen, "starting tile handler");

    let app = Router::new().route("/*path", get(serve_tile)).layer(TraceLayer::new_for_http()).with_state(pipeline);

    let listener = tokio::net::TcpListener::bind(args.listen).await.or_bail("failed to bind listen address");
    axum::serve(listener, app.into_make_service()).await.or_bail("server exited");
    Ok(())
}

async fn serve_tile(State(pipeline): State<Arc<Pipeline>>, Path(path): Path<String>, headers: HeaderMap) -> Response {
    let if_modified_since = headers.get("if-modified-since").and_then(|v| v.to_str().ok());
    let response = pipeline.handle(&format!("/{path}"), if_modified_since).await;

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = axum::response::Response::builder().status(status);
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder.body(axum::body::Body::from(response.body)).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
