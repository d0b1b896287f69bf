//! Cascade control server: hosts one controller, its monitor, and the HTTP API.

mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use axum::Router;
use cascade::controller::{Collaborators, Controller};
use cascade::io::context::WorkflowContext;
use cascade::logging;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "cascade-server")]
#[command(about = "HTTP control surface for a cascade project")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Project directory (contains .cascade/)
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(logging::SERVER_FILTER);

    let args = Args::parse();

    let project_dir = args.project_dir.canonicalize().unwrap_or(args.project_dir);
    info!(project_dir = %project_dir.display(), "starting cascade-server");

    let ctx = WorkflowContext::load(&project_dir).context("load project context")?;
    if !ctx.paths.cascade_dir.is_dir() {
        warn!(dir = %ctx.paths.cascade_dir.display(), "no .cascade directory; run `cascade init`");
    }
    let controller =
        Controller::open(ctx, Collaborators::production()).context("open controller")?;
    controller.resume_monitoring();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .nest("/api", routes::api_router())
        .layer(cors)
        .with_state(AppState::new(controller.clone()));

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tokio::task::spawn_blocking(move || controller.shutdown()).await?;
    info!("stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(err = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
