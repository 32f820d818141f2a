//! RLM UI server - starts sessions and streams their turns to the browser.

mod routes;
mod sessions;
mod sse;
mod state;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::routing::get;
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{info, warn};

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "rlm-ui")]
#[command(about = "Web UI for running and browsing rlm sessions")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Project directory (contains .rlm/)
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,

    /// Directory containing UI static files (defaults to ui/dist in the project directory)
    #[arg(long)]
    ui_dir: Option<PathBuf>,

    /// Extra browser origin allowed to call the API, e.g. a dev server
    /// (`http://localhost:5173`). Repeatable. Without it only same-origin pages can.
    #[arg(long = "allow-origin")]
    allow_origins: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rlm_ui=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let project_dir = args
        .project_dir
        .canonicalize()
        .with_context(|| format!("resolve {}", args.project_dir.display()))?;
    info!(project_dir = %project_dir.display(), "starting rlm-ui");
    if !rlm::io::config::config_path(&project_dir).exists() {
        warn!(
            project_dir = %project_dir.display(),
            "no .rlm/config.toml, sessions use default settings (run `rlm init`)"
        );
    }

    let state = AppState::new(project_dir.clone());
    sse::start_file_watcher(state.clone());

    let cors = cors_layer(&args.allow_origins)?;
    let ui_dir = args
        .ui_dir
        .unwrap_or_else(|| project_dir.join("ui").join("dist"));
    let app = build_app(state, &ui_dir, cors);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// CORS for the listed origins only; `None` keeps the API same-origin.
fn cors_layer(origins: &[String]) -> Result<Option<CorsLayer>> {
    if origins.is_empty() {
        return Ok(None);
    }
    let mut values = Vec::with_capacity(origins.len());
    for origin in origins {
        if origin == "*" {
            bail!("--allow-origin needs an explicit origin, not '*'");
        }
        let value = HeaderValue::from_str(origin)
            .with_context(|| format!("invalid origin {origin:?}"))?;
        values.push(value);
    }
    info!(origins = ?origins, "allowing cross-origin API access");
    Ok(Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(values))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]),
    ))
}

fn build_app(state: AppState, ui_dir: &Path, cors: Option<CorsLayer>) -> Router {
    let mut app = Router::new()
        .nest("/api", routes::api_router())
        .route("/events", get(sse::events_handler));
    if let Some(cors) = cors {
        app = app.layer(cors);
    }
    let mut app = app.with_state(state);

    if ui_dir.exists() {
        info!(ui_dir = %ui_dir.display(), "serving static UI files");
        app = app.fallback_service(ServeDir::new(ui_dir).append_index_html_on_directories(true));
    } else {
        info!(ui_dir = %ui_dir.display(), "UI directory not found, API-only mode");
    }
    app
}
