use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Instant};

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    response::Response,
    routing::get,
    Json, Router,
};
use clap::Parser;
use engine::{menu::MenuCatalog, Engine};
use shared::error::{EngineError, ErrorView};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;
mod pages;
mod session;
mod templates;
mod transport;

use app_state::AppState;
use config::load_settings;
use session::{lock_session, session_cookie, session_id_from_cookies, InMemorySessions};
use templates::FileTemplates;

#[derive(Parser, Debug)]
struct Args {
    /// TOML file to read instead of `server.toml`.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let settings = load_settings(args.config.as_deref())?;
    let templates = FileTemplates::load(&settings.template_dir)?;
    let menu = Arc::new(MenuCatalog::from_file(&settings.menu_file));
    let engine = Engine::new(
        pages::registry(menu),
        Arc::new(templates),
        settings.engine_settings(),
    );

    let addr: SocketAddr = settings.server_bind.parse()?;
    let state = AppState {
        engine: Arc::new(engine),
        sessions: Arc::new(InMemorySessions::new(settings.session_idle_timeout())),
        settings,
    };
    let app = build_router(Arc::new(state));

    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    let limit = state.settings.max_body_bytes;
    Router::new()
        .route("/healthz", get(healthz))
        .fallback(handle_page)
        .layer(RequestBodyLimitLayer::new(limit))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn handle_page(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, (StatusCode, Json<ErrorView>)> {
    let started = Instant::now();
    let Some(method) = transport::engine_method(request.method()) else {
        return Err((
            StatusCode::METHOD_NOT_ALLOWED,
            Json(ErrorView::from(EngineError::transport(format!(
                "method {} is not supported",
                request.method()
            )))),
        ));
    };
    let cookie_id = session_id_from_cookies(request.headers(), &state.settings.session_cookie);

    let page_request = transport::engine_request(request, method, &state.settings.context_path)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, Json(ErrorView::from(e))))?;
    let path = page_request.path.clone();

    let opened = state.sessions.open(cookie_id).await;
    let engine = state.engine.clone();
    let session = opened.session.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let mut session = lock_session(&session);
        engine.handle(page_request, &mut session)
    })
    .await
    .map_err(|e| internal(EngineError::transport(e.to_string())))?;

    if !state.settings.mode.is_production() {
        info!(
            %path,
            status = outcome.response.status,
            forwards = outcome.trail.len().saturating_sub(1),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request processed"
        );
    }

    let mut response = transport::http_response(outcome.response);
    if opened.created {
        let cookie = session_cookie(
            &state.settings.session_cookie,
            opened.id,
            &state.settings.context_path,
        );
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => error!(%e, "session cookie is not a valid header value"),
        }
    }
    Ok(response)
}

fn internal(e: EngineError) -> (StatusCode, Json<ErrorView>) {
    error!(%e, "request could not be processed");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorView::from(e)))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
