//! Purpose: Serve the catalog page and its JSON snapshot over HTTP.
//! Exports: `ServeConfig`, `LedgerSource`, `serve`, `init_tracing`.
//! Role: Axum front end over `api::Catalog`; the browser form and buttons post here.
//! Invariants: Loopback-only unless explicitly allowed.
//! Invariants: Form posts always answer 303 to `/`; failures are logged, never rendered.
//! Invariants: An initial reconciliation runs before the listener accepts requests.

use axum::extract::{Form, Path as AxumPath, State};
use axum::http::HeaderValue;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::future::IntoFuture;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bookledger::api::{
    Catalog, CatalogSettings, Error, ErrorKind, LedgerConfig, MemoryLedger, RefreshMode, Session,
    connect,
};

use crate::page::render_index;

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub allow_non_loopback: bool,
    pub settings: CatalogSettings,
    pub source: LedgerSource,
}

/// Where the served catalog reads and writes.
#[derive(Clone, Debug)]
pub enum LedgerSource {
    Rpc(LedgerConfig),
    InMemory,
}

#[derive(Clone)]
struct AppState {
    catalog: Catalog,
    session: Session,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    validate_config(&config)?;

    let session = open_session(config.source).await?;
    let catalog = Catalog::new(&session, config.settings);
    if catalog.refresh().await.is_err() {
        warn!("initial catalog load failed; lists start empty");
    }
    if catalog.settings().refresh == RefreshMode::Events {
        catalog.spawn_event_watcher();
    }

    let app = router(AppState { catalog, session });

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    info!(bind = %config.bind, "serving catalog");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out"));
                }
            }
        }
    };
    Ok(())
}

async fn open_session(source: LedgerSource) -> Result<Session, Error> {
    match source {
        LedgerSource::InMemory => {
            info!("using in-memory ledger");
            Ok(Session::attach(Arc::new(MemoryLedger::new()), None))
        }
        LedgerSource::Rpc(ledger) => tokio::task::spawn_blocking(move || connect(&ledger))
            .await
            .map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("provider session task failed")
                    .with_source(err)
            })?,
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/api/catalog", get(catalog_json))
        .route("/books", post(add_book))
        .route("/books/:uid/borrow", post(borrow_book))
        .route("/books/:uid/return", post(return_book))
        .route("/refresh", post(refresh))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }
    if config.settings.refresh == RefreshMode::Events && config.settings.poll_interval.is_zero() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--poll-ms must be greater than zero")
            .with_hint("Use a positive value like 2000."));
    }
    Ok(())
}

/// Install the fmt subscriber on stderr; `RUST_LOG` overrides `default_directive`.
pub fn init_tracing(default_directive: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

#[derive(Debug, Deserialize)]
struct AddBookForm {
    #[serde(default)]
    uid: String,
    #[serde(default)]
    title: String,
}

async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(render_index(&state.catalog.snapshot()))
}

async fn healthz(State(state): State<Arc<AppState>>) -> Response {
    json_response(json!({
        "ok": true,
        "connected": state.session.is_connected(),
        "chain_id": state.session.chain_id(),
    }))
}

async fn catalog_json(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.catalog.snapshot();
    json_response(json!({
        "account": snapshot.account,
        "available": snapshot.available,
        "borrowed": snapshot.borrowed,
    }))
}

async fn add_book(State(state): State<Arc<AppState>>, Form(form): Form<AddBookForm>) -> Redirect {
    state.catalog.set_pending_uid(form.uid);
    state.catalog.set_pending_title(form.title);
    // Failures are logged by the catalog; the page simply shows no change.
    let _ = state.catalog.add_book().await;
    Redirect::to("/")
}

async fn borrow_book(
    State(state): State<Arc<AppState>>,
    AxumPath(uid): AxumPath<String>,
) -> Redirect {
    if let Some(uid) = path_uid(&uid) {
        let _ = state.catalog.borrow_book(uid).await;
    }
    Redirect::to("/")
}

async fn return_book(
    State(state): State<Arc<AppState>>,
    AxumPath(uid): AxumPath<String>,
) -> Redirect {
    if let Some(uid) = path_uid(&uid) {
        let _ = state.catalog.return_book(uid).await;
    }
    Redirect::to("/")
}

async fn refresh(State(state): State<Arc<AppState>>) -> Redirect {
    let _ = state.catalog.refresh().await;
    Redirect::to("/")
}

fn path_uid(raw: &str) -> Option<u64> {
    match raw.parse::<u64>() {
        Ok(uid) => Some(uid),
        Err(_) => {
            warn!(uid = raw, "ignoring request for non-numeric uid");
            None
        }
    }
}

fn json_response(payload: serde_json::Value) -> Response {
    let mut response = Json(payload).into_response();
    response
        .headers_mut()
        .insert("cache-control", HeaderValue::from_static("no-store"));
    response
}
