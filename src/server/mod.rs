//! Webhook deployment shapes.
//!
//! `Threaded` acknowledges at once and runs the job on a [`JobPool`].
//! `Sync` holds the request open until the job has been reported.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use log::{error, info, warn};
use tokio::net::TcpListener;

use crate::dispatch::{Dispatcher, TriggerDecision};
use crate::telegram::{TriggerEvent, Update};
use crate::worker::JobPool;

pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    Threaded,
    Sync,
}

#[derive(Clone)]
enum Execution {
    Threaded(Arc<JobPool>),
    Sync,
}

#[derive(Clone)]
pub struct AppState {
    dispatcher: Arc<Dispatcher>,
    token: Arc<str>,
    secret: Option<Arc<str>>,
    execution: Execution,
}

impl AppState {
    pub fn threaded(dispatcher: Arc<Dispatcher>, token: &str, pool: Arc<JobPool>) -> Self {
        Self {
            dispatcher,
            token: token.into(),
            secret: None,
            execution: Execution::Threaded(pool),
        }
    }

    pub fn sync(dispatcher: Arc<Dispatcher>, token: &str) -> Self {
        Self {
            dispatcher,
            token: token.into(),
            secret: None,
            execution: Execution::Sync,
        }
    }

    pub fn with_secret(mut self, secret: Option<String>) -> Self {
        self.secret = secret.filter(|s| !s.is_empty()).map(Into::into);
        self
    }

    pub fn mode(&self) -> Mode {
        match self.execution {
            Execution::Threaded(_) => Mode::Threaded,
            Execution::Sync => Mode::Sync,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/webhook/{token}", post(webhook))
        .with_state(state)
}

/// Serve until Ctrl+C or SIGTERM.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    info!(
        "webhook listening on {} ({:?} mode)",
        listener.local_addr()?,
        state.mode()
    );
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn health() -> &'static str {
    "ok"
}

async fn webhook(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if token != *state.token {
        return StatusCode::NOT_FOUND;
    }
    if let Some(secret) = &state.secret {
        let given = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if given != Some(&**secret) {
            warn!("webhook call with a wrong secret token");
            return StatusCode::FORBIDDEN;
        }
    }

    // Telegram redelivers anything that is not acknowledged, so bad payloads still get 200.
    let update: Update = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(e) => {
            error!("malformed update: {}", e);
            return StatusCode::OK;
        }
    };
    let Some(event) = update.event() else {
        error!("update {} has no chat id, skipping", update.update_id);
        return StatusCode::OK;
    };

    match &state.execution {
        Execution::Threaded(pool) => dispatch_threaded(&state.dispatcher, pool, event),
        Execution::Sync => {
            let d = Arc::clone(&state.dispatcher);
            if let Err(e) = tokio::task::spawn_blocking(move || d.handle(&event)).await {
                error!("job task failed: {}", e);
            }
        }
    }
    StatusCode::OK
}

fn dispatch_threaded(dispatcher: &Arc<Dispatcher>, pool: &JobPool, event: TriggerEvent) {
    let d = Arc::clone(dispatcher);
    if dispatcher.decide(&event) != TriggerDecision::Start {
        tokio::task::spawn_blocking(move || {
            d.screen(&event);
        });
        return;
    }

    let reporter = Arc::clone(dispatcher);
    let chat_id = event.chat_id;
    info!("new request from chat {}", chat_id);
    pool.submit(
        move || {
            d.screen(&event);
            d.run()
        },
        move |result| reporter.report(chat_id, result.and_then(|r| r)),
    );
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received terminate signal"),
    }
    info!("shutting down");
}
