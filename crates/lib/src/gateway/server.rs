//! Gateway HTTP + WebSocket server (single port): one socket per tab UI.
//!
//! Each connection is scoped to a browser tab id. Connecting replays the
//! tab's retained feed, then an asynchronous probe reports the backend
//! authentication state. Questions stream back as answer deltas; an
//! authentication failure invalidates the shared token and is signalled to
//! every connected tab.

use crate::backend::{AnswerEvent, BackendError, ChatClient};
use crate::cache::{Cache, KEY_ACCESS_TOKEN};
use crate::config::{self, Config};
use crate::gateway::protocol::{AuthStatus, Inbound, MetaAction, MetaCommand, Outbound};
use crate::launcher::{SystemOpener, UrlOpener};
use crate::tabs::{TabId, TabStore};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

const PROTOCOL_VERSION: u32 = 1;

/// Outbound frames buffered per connection before backpressure applies.
const CONNECTION_BUFFER: usize = 64;

/// Shared state for the gateway (config, tab store, token cache, client).
#[derive(Clone)]
pub struct RouterState {
    pub config: Arc<Config>,
    pub tabs: Arc<TabStore>,
    /// Token/conversation cache: the one intentionally cross-tab store.
    pub cache: Arc<Cache<String>>,
    pub client: ChatClient,
    pub opener: Arc<dyn UrlOpener>,
    /// Fired on SIGINT/SIGTERM to tear down connected sockets.
    pub shutdown_tx: broadcast::Sender<()>,
}

impl RouterState {
    pub fn new(config: Config) -> Self {
        let cache = Arc::new(Cache::default());
        let base_url = config::resolve_backend_url(&config);
        let client = ChatClient::new(base_url, config.backend.model.clone(), cache.clone());
        let (shutdown_tx, _) = broadcast::channel(4);
        Self {
            config: Arc::new(config),
            tabs: Arc::new(TabStore::new()),
            cache,
            client,
            opener: Arc::new(SystemOpener),
            shutdown_tx,
        }
    }
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// Blocks until shutdown (e.g. Ctrl+C).
pub async fn run_gateway(config: Config) -> Result<()> {
    let bind = config.gateway.bind.trim().to_string();
    let port = config.gateway.port;
    if !config::is_loopback_bind(&bind) {
        log::warn!("gateway binding to non-loopback address {}", bind);
    }

    let state = RouterState::new(config);
    let shutdown_tx = state.shutdown_tx.clone();

    let app = Router::new()
        .route("/", get(health_http))
        .route("/ws", get(ws_handler))
        .route("/tabs/:tab_id/toggle", post(toggle_tab))
        .with_state(state);

    let bind_addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or
/// SIGTERM); tells connected sockets to close first.
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining tab connections");
    let _ = shutdown_tx.send(());
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<RouterState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "protocol": PROTOCOL_VERSION,
        "port": state.config.gateway.port,
    }))
}

/// POST /tabs/{id}/toggle: host action trigger (e.g. toolbar icon click);
/// sends the UI-visibility toggle to the tab's current connection.
async fn toggle_tab(State(state): State<RouterState>, Path(tab_id): Path<TabId>) -> StatusCode {
    match state.tabs.connection(tab_id).await {
        Some(conn) => {
            if conn.send(Outbound::toggle()).await.is_err() {
                log::error!("toggle: tab {} connection is gone", tab_id);
                return StatusCode::NOT_FOUND;
            }
            StatusCode::NO_CONTENT
        }
        None => {
            log::error!("toggle: tab {} not found", tab_id);
            StatusCode::NOT_FOUND
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct WsParams {
    /// Tab id the connecting UI belongs to.
    tab: TabId,
}

/// GET /ws?tab=<id> upgrades to WebSocket for that tab's UI.
async fn ws_handler(
    State(state): State<RouterState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.tab))
}

async fn handle_socket(mut socket: WebSocket, state: RouterState, tab_id: TabId) {
    log::debug!("tab {} connected", tab_id);
    let (tx, mut rx) = mpsc::channel::<Outbound>(CONNECTION_BUFFER);
    let (active, history) = state.tabs.connect(tab_id, tx.clone()).await;

    if send_frame(&mut socket, &Outbound::set_active(active)).await.is_err() {
        return;
    }
    // replay retained history so a reloaded page does not lose its feed
    for msg in history {
        if send_frame(&mut socket, &msg).await.is_err() {
            return;
        }
    }

    // probe authentication in the background and report the result
    {
        let client = state.client.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let status = match client.access_token().await {
                Ok(_) => AuthStatus::Authorized,
                Err(_) => AuthStatus::Unauthorized,
            };
            let _ = tx.send(Outbound::auth(status)).await;
        });
    }

    let mut shutdown_rx = state.shutdown_tx.subscribe();
    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.recv() => break,

            out = rx.recv() => {
                let Some(out) = out else { break };
                if send_frame(&mut socket, &out).await.is_err() {
                    break;
                }
            }

            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                let Message::Text(text) = msg else { continue };
                let Ok(inbound) = serde_json::from_str::<Inbound>(&text) else {
                    log::debug!("tab {}: unrecognized frame: {}", tab_id, text);
                    continue;
                };
                handle_inbound(&state, tab_id, &tx, inbound).await;
            }
        }
    }
    log::debug!("tab {} disconnected", tab_id);
}

async fn send_frame(socket: &mut WebSocket, out: &Outbound) -> Result<(), axum::Error> {
    let text = serde_json::to_string(out).unwrap_or_default();
    log::debug!("send {}", text);
    socket.send(Message::Text(text)).await
}

async fn handle_inbound(
    state: &RouterState,
    tab_id: TabId,
    conn: &mpsc::Sender<Outbound>,
    inbound: Inbound,
) {
    match inbound {
        Inbound::Meta(cmd) => handle_meta(state, tab_id, cmd).await,
        Inbound::Question(q) => {
            if !state.tabs.begin_request(tab_id).await {
                // not persisted: the running request's placeholder must stay
                if conn
                    .try_send(Outbound::error("a question is already in flight for this tab"))
                    .is_err()
                {
                    log::debug!("tab {}: could not deliver in-flight rejection", tab_id);
                }
                return;
            }
            let state = state.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_question(&state, tab_id, &q.question).await {
                    log::error!("tab {}: question failed: {}", tab_id, e);
                    state.cache.invalidate(KEY_ACCESS_TOKEN).await;
                    if matches!(e, BackendError::Unauthorized) {
                        broadcast_unauthorized(&state).await;
                    }
                }
                state.tabs.end_request(tab_id).await;
            });
        }
    }
}

async fn handle_meta(state: &RouterState, tab_id: TabId, cmd: MetaCommand) {
    match cmd.action {
        MetaAction::Login => {
            let url = state.client.login_url();
            if let Err(e) = state.opener.open(&url).await {
                log::error!("opening login page failed: {}", e);
            }
        }
        MetaAction::SetActive => {
            state
                .tabs
                .set_active(tab_id, cmd.active.unwrap_or(false))
                .await;
        }
        // toggle travels gateway -> UI only
        MetaAction::Toggle => {
            log::debug!("tab {}: ignoring toggle from UI", tab_id);
        }
    }
}

/// Handle one question: echo it, install the thinking placeholder, then
/// stream answer events into the store and the tab's connection.
async fn handle_question(
    state: &RouterState,
    tab_id: TabId,
    question: &str,
) -> Result<(), BackendError> {
    let request_id = uuid::Uuid::new_v4().to_string();
    let echo = Outbound::user(uuid::Uuid::new_v4().to_string(), question);
    persist_and_send(state, tab_id, echo).await;
    persist_and_send(state, tab_id, Outbound::thinking(request_id.as_str())).await;

    let mut events = state.client.stream_answer(&request_id, question).await?;
    while let Some(event) = events.recv().await {
        match event {
            AnswerEvent::Delta(value) => {
                persist_and_send(state, tab_id, Outbound::answer(value)).await;
            }
            AnswerEvent::Error(error) => {
                persist_and_send(state, tab_id, Outbound::error(error)).await;
            }
            AnswerEvent::Done => {
                // forwarded but not retained: history ends with the merged answer
                send_to_tab(state, tab_id, Outbound::done()).await;
            }
        }
    }
    Ok(())
}

/// Record a feed message in the tab's history and forward it to the UI.
async fn persist_and_send(state: &RouterState, tab_id: TabId, msg: Outbound) {
    state.tabs.upsert(tab_id, msg.clone()).await;
    send_to_tab(state, tab_id, msg).await;
}

async fn send_to_tab(state: &RouterState, tab_id: TabId, msg: Outbound) {
    if let Some(conn) = state.tabs.connection(tab_id).await {
        // UI may be gone mid-stream; history still advances and replay covers it
        let _ = conn.send(msg).await;
    }
}

/// One tab's auth failure invalidates the shared credential for all tabs:
/// tell every tracked connection.
async fn broadcast_unauthorized(state: &RouterState) {
    for (tab_id, conn) in state.tabs.connections().await {
        if conn.send(Outbound::auth(AuthStatus::Unauthorized)).await.is_err() {
            log::debug!("tab {}: unreachable during unauthorized broadcast", tab_id);
        }
    }
}
