//! Relay HTTP + WebSocket server (single port).

use crate::config::Config;
use crate::relay::registry::Outbound;
use crate::relay::router::{Connection, Disposition, Relay, CLOSE_GOING_AWAY};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

const SHUTDOWN_REASON: &str = "relay shutting down";

/// Shared state for the relay server.
#[derive(Clone)]
pub struct RelayState {
    pub relay: Arc<Relay>,
    /// Port reported by the health probe.
    pub port: u16,
    /// Fires once when the server is shutting down; every socket task closes its peer.
    pub shutdown_tx: broadcast::Sender<()>,
}

impl RelayState {
    pub fn new(port: u16) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            relay: Arc::new(Relay::new()),
            port,
            shutdown_tx,
        }
    }
}

/// Build the router: `/` serves both the health probe and WebSocket upgrades; `/ws` is an upgrade-only alias.
/// Any other path still upgrades when the request carries WebSocket headers, and is a 404 otherwise.
pub fn build_app(state: RelayState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/ws", get(ws_handler))
        .fallback(fallback_handler)
        .with_state(state)
}

/// Bind from config and serve until SIGINT/SIGTERM.
pub async fn run_relay(config: Config) -> Result<()> {
    let bind_addr = config.relay.bind_addr();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    serve(listener, shutdown_signal()).await
}

/// Serve on an already-bound listener until `shutdown` completes.
pub async fn serve<F>(listener: TcpListener, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local = listener.local_addr().context("reading listener address")?;
    let state = RelayState::new(local.port());
    let relay = state.relay.clone();
    let shutdown_tx = state.shutdown_tx.clone();
    let app = build_app(state);

    log::info!("relay listening on ws://{}", local);
    log::info!("waiting for connections...");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.await;
        log::info!("shutdown signal received, closing relay connections");
        let _ = shutdown_tx.send(());
        relay.shutdown(SHUTDOWN_REASON).await;
    })
    .await
    .context("relay server exited")?;
    log::info!("relay stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// GET / upgrades when the request carries WebSocket headers; otherwise returns health JSON.
async fn root_handler(
    State(state): State<RelayState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    match ws {
        Some(ws) => ws
            .on_upgrade(move |socket| handle_socket(socket, addr, state))
            .into_response(),
        None => health_http(state).await.into_response(),
    }
}

/// GET /ws always upgrades.
async fn ws_handler(
    State(state): State<RelayState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state))
}

/// Upgrade on any path; plain HTTP requests to unknown paths get 404.
async fn fallback_handler(
    State(state): State<RelayState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    match ws {
        Some(ws) => ws
            .on_upgrade(move |socket| handle_socket(socket, addr, state))
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn health_http(state: RelayState) -> Json<serde_json::Value> {
    let status = state.relay.status().await;
    Json(json!({
        "runtime": "running",
        "port": state.port,
        "clients": status,
    }))
}

fn to_message(frame: Outbound) -> Message {
    match frame {
        Outbound::Text(text) => Message::Text(text),
        Outbound::Close { code, reason } => Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })),
    }
}

async fn handle_socket(socket: WebSocket, addr: SocketAddr, state: RelayState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let mut conn = Connection::new(addr, tx.clone());
    let relay = state.relay.clone();
    relay.on_connect(&conn);

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let closing = matches!(frame, Outbound::Close { .. });
            if let Err(e) = sink.send(to_message(frame)).await {
                log::debug!("send to {} failed: {}", addr, e);
                break;
            }
            if closing {
                break;
            }
        }
    });

    let mut shutdown_rx = state.shutdown_tx.subscribe();
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                let _ = tx.send(Outbound::Close {
                    code: CLOSE_GOING_AWAY,
                    reason: SHUTDOWN_REASON.to_string(),
                });
                break;
            }
            msg = stream.next() => {
                let disposition = match msg {
                    None => break,
                    Some(Err(e)) => {
                        relay.on_error(&conn, &e);
                        break;
                    }
                    Some(Ok(Message::Text(text))) => relay.on_message(&mut conn, &text).await,
                    Some(Ok(Message::Binary(bytes))) => relay.on_binary(&mut conn, &bytes).await,
                    Some(Ok(Message::Close(_))) => break,
                    // Ping/pong are answered by the transport.
                    Some(Ok(_)) => Disposition::Continue,
                };
                if disposition == Disposition::Close {
                    break;
                }
            }
        }
    }

    relay.on_disconnect(&mut conn).await;
    drop(conn);
    drop(tx);
    let _ = writer.await;
}
