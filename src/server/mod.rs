//! Websocket transport for the distribution hub.
//!
//! `GET /ws` upgrades an authenticated request and wires the connection to
//! a hub subscriber; `GET /health` reports hub occupancy.

use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{future, SinkExt, StreamExt};
use serde_json::json;

use crate::app::{FlowError, Result};
use crate::domain::AccountId;
use crate::hub::{inbound_pump, outbound_pump, Frame, HubHandle};

/// Resolves the account behind a connection request.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, headers: &HeaderMap) -> Option<AccountId>;
}

/// Trusts an account id header injected by an authenticating reverse proxy.
pub struct HeaderAuthenticator {
    header: HeaderName,
}

impl HeaderAuthenticator {
    pub fn new(header: &str) -> Result<Self> {
        let header = HeaderName::from_bytes(header.trim().as_bytes())
            .map_err(|e| FlowError::Config(format!("invalid account header {header:?}: {e}")))?;
        Ok(Self { header })
    }
}

impl Authenticator for HeaderAuthenticator {
    fn authenticate(&self, headers: &HeaderMap) -> Option<AccountId> {
        headers
            .get(&self.header)?
            .to_str()
            .ok()?
            .trim()
            .parse::<i64>()
            .ok()
            .map(AccountId)
    }
}

#[derive(Clone)]
pub struct ServerState {
    hub: HubHandle,
    auth: Arc<dyn Authenticator>,
}

impl ServerState {
    pub fn new(hub: HubHandle, auth: Arc<dyn Authenticator>) -> Self {
        Self { hub, auth }
    }
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(state)
}

async fn health(State(state): State<ServerState>) -> Response {
    match state.hub.snapshot().await {
        Ok(snapshot) => Json(json!({
            "status": "ok",
            "accounts": snapshot.accounts,
            "subscribers": snapshot.subscribers,
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable", "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn ws_upgrade(
    State(state): State<ServerState>,
    headers: HeaderMap,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(account) = state.auth.authenticate(&headers) else {
        tracing::debug!("Websocket connection rejected: no account");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    ws.on_upgrade(move |socket| attach(socket, state.hub, account))
}

/// Registers the connection with the hub and runs both pumps until it ends.
async fn attach(socket: WebSocket, hub: HubHandle, account: AccountId) {
    let conn = match hub.connect(account).await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!(%account, error = %e, "Could not register connection");
            return;
        }
    };
    tracing::info!(%account, subscriber = %conn.id, "Websocket connected");

    let (sink, stream) = socket.split();
    let sink = sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(Message::from(frame))));
    let stream = stream.map(|message| message.map(Frame::from));

    let outbound = tokio::spawn(outbound_pump(sink, conn.mailbox));
    inbound_pump(stream, hub, account, conn.id).await;

    if let Err(e) = outbound.await {
        tracing::error!(%account, error = %e, "Outbound pump panicked");
    }
    tracing::info!(%account, subscriber = %conn.id, "Websocket disconnected");
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data.into()),
            Frame::Ping(data) => Message::Ping(data.into()),
            Frame::Pong(data) => Message::Pong(data.into()),
            Frame::Close => Message::Close(None),
        }
    }
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Frame::Text(text.as_str().to_owned()),
            Message::Binary(data) => Frame::Binary(data.to_vec()),
            Message::Ping(data) => Frame::Ping(data.to_vec()),
            Message::Pong(data) => Frame::Pong(data.to_vec()),
            Message::Close(_) => Frame::Close,
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to register SIGTERM handler");
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
