//! WebSocket upgrade endpoints and the per-connection socket loop.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{
        ConnectInfo, Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};

use crate::{
    domain::{ClientKey, Connection, EndpointClass, Identity, RoomId},
    ui::{
        handler::admission::{AdmissionError, client_key},
        state::AppState,
    },
    usecase::{CREDENTIAL_PROTOCOL, CredentialSource, RelayRoomHandler, RoomHandler},
};

/// `?roomId=` on endpoints without a path segment.
#[derive(Debug, Default, Deserialize)]
pub struct RoomQuery {
    #[serde(rename = "roomId")]
    pub room_id: Option<String>,
}

/// Primary relay, room taken from the path.
pub async fn yjs_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AdmissionError> {
    let handler = state.primary.clone();
    upgrade(ws, state, handler, peer, headers, room_id).await
}

/// Primary relay, room taken from `?roomId=`.
pub async fn yjs_query_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<RoomQuery>,
    headers: HeaderMap,
) -> Result<Response, AdmissionError> {
    let handler = state.primary.clone();
    let room_id = query.room_id.unwrap_or_default();
    upgrade(ws, state, handler, peer, headers, room_id).await
}

/// Editor-event relay through the event log.
pub async fn editor_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<RoomQuery>,
    headers: HeaderMap,
) -> Result<Response, AdmissionError> {
    let handler = state.legacy.clone();
    let room_id = query.room_id.unwrap_or_default();
    upgrade(ws, state, handler, peer, headers, room_id).await
}

/// Run handshake admission and, if it passes, upgrade.
///
/// Nothing is registered before the upgrade completes, so a rejected
/// handshake leaves no state behind.
async fn upgrade(
    ws: WebSocketUpgrade,
    state: Arc<AppState>,
    handler: Arc<RelayRoomHandler>,
    peer: SocketAddr,
    headers: HeaderMap,
    room_id: String,
) -> Result<Response, AdmissionError> {
    let room_id = RoomId::new(room_id).inspect_err(|e| {
        tracing::warn!(reason = "invalid_room", "Handshake rejected: {}", e);
    })?;

    let origin = header_str(&headers, header::ORIGIN);
    let credentials = CredentialSource::from_headers(
        header_str(&headers, header::SEC_WEBSOCKET_PROTOCOL),
        header_str(&headers, header::COOKIE),
        &state.config.cookie_name,
    );
    let identity = state.authenticator.authenticate(origin, &credentials).await?;

    let key = client_key(&headers, peer, state.config.trust_forwarded_for);
    let origin = origin.map(str::to_string);

    Ok(ws
        .protocols([CREDENTIAL_PROTOCOL])
        .on_upgrade(move |socket| {
            handle_socket(socket, state, handler, room_id, identity, origin, key)
        })
        .into_response())
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Forward queued frames to the socket until the queue closes or a write
/// fails.
fn pusher_loop(
    mut rx: mpsc::UnboundedReceiver<String>,
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if let Err(e) = sender.send(Message::Text(payload.into())).await {
                tracing::warn!("Failed to write to socket: {}", e);
                break;
            }
        }
        let _ = sender.close().await;
    })
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    handler: Arc<RelayRoomHandler>,
    room_id: RoomId,
    identity: Identity,
    origin: Option<String>,
    key: ClientKey,
) {
    let (sender, mut receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let connection = Connection::new(room_id, identity, origin, key, state.clock.now_millis(), tx);

    handler.on_open(&connection).await;

    let recv_connection = connection.clone();
    let recv_handler = handler.clone();
    let governor = state.governor.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(connection_id = %recv_connection.id(), "Socket error: {}", e);
                    break;
                }
            };

            match frame {
                Message::Text(text) => {
                    if governor.check(key, EndpointClass::Message).is_err() {
                        tracing::debug!(
                            connection_id = %recv_connection.id(),
                            client = %key,
                            "Dropped rate-limited frame"
                        );
                        continue;
                    }
                    recv_handler
                        .on_message(&recv_connection, text.to_string())
                        .await;
                }
                Message::Binary(_) => {
                    tracing::debug!(connection_id = %recv_connection.id(), "Dropped binary frame");
                }
                Message::Close(_) => break,
                // ping/pong is answered by the protocol layer
                _ => {}
            }
        }
    });

    let mut send_task = pusher_loop(rx, sender);

    tokio::select! {
        _ = &mut recv_task => send_task.abort(),
        _ = &mut send_task => recv_task.abort(),
        _ = stopped(state.shutdown.clone()) => {
            recv_task.abort();
            send_task.abort();
        }
    };

    handler.on_close(&connection).await;
}

/// Resolves once the server starts shutting down.
async fn stopped(mut shutdown: watch::Receiver<bool>) {
    loop {
        let stopping = *shutdown.borrow_and_update();
        if stopping || shutdown.changed().await.is_err() {
            return;
        }
    }
}
