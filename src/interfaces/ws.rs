//! Streaming surface: one WebSocket connection per session.
//!
//! Each session has a reader half (client messages, liveness) and a writer
//! task draining the session's outbound queue serially, so no two writes
//! ever race on one socket. Heartbeat pings go out every `heartbeat_seconds`;
//! a client that stays silent past the pong deadline is closed. Two
//! consecutive send failures close the session. All disconnect paths funnel
//! into the registry's idempotent removal.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::subscriptions::{ClientMessage, OutboundQueue, ServerMessage};
use crate::application::system::Application;
use crate::domain::market::types::{Topic, has_known_venue};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app): State<Arc<Application>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, app))
}

async fn handle_session(socket: WebSocket, app: Arc<Application>) {
    let session_id = Uuid::new_v4();
    let queue = app.subscriptions.register(session_id).await;
    let (sender, receiver) = socket.split();
    let last_pong = Arc::new(Mutex::new(Instant::now()));

    let writer = tokio::spawn(write_loop(
        sender,
        Arc::clone(&queue),
        Arc::clone(&last_pong),
        Duration::from_secs(app.config.heartbeat_seconds),
        Duration::from_secs(app.config.heartbeat_timeout_seconds),
        session_id,
    ));

    read_loop(receiver, &app, session_id, &queue, &last_pong).await;

    // Whichever side ended first, removal is safe to repeat.
    app.subscriptions.remove(session_id).await;
    let _ = writer.await;
}

/// Reader half: client messages and liveness bookkeeping.
async fn read_loop(
    mut receiver: SplitStream<WebSocket>,
    app: &Arc<Application>,
    session_id: Uuid,
    queue: &Arc<OutboundQueue>,
    last_pong: &Arc<Mutex<Instant>>,
) {
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Subscribe { symbol, timeframe }) => {
                    if !has_known_venue(&symbol) {
                        warn!(
                            "Session {}: subscribe rejected, bad symbol '{}'",
                            session_id, symbol
                        );
                        continue;
                    }
                    app.subscriptions
                        .subscribe(session_id, Topic::new(symbol, timeframe))
                        .await;
                }
                Ok(ClientMessage::Unsubscribe) => {
                    app.subscriptions.unsubscribe(session_id).await;
                }
                Ok(ClientMessage::Ping) => {
                    *last_pong.lock().expect("liveness lock") = Instant::now();
                    queue.push(ServerMessage::Pong);
                }
                Err(e) => {
                    debug!("Session {}: unparseable message ignored: {}", session_id, e);
                }
            },
            Ok(Message::Pong(_)) => {
                *last_pong.lock().expect("liveness lock") = Instant::now();
            }
            Ok(Message::Ping(_)) => {
                // The underlying protocol layer answers pings; nothing to do.
            }
            Ok(Message::Close(_)) => {
                info!("Session {}: client closed", session_id);
                break;
            }
            Ok(Message::Binary(_)) => {
                debug!("Session {}: binary frame ignored", session_id);
            }
            Err(e) => {
                debug!("Session {}: receive error: {}", session_id, e);
                break;
            }
        }
    }
}

/// Writer half: drains the outbound queue serially and owns the heartbeat.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    queue: Arc<OutboundQueue>,
    last_pong: Arc<Mutex<Instant>>,
    heartbeat_every: Duration,
    pong_deadline: Duration,
    session_id: Uuid,
) {
    let mut heartbeat = interval(heartbeat_every);
    let mut consecutive_failures = 0usize;

    loop {
        tokio::select! {
            maybe_message = queue.next() => {
                let Some(message) = maybe_message else {
                    // Queue closed by removal; say goodbye politely.
                    let _ = sender.send(Message::Close(None)).await;
                    return;
                };
                let payload = match serde_json::to_string(&message) {
                    Ok(payload) => payload,
                    Err(e) => {
                        // Serialization errors are not connection errors.
                        warn!("Session {}: unserializable message: {}", session_id, e);
                        continue;
                    }
                };
                if sender.send(Message::Text(payload.into())).await.is_err() {
                    consecutive_failures += 1;
                    if consecutive_failures >= 2 {
                        warn!(
                            "Session {}: {} consecutive send failures, closing",
                            session_id, consecutive_failures
                        );
                        queue.close();
                        return;
                    }
                } else {
                    consecutive_failures = 0;
                }
            }
            _ = heartbeat.tick() => {
                let stale = last_pong
                    .lock()
                    .expect("liveness lock")
                    .elapsed() > pong_deadline;
                if stale {
                    info!("Session {}: heartbeat timeout, closing", session_id);
                    queue.close();
                    let _ = sender.send(Message::Close(None)).await;
                    return;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    consecutive_failures += 1;
                    if consecutive_failures >= 2 {
                        warn!("Session {}: heartbeat send failed twice, closing", session_id);
                        queue.close();
                        return;
                    }
                }
            }
        }
    }
}
