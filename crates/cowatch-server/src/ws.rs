use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::extract::ConnectInfo;
use axum::extract::FromRequest;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use cowatch_core::member::ConnectionId;
use cowatch_core::net::messages::{ClientEvent, ErrorMsg, ServerEvent, error_code};
use cowatch_core::net::protocol::decode_client_event;

use crate::state::{AppState, ConnectionGuard, IpConnectionGuard};
use crate::voice::SignalKind;

pub async fn ws_handler(
    State(state): State<AppState>,
    request: axum::extract::Request,
) -> Result<axum::response::Response, StatusCode> {
    let max_ws = state.config.limits.max_ws_connections;
    let current = state.ws_connection_count.load(Ordering::Relaxed);
    if current >= max_ws {
        tracing::warn!(current, max = max_ws, "WS connection limit reached");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    // Per-IP connection limit
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
    let max_per_ip = state.config.limits.max_ws_per_ip;
    let Some(ip_guard) =
        IpConnectionGuard::try_acquire(ip, Arc::clone(&state.ws_per_ip), max_per_ip)
    else {
        tracing::warn!(%ip, max_per_ip, "Per-IP WS connection limit reached");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    };

    let ws = WebSocketUpgrade::from_request(request, &state)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    // Frames past the transport cap close the socket; frames between the
    // two caps are rejected one at a time by the read loop.
    let transport_cap = state.config.limits.max_message_bytes.saturating_mul(4);
    Ok(ws
        .max_message_size(transport_cap)
        .on_upgrade(move |socket| handle_socket(socket, state, ip_guard))
        .into_response())
}

async fn handle_socket(socket: WebSocket, state: AppState, _ip_guard: IpConnectionGuard) {
    let _guard = ConnectionGuard::new(Arc::clone(&state.ws_connection_count));
    let conn = ConnectionId::from(uuid::Uuid::new_v4().to_string());
    let (ws_sender, mut ws_receiver) = socket.split();

    let (tx, rx) = mpsc::channel::<Bytes>(state.config.limits.connection_message_buffer);
    state.gateway.register(conn.clone(), tx).await;
    spawn_writer(ws_sender, rx);

    tracing::info!(connection_id = %conn, "Client connected");
    state.lobby.broadcast_online_count().await;

    read_loop(&mut ws_receiver, &state, &conn).await;

    // Unregisters from the gateway, which also ends the writer task.
    state.sessions.disconnect(&conn).await;
    state.lobby.broadcast_online_count().await;

    tracing::info!(connection_id = %conn, "Client disconnected");
}

fn spawn_writer(
    mut ws_sender: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Bytes>,
) {
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            let Ok(text) = String::from_utf8(data.to_vec()) else {
                continue;
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });
}

/// Per-connection rate limiter (token bucket).
struct RateLimiter {
    tokens: f64,
    last_refill: tokio::time::Instant,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
}

impl RateLimiter {
    fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            tokens: max_tokens,
            last_refill: tokio::time::Instant::now(),
            max_tokens,
            refill_rate,
        }
    }

    /// Returns true if the message is allowed; false if rate-limited.
    fn allow(&mut self) -> bool {
        let now = tokio::time::Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

async fn send_error(state: &AppState, conn: &ConnectionId, error: ErrorMsg) {
    state
        .gateway
        .send_to(conn, &ServerEvent::Error(error))
        .await;
}

async fn read_loop(
    ws_receiver: &mut futures::stream::SplitStream<WebSocket>,
    state: &AppState,
    conn: &ConnectionId,
) {
    let rate = state.config.limits.ws_rate_limit_per_sec;
    let max_bytes = state.config.limits.max_message_bytes;
    let mut rate_limiter = RateLimiter::new(rate, rate);

    while let Some(Ok(msg)) = ws_receiver.next().await {
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };

        // Rate limit: drop messages that exceed per-connection rate
        if !rate_limiter.allow() {
            tracing::warn!(connection_id = %conn, "Rate limited");
            continue;
        }

        let event = match decode_client_event(text.as_str(), max_bytes) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(connection_id = %conn, error = %e, "Dropping bad frame");
                send_error(
                    state,
                    conn,
                    ErrorMsg {
                        code: error_code::BAD_REQUEST.to_string(),
                        message: e.to_string(),
                    },
                )
                .await;
                continue;
            },
        };

        dispatch(state, conn, event).await;
    }
}

/// Route one client event. Events from a single connection are handled
/// strictly in arrival order.
async fn dispatch(state: &AppState, conn: &ConnectionId, event: ClientEvent) {
    tracing::debug!(connection_id = %conn, event = event.name(), "Client event");
    match event {
        ClientEvent::JoinLobby => {
            state.gateway.join_lobby(conn).await;
            state.lobby.broadcast_to_lobby().await;
        },
        ClientEvent::JoinRoom(m) => {
            if let Err(e) = state
                .sessions
                .join(&m.room_code, &m.user, conn, m.create)
                .await
            {
                tracing::info!(
                    room_code = %m.room_code,
                    connection_id = %conn,
                    user_id = %m.user.id,
                    error = %e,
                    "Join rejected"
                );
                send_error(state, conn, e.to_error_msg()).await;
            }
        },
        ClientEvent::LeaveRoom(m) => {
            if let Err(e) = state.sessions.leave(&m.room_code, m.user_id, conn).await {
                tracing::warn!(
                    room_code = %m.room_code,
                    connection_id = %conn,
                    error = %e,
                    "Leave failed"
                );
                send_error(state, conn, e.to_error_msg()).await;
            }
        },
        ClientEvent::SyncVideo(m) => {
            if let Err(e) = state.sync.sync_video(&m.room_code, m.state, conn).await {
                tracing::warn!(
                    room_code = %m.room_code,
                    connection_id = %conn,
                    error = %e,
                    "sync-video dropped"
                );
            }
        },
        ClientEvent::RespondSync(m) => {
            state.sync.respond_sync(&m.requester_id, m.state).await;
        },
        ClientEvent::VoiceJoin(m) => {
            state.voice.join(&m.room_code, conn, &m.user).await;
        },
        ClientEvent::VoiceLeave(m) => {
            state.voice.leave(&m.room_code, conn).await;
        },
        ClientEvent::VoiceOffer(m) => {
            state.voice.relay(SignalKind::Offer, conn, m).await;
        },
        ClientEvent::VoiceAnswer(m) => {
            state.voice.relay(SignalKind::Answer, conn, m).await;
        },
        ClientEvent::VoiceIceCandidate(m) => {
            state.voice.relay(SignalKind::IceCandidate, conn, m).await;
        },
        ClientEvent::VoiceMute(m) => {
            state.voice.mute(&m.room_code, conn, m.is_muted).await;
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limiter_drains_then_refills() {
        let mut limiter = RateLimiter::new(3.0, 100.0);
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(limiter.allow());
    }

    #[tokio::test]
    async fn rate_limiter_without_refill_stays_empty() {
        let mut limiter = RateLimiter::new(1.0, 0.0);
        assert!(limiter.allow());
        assert!(!limiter.allow());
        assert!(!limiter.allow());
    }
}
