use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use cowatch_core::member::{ConnectionId, UserId};
use cowatch_core::net::messages::{ClientEvent, JoinRoomMsg, ServerEvent};
use cowatch_core::net::protocol::{decode_server_event, encode_client_event};
use cowatch_core::room::RoomSnapshot;
use cowatch_core::test_helpers::make_user;

use cowatch_server::config::ServerConfig;
use cowatch_server::state::AppState;
use cowatch_server::store::{MemoryStore, SharedRepository};
use cowatch_server::{build_app_with_store, spawn_lobby_refresher};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    _shutdown: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server on an in-memory store with default config.
    pub async fn new() -> Self {
        Self::from_config(ServerConfig::default()).await
    }

    pub async fn from_config(config: ServerConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new())).await
    }

    /// Start a test server on a caller-supplied store.
    pub async fn with_store(config: ServerConfig, store: SharedRepository) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, state) = build_app_with_store(config, store);
        spawn_lobby_refresher(&state);

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            state,
            _shutdown: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// Connect a WebSocket client to the given URL.
pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

/// Send a client event as a JSON text frame.
pub async fn ws_send(stream: &mut WsStream, event: &ClientEvent) {
    let text = encode_client_event(event).unwrap();
    stream.send(Message::Text(text.into())).await.unwrap();
}

/// Send a raw text frame.
pub async fn ws_send_raw(stream: &mut WsStream, text: &str) {
    stream.send(Message::Text(text.into())).await.unwrap();
}

/// Read the next server event (5s timeout).
pub async fn ws_read(stream: &mut WsStream) -> ServerEvent {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, next_event(stream))
        .await
        .expect("Timed out waiting for WebSocket message")
}

/// Try to read a server event, returning None on timeout.
pub async fn ws_try_read(stream: &mut WsStream, timeout_ms: u64) -> Option<ServerEvent> {
    tokio::time::timeout(Duration::from_millis(timeout_ms), next_event(stream))
        .await
        .ok()
}

/// Read events until one matches `pred` (5s timeout overall).
pub async fn ws_expect<F>(stream: &mut WsStream, mut pred: F) -> ServerEvent
where
    F: FnMut(&ServerEvent) -> bool,
{
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            let event = next_event(stream).await;
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("Timed out waiting for expected event")
}

/// Collect every event that arrives within `window_ms`.
pub async fn ws_collect(stream: &mut WsStream, window_ms: u64) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Some(event) = ws_try_read(stream, window_ms).await {
        events.push(event);
    }
    events
}

async fn next_event(stream: &mut WsStream) -> ServerEvent {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return decode_server_event(text.as_str()).unwrap(),
            Some(Ok(Message::Close(_))) => panic!("WebSocket closed unexpectedly"),
            Some(Err(e)) => panic!("WebSocket error: {e}"),
            None => panic!("WebSocket stream ended"),
            _ => continue,
        }
    }
}

/// Send `join-room` and wait for the resulting `room-update`.
pub async fn ws_join_room(
    stream: &mut WsStream,
    room_code: &str,
    user_id: i64,
    name: &str,
    create: bool,
) -> RoomSnapshot {
    ws_send(
        stream,
        &ClientEvent::JoinRoom(JoinRoomMsg {
            room_code: room_code.to_string(),
            user: make_user(user_id, name),
            create,
        }),
    )
    .await;
    match ws_expect(stream, |e| {
        matches!(e, ServerEvent::RoomUpdate(s) if s.members.iter().any(|m| m.id == UserId(user_id)))
    })
    .await
    {
        ServerEvent::RoomUpdate(snapshot) => snapshot,
        other => panic!("Expected RoomUpdate, got: {other:?}"),
    }
}

/// Connection id the server assigned to `user_id`, as seen in a snapshot.
pub fn connection_of(snapshot: &RoomSnapshot, user_id: i64) -> ConnectionId {
    snapshot
        .members
        .iter()
        .find(|m| m.id == UserId(user_id))
        .map(|m| m.connection_id.clone())
        .unwrap()
}
