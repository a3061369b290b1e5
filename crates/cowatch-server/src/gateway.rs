use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use tokio::sync::{RwLock, mpsc};

use cowatch_core::member::ConnectionId;
use cowatch_core::net::messages::ServerEvent;
use cowatch_core::net::protocol::encode_server_event;

/// Outbound channel to a connection's writer task.
///
/// Carries encoded JSON text frames; `Bytes` keeps broadcast fan-out cheap.
pub type ConnectionSender = mpsc::Sender<Bytes>;

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, ConnectionSender>,
    /// Room code -> connections subscribed to that room's broadcasts.
    groups: HashMap<String, HashSet<ConnectionId>>,
    /// Connections that asked for lobby updates.
    lobby: HashSet<ConnectionId>,
    /// Connection -> room codes it joined. Drives disconnect cleanup.
    rooms_by_conn: HashMap<ConnectionId, HashSet<String>>,
}

/// Registry of live connections on this process and their broadcast groups.
///
/// Groups are local to the process: a broadcast reaches only connections
/// attached here.
#[derive(Default)]
pub struct Gateway {
    inner: RwLock<Inner>,
}

fn encode(event: &ServerEvent) -> Option<Bytes> {
    match encode_server_event(event) {
        Ok(text) => Some(Bytes::from(text)),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode server event");
            None
        },
    }
}

fn try_deliver(conn: &ConnectionId, sender: &ConnectionSender, data: Bytes) {
    if let Err(e) = sender.try_send(data) {
        tracing::debug!(
            connection_id = %conn, error = %e,
            "Skipping send to slow or closed client"
        );
    }
}

impl Gateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, conn: ConnectionId, sender: ConnectionSender) {
        self.inner.write().await.connections.insert(conn, sender);
    }

    /// Forget a connection everywhere. Returns the rooms it had joined.
    pub async fn unregister(&self, conn: &ConnectionId) -> Vec<String> {
        let mut inner = self.inner.write().await;
        inner.connections.remove(conn);
        inner.lobby.remove(conn);
        let rooms = inner.rooms_by_conn.remove(conn).unwrap_or_default();
        for code in &rooms {
            if let Some(group) = inner.groups.get_mut(code) {
                group.remove(conn);
                if group.is_empty() {
                    inner.groups.remove(code);
                }
            }
        }
        let mut rooms: Vec<String> = rooms.into_iter().collect();
        rooms.sort();
        rooms
    }

    /// Idempotent.
    pub async fn join_group(&self, conn: &ConnectionId, room_code: &str) {
        let mut inner = self.inner.write().await;
        if !inner.connections.contains_key(conn) {
            return;
        }
        inner
            .groups
            .entry(room_code.to_string())
            .or_default()
            .insert(conn.clone());
        inner
            .rooms_by_conn
            .entry(conn.clone())
            .or_default()
            .insert(room_code.to_string());
    }

    pub async fn leave_group(&self, conn: &ConnectionId, room_code: &str) {
        let mut inner = self.inner.write().await;
        if let Some(group) = inner.groups.get_mut(room_code) {
            group.remove(conn);
            if group.is_empty() {
                inner.groups.remove(room_code);
            }
        }
        if let Some(rooms) = inner.rooms_by_conn.get_mut(conn) {
            rooms.remove(room_code);
            if rooms.is_empty() {
                inner.rooms_by_conn.remove(conn);
            }
        }
    }

    pub async fn join_lobby(&self, conn: &ConnectionId) {
        let mut inner = self.inner.write().await;
        if inner.connections.contains_key(conn) {
            inner.lobby.insert(conn.clone());
        }
    }

    /// Rooms a connection is currently grouped into.
    pub async fn rooms_of(&self, conn: &ConnectionId) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut rooms: Vec<String> = inner
            .rooms_by_conn
            .get(conn)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Server -> one. Unknown targets are dropped silently.
    pub async fn send_to(&self, conn: &ConnectionId, event: &ServerEvent) {
        let Some(data) = encode(event) else { return };
        let inner = self.inner.read().await;
        match inner.connections.get(conn) {
            Some(sender) => try_deliver(conn, sender, data),
            None => tracing::debug!(connection_id = %conn, "Send target not connected"),
        }
    }

    /// Server -> every member of a room group.
    pub async fn broadcast(&self, room_code: &str, event: &ServerEvent) {
        self.broadcast_filtered(room_code, None, event).await;
    }

    /// Server -> every member of a room group except `exclude`.
    pub async fn broadcast_except(
        &self,
        room_code: &str,
        exclude: &ConnectionId,
        event: &ServerEvent,
    ) {
        self.broadcast_filtered(room_code, Some(exclude), event)
            .await;
    }

    async fn broadcast_filtered(
        &self,
        room_code: &str,
        exclude: Option<&ConnectionId>,
        event: &ServerEvent,
    ) {
        let inner = self.inner.read().await;
        let Some(group) = inner.groups.get(room_code) else {
            return;
        };
        let Some(data) = encode(event) else { return };
        for conn in group {
            if Some(conn) == exclude {
                continue;
            }
            if let Some(sender) = inner.connections.get(conn) {
                try_deliver(conn, sender, data.clone());
            }
        }
    }

    /// Server -> every lobby subscriber.
    pub async fn broadcast_lobby(&self, event: &ServerEvent) {
        let inner = self.inner.read().await;
        if inner.lobby.is_empty() {
            return;
        }
        let Some(data) = encode(event) else { return };
        for conn in &inner.lobby {
            if let Some(sender) = inner.connections.get(conn) {
                try_deliver(conn, sender, data.clone());
            }
        }
    }

    pub async fn lobby_count(&self) -> usize {
        self.inner.read().await.lobby.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cowatch_core::net::protocol::decode_server_event;

    fn conn(id: &str) -> (ConnectionId, mpsc::Receiver<Bytes>, ConnectionSender) {
        let (tx, rx) = mpsc::channel(8);
        (ConnectionId::from(id), rx, tx)
    }

    fn recv(rx: &mut mpsc::Receiver<Bytes>) -> Option<ServerEvent> {
        rx.try_recv().ok().map(|data| {
            let text = std::str::from_utf8(&data).unwrap();
            decode_server_event(text).unwrap()
        })
    }

    #[tokio::test]
    async fn broadcast_reaches_group_only() {
        let gw = Gateway::new();
        let (a, mut rx_a, tx_a) = conn("a");
        let (b, mut rx_b, tx_b) = conn("b");
        let (c, mut rx_c, tx_c) = conn("c");
        gw.register(a.clone(), tx_a).await;
        gw.register(b.clone(), tx_b).await;
        gw.register(c.clone(), tx_c).await;
        gw.join_group(&a, "1").await;
        gw.join_group(&b, "1").await;
        gw.join_group(&c, "2").await;

        gw.broadcast("1", &ServerEvent::OnlineCount(1)).await;
        assert_eq!(recv(&mut rx_a), Some(ServerEvent::OnlineCount(1)));
        assert_eq!(recv(&mut rx_b), Some(ServerEvent::OnlineCount(1)));
        assert_eq!(recv(&mut rx_c), None);

        gw.broadcast_except("1", &a, &ServerEvent::OnlineCount(2))
            .await;
        assert_eq!(recv(&mut rx_a), None);
        assert_eq!(recv(&mut rx_b), Some(ServerEvent::OnlineCount(2)));
    }

    #[tokio::test]
    async fn side_index_tracks_joins_and_leaves() {
        let gw = Gateway::new();
        let (a, _rx, tx) = conn("a");
        gw.register(a.clone(), tx).await;
        gw.join_group(&a, "2").await;
        gw.join_group(&a, "1").await;
        gw.join_group(&a, "1").await;
        gw.join_lobby(&a).await;
        assert_eq!(gw.rooms_of(&a).await, vec!["1", "2"]);

        gw.leave_group(&a, "2").await;
        assert_eq!(gw.rooms_of(&a).await, vec!["1"]);

        // lobby is not a room
        assert_eq!(gw.unregister(&a).await, vec!["1"]);
        assert!(gw.rooms_of(&a).await.is_empty());
        assert_eq!(gw.connection_count().await, 0);
        assert_eq!(gw.lobby_count().await, 0);
    }

    #[tokio::test]
    async fn full_channel_drops_for_that_client_only() {
        let gw = Gateway::new();
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (b, mut rx_b, tx_b) = conn("b");
        let slow = ConnectionId::from("slow");
        gw.register(slow.clone(), slow_tx).await;
        gw.register(b.clone(), tx_b).await;
        gw.join_group(&slow, "1").await;
        gw.join_group(&b, "1").await;

        gw.broadcast("1", &ServerEvent::OnlineCount(1)).await;
        gw.broadcast("1", &ServerEvent::OnlineCount(2)).await;
        assert_eq!(recv(&mut slow_rx), Some(ServerEvent::OnlineCount(1)));
        assert_eq!(recv(&mut slow_rx), None);
        assert_eq!(recv(&mut rx_b), Some(ServerEvent::OnlineCount(1)));
        assert_eq!(recv(&mut rx_b), Some(ServerEvent::OnlineCount(2)));
    }

    #[tokio::test]
    async fn unknown_connection_cannot_join() {
        let gw = Gateway::new();
        let ghost = ConnectionId::from("ghost");
        gw.join_group(&ghost, "1").await;
        gw.join_lobby(&ghost).await;
        assert!(gw.rooms_of(&ghost).await.is_empty());
        assert_eq!(gw.lobby_count().await, 0);
        // dropped silently
        gw.send_to(&ghost, &ServerEvent::OnlineCount(0)).await;
    }
}
