use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;

use cowatch_core::member::{ConnectionId, UserIdentity};
use cowatch_core::net::messages::{
    ServerEvent, VoiceForwardMsg, VoiceIdentity, VoiceMember, VoiceMembersMsg,
    VoiceMuteChangedMsg, VoiceRelayMsg, VoiceStatusMsg, VoiceUserJoinedMsg, VoiceUserLeftMsg,
};

use crate::gateway::Gateway;

/// Which WebRTC negotiation message is being forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    fn wrap(self, msg: VoiceForwardMsg) -> ServerEvent {
        match self {
            Self::Offer => ServerEvent::VoiceOffer(msg),
            Self::Answer => ServerEvent::VoiceAnswer(msg),
            Self::IceCandidate => ServerEvent::VoiceIceCandidate(msg),
        }
    }
}

#[derive(Debug, Clone)]
struct VoicePeer {
    connection_id: ConnectionId,
    identity: VoiceIdentity,
    is_muted: bool,
}

impl VoicePeer {
    fn to_member(&self) -> VoiceMember {
        VoiceMember {
            connection_id: self.connection_id.clone(),
            user_id: self.identity.user_id,
            display_name: self.identity.display_name.clone(),
            is_muted: self.is_muted,
        }
    }
}

/// Voice presence of one room, in join order.
#[derive(Debug, Default)]
struct VoiceRoom {
    peers: Vec<VoicePeer>,
}

impl VoiceRoom {
    fn position(&self, conn: &ConnectionId) -> Option<usize> {
        self.peers.iter().position(|p| &p.connection_id == conn)
    }

    fn status(&self) -> Vec<VoiceMember> {
        self.peers.iter().map(VoicePeer::to_member).collect()
    }

    fn others(&self, conn: &ConnectionId) -> Vec<ConnectionId> {
        self.peers
            .iter()
            .filter(|p| &p.connection_id != conn)
            .map(|p| p.connection_id.clone())
            .collect()
    }
}

#[derive(Default)]
struct Inner {
    rooms: HashMap<String, VoiceRoom>,
    /// Connection -> rooms where it is a voice peer.
    by_conn: HashMap<ConnectionId, HashSet<String>>,
}

impl Inner {
    /// Remove `conn` from `room_code`. Returns the remaining peers and the
    /// aggregate status, or `None` if it was not present.
    fn remove(
        &mut self,
        room_code: &str,
        conn: &ConnectionId,
    ) -> Option<(Vec<ConnectionId>, Vec<VoiceMember>)> {
        let room = self.rooms.get_mut(room_code)?;
        let pos = room.position(conn)?;
        room.peers.remove(pos);
        let remaining = room.others(conn);
        let status = room.status();
        if room.peers.is_empty() {
            self.rooms.remove(room_code);
        }
        if let Some(rooms) = self.by_conn.get_mut(conn) {
            rooms.remove(room_code);
            if rooms.is_empty() {
                self.by_conn.remove(conn);
            }
        }
        Some((remaining, status))
    }
}

/// In-process voice signaling relay.
///
/// Holds only presence metadata; nothing here is persisted, so a restart
/// drops every voice session and clients rejoin.
pub struct VoiceRelay {
    inner: Mutex<Inner>,
    gateway: Arc<Gateway>,
}

impl VoiceRelay {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            gateway,
        }
    }

    /// Add `conn` to the room's voice presence.
    ///
    /// Existing peers are told a newcomer arrived (they send the offers);
    /// the newcomer gets the list of who is already present.
    pub async fn join(&self, room_code: &str, conn: &ConnectionId, user: &UserIdentity) {
        let identity = VoiceIdentity {
            user_id: user.id,
            display_name: user.name.clone(),
        };
        let (existing, already_present, status) = {
            let mut inner = self.inner.lock().await;
            let room = inner.rooms.entry(room_code.to_string()).or_default();
            if let Some(pos) = room.position(conn) {
                room.peers.remove(pos);
            }
            let existing: Vec<VoicePeer> = room.peers.clone();
            room.peers.push(VoicePeer {
                connection_id: conn.clone(),
                identity: identity.clone(),
                is_muted: false,
            });
            let status = room.status();
            inner
                .by_conn
                .entry(conn.clone())
                .or_default()
                .insert(room_code.to_string());
            let already_present: Vec<VoiceMember> =
                existing.iter().map(VoicePeer::to_member).collect();
            (existing, already_present, status)
        };

        let joined = ServerEvent::VoiceUserJoined(VoiceUserJoinedMsg {
            user: identity,
            connection_id: conn.clone(),
        });
        for peer in &existing {
            self.gateway.send_to(&peer.connection_id, &joined).await;
        }
        self.gateway
            .send_to(
                conn,
                &ServerEvent::VoiceMembers(VoiceMembersMsg {
                    members: already_present,
                }),
            )
            .await;
        self.broadcast_status(room_code, status).await;

        tracing::info!(
            room_code,
            connection_id = %conn,
            user_id = %user.id,
            peers = existing.len() + 1,
            "Voice peer joined"
        );
    }

    /// Remove `conn` from one room's voice presence. No-op when absent.
    pub async fn leave(&self, room_code: &str, conn: &ConnectionId) {
        let removed = self.inner.lock().await.remove(room_code, conn);
        let Some((remaining, status)) = removed else {
            return;
        };
        self.announce_departure(room_code, conn, remaining, status)
            .await;
        tracing::info!(room_code, connection_id = %conn, "Voice peer left");
    }

    /// Drop `conn` from every room where it is a voice peer.
    pub async fn remove_connection(&self, conn: &ConnectionId) {
        let departures: Vec<(String, Vec<ConnectionId>, Vec<VoiceMember>)> = {
            let mut inner = self.inner.lock().await;
            let rooms: Vec<String> = inner
                .by_conn
                .get(conn)
                .map(|r| r.iter().cloned().collect())
                .unwrap_or_default();
            rooms
                .into_iter()
                .filter_map(|code| {
                    inner
                        .remove(&code, conn)
                        .map(|(remaining, status)| (code, remaining, status))
                })
                .collect()
        };
        for (code, remaining, status) in departures {
            self.announce_departure(&code, conn, remaining, status)
                .await;
        }
    }

    async fn announce_departure(
        &self,
        room_code: &str,
        conn: &ConnectionId,
        remaining: Vec<ConnectionId>,
        status: Vec<VoiceMember>,
    ) {
        let left = ServerEvent::VoiceUserLeft(VoiceUserLeftMsg {
            connection_id: conn.clone(),
        });
        for peer in &remaining {
            self.gateway.send_to(peer, &left).await;
        }
        self.broadcast_status(room_code, status).await;
    }

    /// Forward an offer, answer or ICE candidate to its target.
    ///
    /// A target that is gone drops the message silently; WebRTC surfaces
    /// the failure to the sender on its own.
    pub async fn relay(&self, kind: SignalKind, from: &ConnectionId, msg: VoiceRelayMsg) {
        let identity = {
            let inner = self.inner.lock().await;
            inner.rooms.get(&msg.room_code).and_then(|room| {
                room.position(from)
                    .map(|pos| room.peers[pos].identity.clone())
            })
        };
        let event = kind.wrap(VoiceForwardMsg {
            payload: msg.payload,
            from_connection_id: from.clone(),
            from: identity,
        });
        tracing::debug!(
            room_code = %msg.room_code,
            connection_id = %from,
            target = %msg.target_socket_id,
            ?kind,
            "Relaying voice signal"
        );
        self.gateway.send_to(&msg.target_socket_id, &event).await;
    }

    /// Update the sender's mute flag. No-op when it is not a voice peer.
    pub async fn mute(&self, room_code: &str, conn: &ConnectionId, is_muted: bool) {
        let changed = {
            let mut inner = self.inner.lock().await;
            inner.rooms.get_mut(room_code).and_then(|room| {
                let pos = room.position(conn)?;
                room.peers[pos].is_muted = is_muted;
                Some((room.others(conn), room.status()))
            })
        };
        let Some((others, status)) = changed else {
            return;
        };
        let event = ServerEvent::VoiceMuteChanged(VoiceMuteChangedMsg {
            connection_id: conn.clone(),
            is_muted,
        });
        for peer in &others {
            self.gateway.send_to(peer, &event).await;
        }
        self.broadcast_status(room_code, status).await;
    }

    /// Whole-room view (voice and non-voice members alike).
    async fn broadcast_status(&self, room_code: &str, voice_members: Vec<VoiceMember>) {
        self.gateway
            .broadcast(
                room_code,
                &ServerEvent::VoiceStatusUpdate(VoiceStatusMsg { voice_members }),
            )
            .await;
    }

    pub async fn status(&self, room_code: &str) -> Vec<VoiceMember> {
        self.inner
            .lock()
            .await
            .rooms
            .get(room_code)
            .map(VoiceRoom::status)
            .unwrap_or_default()
    }

    /// Rooms with at least one voice peer.
    pub async fn active_rooms(&self) -> usize {
        self.inner.lock().await.rooms.len()
    }
}
