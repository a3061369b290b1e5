use std::sync::Arc;
use std::time::Duration;

use cowatch_core::member::{ConnectionId, Member, Roster, UserId, UserIdentity};
use cowatch_core::net::messages::{RequestSyncMsg, ServerEvent, SystemMessageMsg};
use cowatch_core::room::{RoomSnapshot, RoomState, is_valid_room_code};
use cowatch_core::time::now_millis;

use crate::error::SessionError;
use crate::gateway::Gateway;
use crate::lobby::LobbyAggregator;
use crate::room_locks::RoomLocks;
use crate::store::{
    ACTIVE_ROOMS_KEY, SharedRepository, StoreError, StoreResult, members_key, room_key,
};
use crate::voice::VoiceRelay;

/// Which roster entry a removal targets.
#[derive(Debug, Clone)]
enum Departure<'a> {
    /// Explicit `leave-room` by user id.
    User(UserId),
    /// Transport went away.
    Connection(&'a ConnectionId),
}

/// What a removal did to the room.
#[derive(Debug, Clone, PartialEq)]
pub enum LeaveOutcome {
    /// The departing member was not in the roster.
    NotMember,
    /// Last member left; state, roster and registry entry are gone.
    RoomDeleted,
    /// Members remain; `new_host` is set when the host changed.
    Remaining {
        members: Vec<Member>,
        new_host: Option<UserId>,
    },
}

/// Join, leave and disconnect handling for rooms.
pub struct SessionManager {
    store: SharedRepository,
    gateway: Arc<Gateway>,
    locks: Arc<RoomLocks>,
    voice: Arc<VoiceRelay>,
    lobby: Arc<LobbyAggregator>,
    room_ttl: Duration,
}

pub(crate) fn encode_member(member: &Member) -> StoreResult<String> {
    serde_json::to_string(member).map_err(|_| StoreError::Corrupt {
        key: "member".to_string(),
    })
}

pub(crate) fn encode_state(state: &RoomState) -> StoreResult<String> {
    serde_json::to_string(state).map_err(|_| StoreError::Corrupt {
        key: "room state".to_string(),
    })
}

/// Read and parse `room:{code}`. Unparseable state reads as absent.
pub(crate) async fn load_state(
    store: &SharedRepository,
    room_code: &str,
) -> StoreResult<Option<RoomState>> {
    let Some(raw) = store.get(&room_key(room_code)).await? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(state) => Ok(Some(state)),
        Err(e) => {
            tracing::warn!(room_code, error = %e, "Discarding unreadable room state");
            Ok(None)
        },
    }
}

async fn load_roster(store: &SharedRepository, room_code: &str) -> StoreResult<Roster> {
    let raw = store.lrange_all(&members_key(room_code)).await?;
    let roster = Roster::parse(&raw);
    if !roster.skipped.is_empty() {
        tracing::warn!(
            room_code,
            skipped = ?roster.skipped,
            "Skipping malformed roster entries"
        );
    }
    Ok(roster)
}

impl SessionManager {
    pub fn new(
        store: SharedRepository,
        gateway: Arc<Gateway>,
        locks: Arc<RoomLocks>,
        voice: Arc<VoiceRelay>,
        lobby: Arc<LobbyAggregator>,
        room_ttl: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            locks,
            voice,
            lobby,
            room_ttl,
        }
    }

    async fn save_state(&self, room_code: &str, state: &RoomState) -> StoreResult<()> {
        self.store
            .set_ex(&room_key(room_code), &encode_state(state)?, self.room_ttl)
            .await
    }

    /// Add `conn` (as `user`) to a room, creating it when `create` is set.
    ///
    /// Re-joining with the same user id only swaps the connection id in
    /// place. The room is sent a fresh `room-update`, and a non-host joiner
    /// triggers a `request-sync` to the host.
    pub async fn join(
        &self,
        room_code: &str,
        user: &UserIdentity,
        conn: &ConnectionId,
        create: bool,
    ) -> Result<RoomSnapshot, SessionError> {
        if !is_valid_room_code(room_code) {
            return Err(SessionError::InvalidRoomCode);
        }
        let _lock = self.locks.lock(room_code).await;

        let exists = self.store.exists(&room_key(room_code)).await?;
        if !create && !exists {
            return Err(SessionError::RoomNotFound {
                room_code: room_code.to_string(),
            });
        }

        self.gateway.join_group(conn, room_code).await;

        let roster = load_roster(&self.store, room_code).await?;
        let mut members = roster.members();
        match roster.find_user(user.id) {
            Some(entry) => {
                let mut updated = entry.member.clone();
                updated.connection_id = conn.clone();
                self.store
                    .lset(
                        &members_key(room_code),
                        entry.index,
                        &encode_member(&updated)?,
                    )
                    .await?;
                if let Some(slot) = members.iter_mut().find(|m| m.id == user.id) {
                    *slot = updated;
                }
                tracing::debug!(room_code, user_id = %user.id, "Updated member connection");
            },
            None => {
                let member = Member::new(user, conn.clone());
                self.store
                    .rpush(&members_key(room_code), &encode_member(&member)?)
                    .await?;
                members.push(member);
            },
        }

        let state = match load_state(&self.store, room_code).await? {
            None => {
                let state = RoomState::new(user.id, now_millis());
                self.save_state(room_code, &state).await?;
                self.store.sadd(ACTIVE_ROOMS_KEY, room_code).await?;
                tracing::info!(room_code, user_id = %user.id, "Room created");
                state
            },
            Some(mut state) => {
                if !members.iter().any(|m| m.id == state.host_id)
                    && let Some(first) = members.first()
                {
                    tracing::info!(
                        room_code,
                        old_host = %state.host_id,
                        new_host = %first.id,
                        "Host missing from roster, promoting first member"
                    );
                    state.host_id = first.id;
                    self.save_state(room_code, &state).await?;
                }
                state
            },
        };

        let snapshot = RoomSnapshot {
            members,
            host_id: state.host_id,
            room_state: state,
        };
        self.gateway
            .broadcast(room_code, &ServerEvent::RoomUpdate(snapshot.clone()))
            .await;

        if snapshot.host_id != user.id
            && let Some(host) = snapshot.members.iter().find(|m| m.id == snapshot.host_id)
        {
            self.gateway
                .send_to(
                    &host.connection_id,
                    &ServerEvent::RequestSync(RequestSyncMsg {
                        requester_id: conn.clone(),
                    }),
                )
                .await;
        }

        tracing::info!(
            room_code,
            connection_id = %conn,
            user_id = %user.id,
            members = snapshot.members.len(),
            "Member joined room"
        );
        self.lobby.request_refresh();
        Ok(snapshot)
    }

    /// Explicit leave of one room by user id. Leaving a room the user is
    /// not in changes nothing.
    pub async fn leave(
        &self,
        room_code: &str,
        user_id: UserId,
        conn: &ConnectionId,
    ) -> Result<LeaveOutcome, SessionError> {
        self.gateway.leave_group(conn, room_code).await;
        let outcome = self.remove_member(room_code, Departure::User(user_id)).await?;
        self.voice.leave(room_code, conn).await;
        if outcome != LeaveOutcome::NotMember {
            tracing::info!(room_code, user_id = %user_id, "Member left room");
            self.lobby.request_refresh();
        }
        Ok(outcome)
    }

    /// Remove a closed connection from every room it had joined.
    ///
    /// Each room is cleaned up independently: a store failure in one is
    /// logged and the rest still run.
    pub async fn disconnect(&self, conn: &ConnectionId) {
        let rooms = self.gateway.unregister(conn).await;
        self.voice.remove_connection(conn).await;

        let mut changed = false;
        for room_code in rooms {
            match self
                .remove_member(&room_code, Departure::Connection(conn))
                .await
            {
                Ok(LeaveOutcome::NotMember) => {},
                Ok(_) => {
                    changed = true;
                    tracing::info!(
                        room_code = %room_code,
                        connection_id = %conn,
                        "Removed disconnected member"
                    );
                },
                Err(e) => {
                    tracing::warn!(
                        room_code = %room_code,
                        connection_id = %conn,
                        error = %e,
                        "Disconnect cleanup failed for room"
                    );
                },
            }
        }
        if changed {
            self.lobby.request_refresh();
        }
    }

    async fn remove_member(
        &self,
        room_code: &str,
        departure: Departure<'_>,
    ) -> Result<LeaveOutcome, SessionError> {
        let _lock = self.locks.lock(room_code).await;

        let roster = load_roster(&self.store, room_code).await?;
        let found = match &departure {
            Departure::User(id) => roster.find_user(*id),
            Departure::Connection(conn) => roster.find_connection(conn),
        };
        let Some(entry) = found else {
            return Ok(LeaveOutcome::NotMember);
        };
        let departed = entry.member.id;

        let remaining = roster.without_user(departed);
        let encoded = remaining
            .iter()
            .map(encode_member)
            .collect::<StoreResult<Vec<_>>>()?;
        self.store
            .replace_list(&members_key(room_code), &encoded)
            .await?;

        let Some(first) = remaining.first() else {
            self.store.del(&room_key(room_code)).await?;
            self.store.srem(ACTIVE_ROOMS_KEY, room_code).await?;
            tracing::info!(room_code, "Room empty, deleted");
            return Ok(LeaveOutcome::RoomDeleted);
        };

        let mut new_host = None;
        if let Some(mut state) = load_state(&self.store, room_code).await? {
            if state.host_id == departed {
                state.host_id = first.id;
                self.save_state(room_code, &state).await?;
                new_host = Some(first.id);
                tracing::info!(
                    room_code,
                    old_host = %departed,
                    new_host = %first.id,
                    "Host migrated"
                );
                self.gateway
                    .broadcast(
                        room_code,
                        &ServerEvent::SystemMessage(SystemMessageMsg {
                            message: format!(
                                "Host left, {} is now the host",
                                first.display_name
                            ),
                            host_id: Some(first.id),
                        }),
                    )
                    .await;
            }
            self.gateway
                .broadcast(
                    room_code,
                    &ServerEvent::RoomUpdate(RoomSnapshot {
                        members: remaining.clone(),
                        host_id: state.host_id,
                        room_state: state,
                    }),
                )
                .await;
        }

        Ok(LeaveOutcome::Remaining {
            members: remaining,
            new_host,
        })
    }
}
