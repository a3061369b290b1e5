use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use cowatch_core::member::ConnectionId;
use cowatch_core::net::messages::ServerEvent;
use cowatch_core::room::{PlaybackChange, PlaybackPatch};
use cowatch_core::time::now_millis;

use crate::error::SessionError;
use crate::gateway::Gateway;
use crate::lobby::LobbyAggregator;
use crate::room_locks::RoomLocks;
use crate::session::{encode_state, load_state};
use crate::store::{SharedRepository, StoreError, room_key};

/// Relays playback state between room members.
pub struct SyncEngine {
    store: SharedRepository,
    gateway: Arc<Gateway>,
    locks: Arc<RoomLocks>,
    lobby: Arc<LobbyAggregator>,
    room_ttl: Duration,
}

impl SyncEngine {
    pub fn new(
        store: SharedRepository,
        gateway: Arc<Gateway>,
        locks: Arc<RoomLocks>,
        lobby: Arc<LobbyAggregator>,
        room_ttl: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            locks,
            lobby,
            room_ttl,
        }
    }

    /// Merge `patch` into the stored state and relay the result to
    /// everyone in the room except `sender`.
    ///
    /// Whatever arrives last wins; an older update delivered late
    /// overwrites a newer one. Returns `None` when the room does not exist.
    pub async fn sync_video(
        &self,
        room_code: &str,
        patch: PlaybackPatch,
        sender: &ConnectionId,
    ) -> Result<Option<PlaybackChange>, SessionError> {
        let _lock = self.locks.lock(room_code).await;

        let Some(mut state) = load_state(&self.store, room_code).await? else {
            tracing::debug!(room_code, connection_id = %sender, "sync-video for unknown room");
            return Ok(None);
        };
        let change = state.apply(patch, now_millis());
        // Nothing is stored unless the merged state can also go out.
        let merged = serde_json::to_value(&state).map_err(|_| StoreError::Corrupt {
            key: room_key(room_code),
        })?;
        self.store
            .set_ex(&room_key(room_code), &encode_state(&state)?, self.room_ttl)
            .await?;
        self.gateway
            .broadcast_except(room_code, sender, &ServerEvent::SyncVideo(merged))
            .await;

        if change.affects_lobby() {
            self.lobby.request_refresh();
        }
        Ok(Some(change))
    }

    /// Deliver a host's catch-up state straight to the member that asked
    /// for it. Nothing is stored.
    pub async fn respond_sync(&self, requester: &ConnectionId, state: Value) {
        self.gateway
            .send_to(requester, &ServerEvent::SyncVideo(state))
            .await;
    }
}
