use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use cowatch_core::lobby::{LobbyPage, RoomSummary, paginate, sort_by_popularity};
use cowatch_core::member::Roster;
use cowatch_core::net::messages::{LobbyUpdateMsg, ServerEvent};
use cowatch_core::room::RoomState;

use crate::config::LobbyConfig;
use crate::gateway::Gateway;
use crate::room_locks::RoomLocks;
use crate::store::{ACTIVE_ROOMS_KEY, SharedRepository, StoreResult, members_key, room_key};

/// Rebuilds the cross-room listing from the store and pushes it to lobby
/// subscribers.
pub struct LobbyAggregator {
    store: SharedRepository,
    gateway: Arc<Gateway>,
    locks: Arc<RoomLocks>,
    config: LobbyConfig,
    refresh: Notify,
}

impl LobbyAggregator {
    pub fn new(
        store: SharedRepository,
        gateway: Arc<Gateway>,
        locks: Arc<RoomLocks>,
        config: LobbyConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            locks,
            config,
            refresh: Notify::new(),
        }
    }

    /// Summaries of every live room, busiest first.
    ///
    /// Codes whose state key is gone are dropped from the registry along
    /// with any roster left under them. A room
    /// whose reads fail is skipped; only a failed registry read is an error.
    pub async fn refresh(&self) -> StoreResult<Vec<RoomSummary>> {
        let codes = self.store.smembers(ACTIVE_ROOMS_KEY).await?;
        let mut rooms = Vec::with_capacity(codes.len());
        for code in codes {
            match self.summarize(&code).await {
                Ok(Some(summary)) => rooms.push(summary),
                Ok(None) => {},
                Err(e) => {
                    tracing::warn!(room_code = %code, error = %e, "Skipping room in lobby listing");
                },
            }
        }
        sort_by_popularity(&mut rooms);
        Ok(rooms)
    }

    async fn summarize(&self, code: &str) -> StoreResult<Option<RoomSummary>> {
        let Some(raw_state) = self.store.get(&room_key(code)).await? else {
            self.remove_stale(code).await?;
            return Ok(None);
        };
        let state: RoomState = match serde_json::from_str(&raw_state) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(room_code = code, error = %e, "Unreadable room state");
                return Ok(None);
            },
        };
        let raw_members = self.store.lrange_all(&members_key(code)).await?;
        let roster = Roster::parse(&raw_members);
        Ok(Some(RoomSummary::build(
            code,
            &state,
            &roster.members(),
            raw_members.len(),
        )))
    }

    /// Forget an expired room. Runs under the room lock and re-checks the
    /// state key, since a join pushes its member before creating state.
    async fn remove_stale(&self, code: &str) -> StoreResult<()> {
        let _lock = self.locks.lock(code).await;
        if self.store.exists(&room_key(code)).await? {
            return Ok(());
        }
        tracing::info!(room_code = code, "Removing stale room from registry");
        self.store.del(&members_key(code)).await?;
        self.store.srem(ACTIVE_ROOMS_KEY, code).await
    }

    /// One page of the listing. `limit` of `None` uses the configured
    /// default; any limit is clamped to the configured maximum.
    pub async fn list_paged(&self, page: usize, limit: Option<usize>) -> StoreResult<LobbyPage> {
        let limit = limit
            .unwrap_or(self.config.default_page_size)
            .clamp(1, self.config.max_page_size.max(1));
        let rooms = self.refresh().await?;
        Ok(paginate(rooms, page, limit))
    }

    /// Push the full listing and the online count to lobby subscribers.
    pub async fn broadcast_to_lobby(&self) {
        let rooms = match self.refresh().await {
            Ok(rooms) => rooms,
            Err(e) => {
                tracing::warn!(error = %e, "Lobby refresh failed");
                return;
            },
        };
        let online_count = self.gateway.connection_count().await;
        self.gateway
            .broadcast_lobby(&ServerEvent::LobbyUpdate(LobbyUpdateMsg {
                rooms,
                online_count,
            }))
            .await;
    }

    pub async fn broadcast_online_count(&self) {
        let count = self.gateway.connection_count().await;
        self.gateway
            .broadcast_lobby(&ServerEvent::OnlineCount(count))
            .await;
    }

    /// Ask the background task for a refresh. Requests made while one is
    /// pending collapse into a single recomputation.
    pub fn request_refresh(&self) {
        self.refresh.notify_one();
    }

    /// Serve refresh requests, plus a periodic one so expired rooms drop
    /// out of the listing even when no event touches them.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let period = Duration::from_secs(self.config.refresh_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = self.refresh.notified() => {},
                    _ = ticker.tick() => {},
                }
                self.broadcast_to_lobby().await;
            }
        })
    }
}
