use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::ServerConfig;
use crate::gateway::Gateway;
use crate::lobby::LobbyAggregator;
use crate::room_locks::RoomLocks;
use crate::session::SessionManager;
use crate::store::SharedRepository;
use crate::sync::SyncEngine;
use crate::voice::VoiceRelay;

pub type IpConnectionCounts = Arc<Mutex<HashMap<IpAddr, usize>>>;

#[derive(Clone)]
pub struct AppState {
    pub store: SharedRepository,
    pub gateway: Arc<Gateway>,
    pub sessions: Arc<SessionManager>,
    pub sync: Arc<SyncEngine>,
    pub voice: Arc<VoiceRelay>,
    pub lobby: Arc<LobbyAggregator>,
    pub ws_connection_count: Arc<AtomicUsize>,
    pub ws_per_ip: IpConnectionCounts,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig, store: SharedRepository) -> Self {
        let gateway = Arc::new(Gateway::new());
        let locks = Arc::new(RoomLocks::new());
        let room_ttl = config.store.room_ttl();
        let voice = Arc::new(VoiceRelay::new(Arc::clone(&gateway)));
        let lobby = Arc::new(LobbyAggregator::new(
            Arc::clone(&store),
            Arc::clone(&gateway),
            Arc::clone(&locks),
            config.lobby.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&store),
            Arc::clone(&gateway),
            Arc::clone(&locks),
            Arc::clone(&voice),
            Arc::clone(&lobby),
            room_ttl,
        ));
        let sync = Arc::new(SyncEngine::new(
            Arc::clone(&store),
            Arc::clone(&gateway),
            locks,
            Arc::clone(&lobby),
            room_ttl,
        ));
        Self {
            store,
            gateway,
            sessions,
            sync,
            voice,
            lobby,
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
            ws_per_ip: Arc::new(Mutex::new(HashMap::new())),
            config: Arc::new(config),
        }
    }
}

/// Counts one live WebSocket connection for as long as it is held.
pub struct ConnectionGuard {
    count: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    pub fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::Relaxed);
        Self { count }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Holds one of an IP address's connection slots.
pub struct IpConnectionGuard {
    ip: IpAddr,
    counts: IpConnectionCounts,
}

impl IpConnectionGuard {
    /// Take a slot for `ip`, or `None` when it already has `max` open.
    pub fn try_acquire(ip: IpAddr, counts: IpConnectionCounts, max: usize) -> Option<Self> {
        {
            let mut map = counts.lock().unwrap_or_else(|p| p.into_inner());
            let current = map.entry(ip).or_insert(0);
            if *current >= max {
                return None;
            }
            *current += 1;
        }
        Some(Self { ip, counts })
    }
}

impl Drop for IpConnectionGuard {
    fn drop(&mut self) {
        let mut map = self.counts.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(n) = map.get_mut(&self.ip) {
            *n = n.saturating_sub(1);
            if *n == 0 {
                map.remove(&self.ip);
            }
        }
    }
}
