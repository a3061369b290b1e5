use serde::{Deserialize, Serialize};

use crate::member::Member;
use crate::room::RoomState;

/// Shown when the room has no video, or the payload has no title.
pub const NOTHING_PLAYING: &str = "Nothing playing";
/// Shown when the host id does not resolve to a roster entry.
pub const UNKNOWN_HOST: &str = "Unknown";

/// Lobby line for one active room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_code: String,
    pub host_name: String,
    pub member_count: usize,
    pub video_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_name: Option<String>,
    pub is_playing: bool,
}

impl RoomSummary {
    /// Build the summary line from stored state and roster.
    ///
    /// `member_count` is the stored list length, which can exceed
    /// `members.len()` when some entries failed to parse.
    pub fn build(
        room_code: &str,
        state: &RoomState,
        members: &[Member],
        member_count: usize,
    ) -> Self {
        let host_name = members
            .iter()
            .find(|m| m.id == state.host_id)
            .map(|m| m.display_name.clone())
            .unwrap_or_else(|| UNKNOWN_HOST.to_string());
        let video_name = state
            .video_title()
            .map(str::to_string)
            .unwrap_or_else(|| NOTHING_PLAYING.to_string());
        let episode_name = state
            .current_video
            .as_ref()
            .and_then(|v| v.episode_name(state.current_episode_index));
        Self {
            room_code: room_code.to_string(),
            host_name,
            member_count,
            video_name,
            episode_name,
            is_playing: state.is_playing,
        }
    }
}

/// One page of the room listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyPage {
    pub rooms: Vec<RoomSummary>,
    pub page: usize,
    pub has_more: bool,
    pub total: usize,
}

/// Busiest rooms first; ties broken by room code so output is stable.
pub fn sort_by_popularity(rooms: &mut [RoomSummary]) {
    rooms.sort_by(|a, b| {
        b.member_count
            .cmp(&a.member_count)
            .then_with(|| a.room_code.cmp(&b.room_code))
    });
}

/// Slice an already-sorted listing. `page` is 1-based; 0 is treated as 1.
pub fn paginate(rooms: Vec<RoomSummary>, page: usize, limit: usize) -> LobbyPage {
    let page = page.max(1);
    let total = rooms.len();
    let offset = (page - 1).saturating_mul(limit);
    let end = offset.saturating_add(limit);
    let rooms = rooms.into_iter().skip(offset).take(limit).collect();
    LobbyPage {
        rooms,
        page,
        has_more: end < total,
        total,
    }
}
