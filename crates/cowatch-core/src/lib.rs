pub mod lobby;
pub mod member;
pub mod net;
pub mod room;
pub mod time;
pub mod video;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use serde_json::json;

    use crate::member::{ConnectionId, Member, UserId, UserIdentity};
    use crate::video::OpaqueVideo;

    /// Identity payload as a client would send it on `join-room`.
    pub fn make_user(id: i64, name: &str) -> UserIdentity {
        UserIdentity {
            id: UserId(id),
            name: name.to_string(),
            nickname: None,
            avatar: None,
        }
    }

    /// Roster entry for user `id` on connection `conn`.
    pub fn make_member(id: i64, name: &str, conn: &str) -> Member {
        Member::new(&make_user(id, name), ConnectionId::from(conn))
    }

    /// A catalogue-style video payload with `episodes` entries in the
    /// first play source.
    pub fn make_video(title: &str, episodes: usize) -> OpaqueVideo {
        let play_url = (1..=episodes)
            .map(|i| format!("EP{i:02}$https://cdn.example/{i}.m3u8"))
            .collect::<Vec<_>>()
            .join("#");
        OpaqueVideo::new(json!({
            "vod_id": 42,
            "vod_name": title,
            "vod_pic": "https://cdn.example/poster.jpg",
            "vod_play_url": play_url,
        }))
    }
}
