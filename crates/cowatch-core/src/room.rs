use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::member::{Member, UserId};
use crate::video::OpaqueVideo;

/// How long room state survives without a write.
pub const DEFAULT_ROOM_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Longest room code accepted from a client.
pub const MAX_ROOM_CODE_LEN: usize = 16;

/// Keys a client may never set through a playback patch.
const RESERVED_KEYS: &[&str] = &[
    "hostId",
    "lastUpdate",
    "currentVideo",
    "currentEpisodeIndex",
    "isPlaying",
    "currentTime",
];

/// Shared playback state of one room, stored at `room:{code}`.
///
/// Unknown fields written by clients are kept in `extra` and round-trip
/// through the store untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomState {
    pub host_id: UserId,
    #[serde(default)]
    pub current_video: Option<OpaqueVideo>,
    #[serde(default)]
    pub current_episode_index: u32,
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub current_time: f64,
    #[serde(default)]
    pub last_update: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Any subset of the playback fields, as sent with `sync-video`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_video: Option<OpaqueVideo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_episode_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_playing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_time: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// What a merge changed that the lobby cares about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackChange {
    pub title_changed: bool,
    pub play_state_changed: bool,
}

impl PlaybackChange {
    pub fn affects_lobby(&self) -> bool {
        self.title_changed || self.play_state_changed
    }
}

impl RoomState {
    /// Fresh state for a room created by `host_id`.
    pub fn new(host_id: UserId, now_ms: u64) -> Self {
        Self {
            host_id,
            current_video: None,
            current_episode_index: 0,
            is_playing: false,
            current_time: 0.0,
            last_update: now_ms,
            extra: Map::new(),
        }
    }

    pub fn video_title(&self) -> Option<&str> {
        self.current_video.as_ref().and_then(OpaqueVideo::title)
    }

    /// Merge `patch` over this state and stamp `last_update`.
    ///
    /// Last writer wins: there is no staleness check against earlier
    /// timestamps.
    pub fn apply(&mut self, patch: PlaybackPatch, now_ms: u64) -> PlaybackChange {
        let old_title = self.video_title().map(str::to_owned);
        let old_playing = self.is_playing;

        if let Some(video) = patch.current_video {
            self.current_video = Some(video);
        }
        if let Some(index) = patch.current_episode_index {
            self.current_episode_index = index;
        }
        if let Some(playing) = patch.is_playing {
            self.is_playing = playing;
        }
        if let Some(t) = patch.current_time {
            self.current_time = if t.is_finite() && t > 0.0 { t } else { 0.0 };
        }
        for (key, value) in patch.extra {
            if !RESERVED_KEYS.contains(&key.as_str()) {
                self.extra.insert(key, value);
            }
        }
        self.last_update = now_ms;

        PlaybackChange {
            title_changed: old_title.as_deref() != self.video_title(),
            play_state_changed: old_playing != self.is_playing,
        }
    }
}

/// Full room view broadcast as `room-update` after membership changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub members: Vec<Member>,
    pub host_id: UserId,
    pub room_state: RoomState,
}

/// Room codes are short, human-typed, ASCII alphanumeric (dashes allowed).
pub fn is_valid_room_code(code: &str) -> bool {
    !code.is_empty()
        && code.len() <= MAX_ROOM_CODE_LEN
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Random 4-digit code in the same format users type by hand.
pub fn generate_room_code() -> String {
    let n: u16 = rand::rng().random_range(1000..=9999);
    n.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_room_defaults() {
        let s = RoomState::new(UserId(1), 10);
        assert_eq!(s.host_id, UserId(1));
        assert!(!s.is_playing);
        assert_eq!(s.current_time, 0.0);
        assert_eq!(s.current_episode_index, 0);
        assert!(s.current_video.is_none());
    }

    #[test]
    fn apply_merges_only_present_fields() {
        let mut s = RoomState::new(UserId(1), 0);
        s.current_episode_index = 3;
        let patch: PlaybackPatch =
            serde_json::from_value(json!({"currentTime": 42.0, "isPlaying": true})).unwrap();
        let change = s.apply(patch, 99);
        assert_eq!(s.current_time, 42.0);
        assert!(s.is_playing);
        assert_eq!(s.current_episode_index, 3);
        assert_eq!(s.last_update, 99);
        assert!(change.play_state_changed);
        assert!(!change.title_changed);
    }

    #[test]
    fn apply_never_touches_host() {
        let mut s = RoomState::new(UserId(1), 0);
        let patch: PlaybackPatch =
            serde_json::from_value(json!({"hostId": 9, "lastUpdate": 5, "volume": 0.5}))
                .unwrap();
        s.apply(patch, 7);
        assert_eq!(s.host_id, UserId(1));
        assert_eq!(s.last_update, 7);
        assert_eq!(s.extra.get("volume"), Some(&json!(0.5)));
        // extra keys must not shadow typed keys on the wire
        let out = serde_json::to_value(&s).unwrap();
        assert_eq!(out["hostId"], json!(1));
    }

    #[test]
    fn negative_time_clamped() {
        let mut s = RoomState::new(UserId(1), 0);
        s.apply(
            PlaybackPatch {
                current_time: Some(-3.0),
                ..PlaybackPatch::default()
            },
            1,
        );
        assert_eq!(s.current_time, 0.0);
    }

    #[test]
    fn title_change_detected() {
        let mut s = RoomState::new(UserId(1), 0);
        let change = s.apply(
            PlaybackPatch {
                current_video: Some(OpaqueVideo::new(json!({"vod_name": "A"}))),
                ..PlaybackPatch::default()
            },
            1,
        );
        assert!(change.title_changed);
        assert!(change.affects_lobby());

        let change = s.apply(
            PlaybackPatch {
                current_time: Some(5.0),
                ..PlaybackPatch::default()
            },
            2,
        );
        assert!(!change.affects_lobby());
    }

    #[test]
    fn state_roundtrips_with_null_video() {
        let s = RoomState::new(UserId(4), 1);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["currentVideo"], Value::Null);
        let back: RoomState = serde_json::from_value(json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn room_code_validation() {
        assert!(is_valid_room_code("1234"));
        assert!(is_valid_room_code("ABCD-1234"));
        assert!(!is_valid_room_code(""));
        assert!(!is_valid_room_code("12 34"));
        assert!(!is_valid_room_code(&"9".repeat(MAX_ROOM_CODE_LEN + 1)));
    }

    #[test]
    fn generated_codes_are_four_digits() {
        for _ in 0..100 {
            let code = generate_room_code();
            assert_eq!(code.len(), 4);
            assert!(is_valid_room_code(&code));
        }
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn patch() -> impl Strategy<Value = PlaybackPatch> {
            (
                proptest::option::of(any::<u32>()),
                proptest::option::of(any::<bool>()),
                proptest::option::of(any::<f64>()),
                any::<i64>(),
            )
                .prop_map(|(index, playing, time, forged_host)| {
                    let mut extra = Map::new();
                    extra.insert("hostId".into(), json!(forged_host));
                    extra.insert("lastUpdate".into(), json!(0));
                    PlaybackPatch {
                        current_video: None,
                        current_episode_index: index,
                        is_playing: playing,
                        current_time: time,
                        extra,
                    }
                })
        }

        proptest! {
            #[test]
            fn apply_keeps_host_and_clamps_time(
                host in any::<i64>(),
                patches in proptest::collection::vec(patch(), 1..20),
                now in 1u64..u64::MAX,
            ) {
                let mut state = RoomState::new(UserId(host), 0);
                for p in patches {
                    state.apply(p, now);
                    prop_assert_eq!(state.host_id, UserId(host));
                    prop_assert_eq!(state.last_update, now);
                    prop_assert!(state.current_time.is_finite());
                    prop_assert!(state.current_time >= 0.0);
                    prop_assert!(state.extra.is_empty());
                }
            }
        }
    }
}
