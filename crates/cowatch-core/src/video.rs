use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field names probed, in order, for a human-readable title.
pub const TITLE_FIELDS: &[&str] = &["vod_name", "name", "title"];

/// Separates alternative play sources in `vod_play_url`.
const SOURCE_SEPARATOR: &str = "$$$";
/// Separates episodes within one play source.
const EPISODE_SEPARATOR: char = '#';
/// Separates an episode's label from its URL.
const LABEL_SEPARATOR: char = '$';

/// Client-defined description of what a room is watching.
///
/// The engine stores and relays this verbatim. Only the accessors below
/// look inside it, and each tolerates any shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpaqueVideo(Value);

/// One entry of the episode list encoded in a catalogue payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Episode {
    pub name: String,
    pub url: String,
}

impl OpaqueVideo {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// First non-empty string among [`TITLE_FIELDS`].
    pub fn title(&self) -> Option<&str> {
        TITLE_FIELDS
            .iter()
            .filter_map(|field| self.0.get(field).and_then(Value::as_str))
            .find(|s| !s.is_empty())
    }

    /// Episodes of the first play source, or an empty list when the
    /// payload carries no `vod_play_url`.
    pub fn episodes(&self) -> Vec<Episode> {
        let Some(play_url) = self.0.get("vod_play_url").and_then(Value::as_str) else {
            return Vec::new();
        };
        let first_source = play_url.split(SOURCE_SEPARATOR).next().unwrap_or_default();
        if first_source.is_empty() {
            return Vec::new();
        }
        first_source
            .split(EPISODE_SEPARATOR)
            .map(|ep| {
                let mut parts = ep.splitn(2, LABEL_SEPARATOR);
                let name = parts.next().unwrap_or_default().to_string();
                let url = parts
                    .next()
                    .filter(|u| !u.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| name.clone());
                Episode { name, url }
            })
            .collect()
    }

    /// Label of the episode at `index`, if the payload lists that many.
    pub fn episode_name(&self, index: u32) -> Option<String> {
        self.episodes()
            .into_iter()
            .nth(index as usize)
            .map(|ep| ep.name)
    }
}
