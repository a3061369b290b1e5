use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

/// Opaque numeric user id handed to the engine by the surrounding app.
///
/// Clients are inconsistent about sending ids as numbers or numeric
/// strings, so deserialization accepts both and comparisons are always
/// numeric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct UserIdVisitor;

        impl Visitor<'_> for UserIdVisitor {
            type Value = UserId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an integer user id or a numeric string")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<UserId, E> {
                Ok(UserId(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<UserId, E> {
                i64::try_from(v)
                    .map(UserId)
                    .map_err(|_| E::custom(format!("user id out of range: {v}")))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<UserId, E> {
                if v.fract() == 0.0 && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
                    Ok(UserId(v as i64))
                } else {
                    Err(E::custom(format!("user id is not an integer: {v}")))
                }
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<UserId, E> {
                let trimmed = v.trim();
                if let Ok(n) = trimmed.parse::<i64>() {
                    return Ok(UserId(n));
                }
                match trimmed.parse::<f64>() {
                    Ok(f) => self.visit_f64(f),
                    Err(_) => Err(E::custom(format!("user id is not numeric: {v:?}"))),
                }
            }
        }

        deserializer.deserialize_any(UserIdVisitor)
    }
}

/// Transport-level identity of one live connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// User identity as supplied by a client on `join-room` / `voice-join`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: UserId,
    #[serde(default, alias = "username", alias = "displayName")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// One roster entry, stored as a JSON element of `room:{code}:members`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: UserId,
    #[serde(alias = "username")]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(alias = "socketId")]
    pub connection_id: ConnectionId,
}

impl Member {
    pub fn new(user: &UserIdentity, connection_id: ConnectionId) -> Self {
        Self {
            id: user.id,
            display_name: user.name.clone(),
            nickname: user.nickname.clone(),
            avatar: user.avatar.clone(),
            connection_id,
        }
    }
}

/// A parsed roster entry together with its position in the stored list.
///
/// `index` is the raw list index, so in-place updates keep working when
/// earlier entries failed to parse and were skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub index: usize,
    pub member: Member,
}

/// Roster as read from the store, in list order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    pub entries: Vec<RosterEntry>,
    /// Raw indices of entries that could not be parsed.
    pub skipped: Vec<usize>,
}

impl Roster {
    /// Parse raw stored entries, skipping (and recording) malformed ones.
    pub fn parse<S: AsRef<str>>(raw: &[S]) -> Self {
        let mut roster = Roster::default();
        for (index, item) in raw.iter().enumerate() {
            match serde_json::from_str::<Member>(item.as_ref()) {
                Ok(member) => roster.entries.push(RosterEntry { index, member }),
                Err(_) => roster.skipped.push(index),
            }
        }
        roster
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn members(&self) -> Vec<Member> {
        self.entries.iter().map(|e| e.member.clone()).collect()
    }

    pub fn first(&self) -> Option<&Member> {
        self.entries.first().map(|e| &e.member)
    }

    pub fn find_user(&self, id: UserId) -> Option<&RosterEntry> {
        self.entries.iter().find(|e| e.member.id == id)
    }

    pub fn find_connection(&self, conn: &ConnectionId) -> Option<&RosterEntry> {
        self.entries.iter().find(|e| &e.member.connection_id == conn)
    }

    /// Members remaining after removing `id`, relative order preserved.
    pub fn without_user(&self, id: UserId) -> Vec<Member> {
        self.entries
            .iter()
            .filter(|e| e.member.id != id)
            .map(|e| e.member.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_accepts_numbers_and_numeric_strings() {
        let a: UserId = serde_json::from_str("7").unwrap();
        let b: UserId = serde_json::from_str("\"7\"").unwrap();
        let c: UserId = serde_json::from_str("7.0").unwrap();
        assert_eq!(a, UserId(7));
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn user_id_rejects_garbage() {
        assert!(serde_json::from_str::<UserId>("\"abc\"").is_err());
        assert!(serde_json::from_str::<UserId>("1.5").is_err());
        assert!(serde_json::from_str::<UserId>("null").is_err());
    }

    #[test]
    fn member_reads_legacy_field_names() {
        let raw = r#"{"id":"3","username":"carol","socketId":"abc"}"#;
        let m: Member = serde_json::from_str(raw).unwrap();
        assert_eq!(m.id, UserId(3));
        assert_eq!(m.display_name, "carol");
        assert_eq!(m.connection_id.as_str(), "abc");
    }

    #[test]
    fn member_serializes_camel_case() {
        let user = UserIdentity {
            id: UserId(1),
            name: "alice".into(),
            nickname: None,
            avatar: None,
        };
        let json = serde_json::to_string(&Member::new(&user, "c1".into())).unwrap();
        assert!(json.contains("\"displayName\":\"alice\""));
        assert!(json.contains("\"connectionId\":\"c1\""));
        assert!(!json.contains("nickname"));
    }

    #[test]
    fn roster_skips_malformed_entries_and_keeps_raw_index() {
        let raw = vec![
            "{not json".to_string(),
            r#"{"id":2,"displayName":"bob","connectionId":"b"}"#.to_string(),
        ];
        let roster = Roster::parse(&raw);
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.skipped, vec![0]);
        let entry = roster.find_user(UserId(2)).unwrap();
        assert_eq!(entry.index, 1);
    }

    #[test]
    fn without_user_preserves_order() {
        let raw: Vec<String> = [1, 2, 3]
            .iter()
            .map(|i| format!(r#"{{"id":{i},"displayName":"u{i}","connectionId":"c{i}"}}"#))
            .collect();
        let roster = Roster::parse(&raw);
        let ids: Vec<i64> = roster
            .without_user(UserId(1))
            .iter()
            .map(|m| m.id.0)
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }
}
