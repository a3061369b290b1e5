use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{Repository, StoreError, StoreResult};

enum Value {
    Str(String),
    List(Vec<String>),
    Set(HashSet<String>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Process-local store with the same semantics as the Redis backend.
///
/// Expired keys are dropped lazily on access.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, Entry>>,
    #[cfg(any(test, feature = "test-helpers"))]
    fail_prefix: std::sync::RwLock<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call touching a key that starts with `prefix` fail
    /// with `StoreError::Unavailable`. `None` clears the fault.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn fail_prefix(&self, prefix: Option<&str>) {
        if let Ok(mut guard) = self.fail_prefix.write() {
            *guard = prefix.map(str::to_string);
        }
    }

    fn check(&self, key: &str) -> StoreResult<()> {
        #[cfg(any(test, feature = "test-helpers"))]
        if let Ok(guard) = self.fail_prefix.read()
            && let Some(prefix) = guard.as_deref()
            && key.starts_with(prefix)
        {
            return Err(StoreError::Unavailable(format!("injected fault for {key}")));
        }
        let _ = key;
        Ok(())
    }
}

fn corrupt(key: &str) -> StoreError {
    StoreError::Corrupt {
        key: key.to_string(),
    }
}

/// Remove `key` if it has expired, then return the live entry.
fn live_entry<'a>(
    data: &'a mut HashMap<String, Entry>,
    key: &str,
) -> Option<&'a mut Entry> {
    let now = Instant::now();
    if data.get(key).is_some_and(|e| !e.live(now)) {
        data.remove(key);
    }
    data.get_mut(key)
}

#[async_trait]
impl Repository for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.check("")
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.check(key)?;
        let mut data = self.data.lock().await;
        Ok(live_entry(&mut data, key).is_some())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check(key)?;
        let mut data = self.data.lock().await;
        match live_entry(&mut data, key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(corrupt(key)),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.check(key)?;
        let mut data = self.data.lock().await;
        data.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        self.check(key)?;
        self.data.lock().await.remove(key);
        Ok(())
    }

    async fn lrange_all(&self, key: &str) -> StoreResult<Vec<String>> {
        self.check(key)?;
        let mut data = self.data.lock().await;
        match live_entry(&mut data, key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::List(items),
                ..
            }) => Ok(items.clone()),
            Some(_) => Err(corrupt(key)),
        }
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check(key)?;
        let mut data = self.data.lock().await;
        match live_entry(&mut data, key) {
            None => {
                data.insert(
                    key.to_string(),
                    Entry {
                        value: Value::List(vec![value.to_string()]),
                        expires_at: None,
                    },
                );
                Ok(())
            },
            Some(Entry {
                value: Value::List(items),
                ..
            }) => {
                items.push(value.to_string());
                Ok(())
            },
            Some(_) => Err(corrupt(key)),
        }
    }

    async fn lset(&self, key: &str, index: usize, value: &str) -> StoreResult<()> {
        self.check(key)?;
        let mut data = self.data.lock().await;
        match live_entry(&mut data, key) {
            Some(Entry {
                value: Value::List(items),
                ..
            }) => match items.get_mut(index) {
                Some(slot) => {
                    *slot = value.to_string();
                    Ok(())
                },
                None => Err(StoreError::Unavailable(format!(
                    "index {index} out of range for {key}"
                ))),
            },
            None => Err(StoreError::Unavailable(format!("no such key {key}"))),
            Some(_) => Err(corrupt(key)),
        }
    }

    async fn replace_list(&self, key: &str, values: &[String]) -> StoreResult<()> {
        self.check(key)?;
        let mut data = self.data.lock().await;
        data.remove(key);
        if !values.is_empty() {
            data.insert(
                key.to_string(),
                Entry {
                    value: Value::List(values.to_vec()),
                    expires_at: None,
                },
            );
        }
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()> {
        self.check(key)?;
        let mut data = self.data.lock().await;
        match live_entry(&mut data, key) {
            None => {
                data.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Set(HashSet::from([member.to_string()])),
                        expires_at: None,
                    },
                );
                Ok(())
            },
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => {
                set.insert(member.to_string());
                Ok(())
            },
            Some(_) => Err(corrupt(key)),
        }
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<()> {
        self.check(key)?;
        let mut data = self.data.lock().await;
        let now_empty = match live_entry(&mut data, key) {
            None => return Ok(()),
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => {
                set.remove(member);
                set.is_empty()
            },
            Some(_) => return Err(corrupt(key)),
        };
        if now_empty {
            data.remove(key);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        self.check(key)?;
        let mut data = self.data.lock().await;
        match live_entry(&mut data, key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => {
                let mut members: Vec<String> = set.iter().cloned().collect();
                members.sort();
                Ok(members)
            },
            Some(_) => Err(corrupt(key)),
        }
    }
}
