//! Typed in-memory keyspace.
//!
//! One map holds every key; each key maps to exactly one typed [`Value`].
//! Expired keys are removed lazily when they are touched.

pub mod pubsub;
pub mod sorted_set;
pub mod stream;
pub mod value;

pub use pubsub::PubSub;
pub use sorted_set::SortedSet;
pub use stream::{IdSpec, Stream, StreamEntry, StreamId};
pub use value::{Entry, Value};

use crate::metrics::Metrics;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("value is not an integer or out of range")]
    NotInteger,

    #[error("stream ID must be greater than 0-0")]
    StreamIdZero,

    #[error("stream ID is equal or smaller than the stream top item")]
    StreamIdTooSmall,

    #[error("invalid stream ID")]
    InvalidStreamId,
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Resolve inclusive `start..=end` indices where negative values count from
/// the end. Returns None when the range selects nothing.
pub fn resolve_range(start: i64, end: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let end = if end < 0 { len + end } else { end.min(len - 1) };
    if len == 0 || start > end || start >= len {
        return None;
    }
    Some((start as usize, end as usize))
}

pub struct Store {
    data: DashMap<String, Entry>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Run `f` against a live value. Absent or expired keys yield None.
    fn read<T>(&self, key: &str, f: impl FnOnce(&Value) -> Option<T>) -> Option<T> {
        let now = now_millis();
        let entry = self.data.get(key)?;
        if entry.is_expired(now) {
            drop(entry);
            self.expire(key, now);
            return None;
        }
        f(&entry.value)
    }

    /// Mutate an existing live value; absent keys yield `Ok(None)`.
    fn modify<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut Value) -> Result<T, StoreError>,
    ) -> Result<Option<T>, StoreError> {
        let now = now_millis();
        let result = {
            let Some(mut entry) = self.data.get_mut(key) else {
                return Ok(None);
            };
            if entry.is_expired(now) {
                drop(entry);
                self.expire(key, now);
                return Ok(None);
            }
            f(&mut entry.value)
        };
        self.prune(key);
        result.map(Some)
    }

    /// Mutate the value at `key`, creating it with `init` when absent.
    fn upsert<T>(
        &self,
        key: &str,
        init: impl Fn() -> Value,
        f: impl FnOnce(&mut Entry) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let now = now_millis();
        let result = {
            let mut entry = self
                .data
                .entry(key.to_string())
                .or_insert_with(|| Entry::new(init()));
            if entry.is_expired(now) {
                *entry = Entry::new(init());
                Metrics::get().record_expired_key();
            }
            f(entry.value_mut())
        };
        self.prune(key);
        result
    }

    fn expire(&self, key: &str, now: u64) {
        if self
            .data
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            tracing::trace!(key, "Expired key removed");
            Metrics::get().record_expired_key();
        }
    }

    fn prune(&self, key: &str) {
        self.data
            .remove_if(key, |_, entry| entry.value.is_empty_collection());
    }

    // Strings

    /// Overwrite `key` with a string, replacing any previous type and expiry.
    pub fn set_string(&self, key: &str, value: String, expires_at: Option<u64>) {
        self.data.insert(
            key.to_string(),
            Entry::with_expiry(Value::String(value), expires_at),
        );
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.read(key, |value| match value {
            Value::String(s) => Some(s.clone()),
            _ => None,
        })
    }

    /// Increment the integer stored at `key`. The expiry is kept.
    pub fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.upsert(
            key,
            || Value::String("0".to_string()),
            |entry| match &mut entry.value {
                Value::String(s) => {
                    let next = s
                        .parse::<i64>()
                        .ok()
                        .and_then(|n| n.checked_add(1))
                        .ok_or(StoreError::NotInteger)?;
                    *s = next.to_string();
                    Ok(next)
                }
                _ => Err(StoreError::WrongType),
            },
        )
    }

    // Lists

    pub fn push_left(&self, key: &str, values: &[String]) -> Result<usize, StoreError> {
        self.push(key, values, true)
    }

    pub fn push_right(&self, key: &str, values: &[String]) -> Result<usize, StoreError> {
        self.push(key, values, false)
    }

    fn push(&self, key: &str, values: &[String], front: bool) -> Result<usize, StoreError> {
        self.upsert(
            key,
            || Value::List(VecDeque::new()),
            |entry| match &mut entry.value {
                Value::List(list) => {
                    for value in values {
                        if front {
                            list.push_front(value.clone());
                        } else {
                            list.push_back(value.clone());
                        }
                    }
                    Ok(list.len())
                }
                _ => Err(StoreError::WrongType),
            },
        )
    }

    pub fn list_range(&self, key: &str, start: i64, end: i64) -> Vec<String> {
        self.read(key, |value| match value {
            Value::List(list) => {
                let (start, end) = resolve_range(start, end, list.len())?;
                Some(list.range(start..=end).cloned().collect())
            }
            _ => None,
        })
        .unwrap_or_default()
    }

    pub fn list_len(&self, key: &str) -> usize {
        self.read(key, |value| match value {
            Value::List(list) => Some(list.len()),
            _ => None,
        })
        .unwrap_or(0)
    }

    /// Remove up to `count` elements from the head of the list.
    pub fn pop_left(&self, key: &str, count: usize) -> Result<Vec<String>, StoreError> {
        let popped = self.modify(key, |value| match value {
            Value::List(list) => {
                let n = count.min(list.len());
                Ok(list.drain(..n).collect())
            }
            _ => Err(StoreError::WrongType),
        })?;
        Ok(popped.unwrap_or_default())
    }

    // Streams

    /// Append an entry and return the ID it was stored under.
    pub fn add_stream_entry(
        &self,
        key: &str,
        spec: IdSpec,
        fields: Vec<(String, String)>,
    ) -> Result<StreamId, StoreError> {
        let now = now_millis();
        self.upsert(
            key,
            || Value::Stream(Stream::new()),
            |entry| match &mut entry.value {
                Value::Stream(stream) => {
                    let id = stream.resolve_id(spec, now)?;
                    stream.push(id, fields);
                    Ok(id)
                }
                _ => Err(StoreError::WrongType),
            },
        )
    }

    pub fn range_stream(
        &self,
        key: &str,
        start: StreamId,
        end: StreamId,
        exclusive: bool,
        count: Option<usize>,
    ) -> Vec<StreamEntry> {
        self.read(key, |value| match value {
            Value::Stream(stream) => Some(stream.range(start, end, exclusive, count)),
            _ => None,
        })
        .unwrap_or_default()
    }

    pub fn stream_last_id(&self, key: &str) -> Option<StreamId> {
        self.read(key, |value| match value {
            Value::Stream(stream) => stream.last_id(),
            _ => None,
        })
    }

    // Sorted sets

    /// Insert or update `(score, member)` pairs. Returns how many were new.
    pub fn zadd(&self, key: &str, pairs: &[(f64, String)]) -> Result<usize, StoreError> {
        self.upsert(
            key,
            || Value::SortedSet(SortedSet::new()),
            |entry| match &mut entry.value {
                Value::SortedSet(set) => Ok(pairs
                    .iter()
                    .filter(|(score, member)| set.add(member, *score))
                    .count()),
                _ => Err(StoreError::WrongType),
            },
        )
    }

    pub fn zrem(&self, key: &str, members: &[String]) -> Result<usize, StoreError> {
        let removed = self.modify(key, |value| match value {
            Value::SortedSet(set) => Ok(members.iter().filter(|m| set.remove(m)).count()),
            _ => Err(StoreError::WrongType),
        })?;
        Ok(removed.unwrap_or(0))
    }

    pub fn zrank(&self, key: &str, member: &str) -> Option<usize> {
        self.read(key, |value| match value {
            Value::SortedSet(set) => set.rank(member),
            _ => None,
        })
    }

    pub fn zscore(&self, key: &str, member: &str) -> Option<f64> {
        self.read(key, |value| match value {
            Value::SortedSet(set) => set.score(member),
            _ => None,
        })
    }

    pub fn zrange(&self, key: &str, start: i64, end: i64) -> Vec<String> {
        self.read(key, |value| match value {
            Value::SortedSet(set) => {
                let (start, end) = resolve_range(start, end, set.len())?;
                Some(set.range(start, end))
            }
            _ => None,
        })
        .unwrap_or_default()
    }

    pub fn zcard(&self, key: &str) -> usize {
        self.read(key, |value| match value {
            Value::SortedSet(set) => Some(set.len()),
            _ => None,
        })
        .unwrap_or(0)
    }

    // Keyspace

    /// `string`, `list`, `zset`, `stream` or `none`.
    pub fn key_type(&self, key: &str) -> &'static str {
        self.read(key, |value| Some(value.type_name()))
            .unwrap_or("none")
    }

    /// Live keys matching a glob pattern (`*`, `?` and literals).
    pub fn keys(&self, pattern: &str) -> Vec<String> {
        let now = now_millis();
        let mut keys: Vec<String> = self
            .data
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .filter(|entry| glob_match(pattern.as_bytes(), entry.key().as_bytes()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Live string keys as `(key, value, expires_at)` triples.
    pub fn string_entries(&self) -> Vec<(String, String, Option<u64>)> {
        let now = now_millis();
        self.data
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .filter_map(|entry| match &entry.value().value {
                Value::String(s) => {
                    Some((entry.key().clone(), s.clone(), entry.value().expires_at))
                }
                _ => None,
            })
            .collect()
    }

    /// Number of keys, expired or not.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == b'?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == b'*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_basic_set_get() {
        let store = Store::new();
        store.set_string("key1", "value1".to_string(), None);

        assert_eq!(store.get_string("key1"), Some("value1".to_string()));
        assert_eq!(store.get_string("nonexistent"), None);
    }

    #[test]
    fn test_expiry_is_lazy_and_idempotent() {
        let store = Store::new();
        store.set_string("k", "v".to_string(), Some(now_millis() + 50));
        assert_eq!(store.get_string("k"), Some("v".to_string()));

        thread::sleep(Duration::from_millis(100));

        assert_eq!(store.get_string("k"), None);
        assert_eq!(store.get_string("k"), None);
        assert_eq!(store.key_type("k"), "none");
        assert!(store.is_empty());
    }

    #[test]
    fn test_set_clears_expiry() {
        let store = Store::new();
        store.set_string("k", "old".to_string(), Some(now_millis() + 30));
        store.set_string("k", "new".to_string(), None);
        thread::sleep(Duration::from_millis(60));
        assert_eq!(store.get_string("k"), Some("new".to_string()));
    }

    #[test]
    fn test_incr() {
        let store = Store::new();
        assert_eq!(store.incr("n"), Ok(1));
        assert_eq!(store.incr("n"), Ok(2));

        store.set_string("s", "abc".to_string(), None);
        assert_eq!(store.incr("s"), Err(StoreError::NotInteger));
        assert_eq!(store.get_string("s"), Some("abc".to_string()));

        store.set_string("max", i64::MAX.to_string(), None);
        assert_eq!(store.incr("max"), Err(StoreError::NotInteger));
    }

    #[test]
    fn test_push_and_range() {
        let store = Store::new();
        assert_eq!(store.push_right("l", &strings(&["a", "b"])), Ok(2));
        assert_eq!(store.push_left("l", &strings(&["x", "y"])), Ok(4));

        assert_eq!(store.list_range("l", 0, -1), strings(&["y", "x", "a", "b"]));
        assert_eq!(store.list_range("l", -2, -1), strings(&["a", "b"]));
        assert_eq!(store.list_range("l", -100, 1), strings(&["y", "x"]));
        assert_eq!(store.list_range("l", 2, 100), strings(&["a", "b"]));
        assert!(store.list_range("l", 3, 1).is_empty());
        assert!(store.list_range("missing", 0, -1).is_empty());
        assert_eq!(store.list_len("l"), 4);
    }

    #[test]
    fn test_pop_left_deletes_empty_list() {
        let store = Store::new();
        store.push_right("l", &strings(&["a", "b", "c"])).unwrap();

        assert_eq!(store.pop_left("l", 2).unwrap(), strings(&["a", "b"]));
        assert_eq!(store.pop_left("l", 5).unwrap(), strings(&["c"]));
        assert_eq!(store.key_type("l"), "none");
        assert!(store.pop_left("l", 1).unwrap().is_empty());
    }

    #[test]
    fn test_wrong_type_writes_and_reads() {
        let store = Store::new();
        store.set_string("s", "v".to_string(), None);

        assert_eq!(
            store.push_right("s", &strings(&["a"])),
            Err(StoreError::WrongType)
        );
        assert_eq!(store.pop_left("s", 1), Err(StoreError::WrongType));
        assert_eq!(
            store.zadd("s", &[(1.0, "m".to_string())]),
            Err(StoreError::WrongType)
        );
        // reads see another type as absent
        assert_eq!(store.list_len("s"), 0);
        assert_eq!(store.zcard("s"), 0);

        store.push_right("l", &strings(&["a"])).unwrap();
        assert_eq!(store.get_string("l"), None);
        store.set_string("l", "now a string".to_string(), None);
        assert_eq!(store.key_type("l"), "string");
    }

    #[test]
    fn test_failed_xadd_does_not_create_key() {
        let store = Store::new();
        let err = store.add_stream_entry("s", "0-0".parse().unwrap(), vec![]);
        assert_eq!(err, Err(StoreError::StreamIdZero));
        assert_eq!(store.key_type("s"), "none");
    }

    #[test]
    fn test_stream_entries() {
        let store = Store::new();
        let fields = vec![("f".to_string(), "v".to_string())];
        store
            .add_stream_entry("s", "1-1".parse().unwrap(), fields.clone())
            .unwrap();
        store
            .add_stream_entry("s", "1-2".parse().unwrap(), fields)
            .unwrap();

        assert_eq!(store.stream_last_id("s"), Some(StreamId::new(1, 2)));
        let all = store.range_stream("s", StreamId::ZERO, StreamId::MAX, false, None);
        assert_eq!(all.len(), 2);
        let after = store.range_stream("s", StreamId::new(1, 1), StreamId::MAX, true, None);
        assert_eq!(after.len(), 1);
        assert_eq!(store.key_type("s"), "stream");
    }

    #[test]
    fn test_sorted_set_operations() {
        let store = Store::new();
        assert_eq!(store.zadd("z", &[(1.0, "m1".to_string())]), Ok(1));
        assert_eq!(store.zadd("z", &[(2.0, "m2".to_string())]), Ok(1));
        assert_eq!(store.zadd("z", &[(0.5, "m2".to_string())]), Ok(0));

        assert_eq!(store.zrank("z", "m2"), Some(0));
        assert_eq!(store.zrank("z", "nope"), None);
        assert_eq!(store.zscore("z", "m2"), Some(0.5));
        assert_eq!(store.zrange("z", 0, -1), strings(&["m2", "m1"]));
        assert_eq!(store.zcard("z"), 2);

        assert_eq!(store.zrem("z", &strings(&["m1", "m2", "x"])), Ok(2));
        assert_eq!(store.key_type("z"), "none");
    }

    #[test]
    fn test_keys_glob() {
        let store = Store::new();
        for key in ["foo", "foobar", "bar", "fox"] {
            store.set_string(key, "v".to_string(), None);
        }

        assert_eq!(store.keys("*"), strings(&["bar", "foo", "foobar", "fox"]));
        assert_eq!(store.keys("fo*"), strings(&["foo", "foobar", "fox"]));
        assert_eq!(store.keys("fo?"), strings(&["foo", "fox"]));
        assert_eq!(store.keys("*bar"), strings(&["bar", "foobar"]));
        assert!(store.keys("baz").is_empty());
    }

    #[test]
    fn test_resolve_range() {
        assert_eq!(resolve_range(0, -1, 3), Some((0, 2)));
        assert_eq!(resolve_range(-5, 0, 3), Some((0, 0)));
        assert_eq!(resolve_range(5, 10, 3), None);
        assert_eq!(resolve_range(0, -1, 0), None);
        assert_eq!(resolve_range(0, -4, 3), None);
    }
}
