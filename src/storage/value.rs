use super::sorted_set::SortedSet;
use super::stream::Stream;
use std::collections::VecDeque;

/// The typed value held by one key.
#[derive(Debug, Clone)]
pub enum Value {
    String(String),
    List(VecDeque<String>),
    SortedSet(SortedSet),
    Stream(Stream),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::SortedSet(_) => "zset",
            Value::Stream(_) => "stream",
        }
    }

    /// Collections are deleted once they hold nothing.
    pub fn is_empty_collection(&self) -> bool {
        match self {
            Value::String(_) => false,
            Value::List(list) => list.is_empty(),
            Value::SortedSet(set) => set.is_empty(),
            Value::Stream(stream) => stream.is_empty(),
        }
    }
}

/// A value with an optional absolute expiry in unix milliseconds.
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Value,
    pub expires_at: Option<u64>,
}

impl Entry {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    pub fn with_expiry(value: Value, expires_at: Option<u64>) -> Self {
        Self { value, expires_at }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.expires_at, Some(at) if now_ms > at)
    }
}
