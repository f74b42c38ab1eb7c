//! Append-only streams with `<ms>-<seq>` entry IDs.

use super::StoreError;
use crate::protocol::RespValue;
use std::fmt;
use std::str::FromStr;

/// Entry ID ordered by (milliseconds, sequence).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const ZERO: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// Parse a range bound. A bare millisecond value takes `default_seq`.
    pub fn parse_bound(s: &str, default_seq: u64) -> Result<Self, StoreError> {
        match s.split_once('-') {
            Some((ms, seq)) => Ok(Self::new(parse_part(ms)?, parse_part(seq)?)),
            None => Ok(Self::new(parse_part(s)?, default_seq)),
        }
    }
}

fn parse_part(s: &str) -> Result<u64, StoreError> {
    s.parse::<u64>().map_err(|_| StoreError::InvalidStreamId)
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for StreamId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_bound(s, 0)
    }
}

/// The ID argument of XADD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSpec {
    /// `*`: current time, next sequence within that millisecond.
    Auto,
    /// `<ms>-*`: next sequence within the given millisecond.
    AutoSeq(u64),
    Explicit(StreamId),
}

impl FromStr for IdSpec {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "*" {
            return Ok(IdSpec::Auto);
        }
        match s.split_once('-') {
            Some((ms, "*")) => Ok(IdSpec::AutoSeq(parse_part(ms)?)),
            _ => Ok(IdSpec::Explicit(s.parse()?)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: Vec<(String, String)>,
}

impl From<&StreamEntry> for RespValue {
    /// `[id, [field, value, ...]]`
    fn from(entry: &StreamEntry) -> Self {
        let fields = entry
            .fields
            .iter()
            .flat_map(|(f, v)| [f.clone(), v.clone()]);
        RespValue::array(vec![
            RespValue::bulk(entry.id.to_string()),
            RespValue::bulk_array(fields),
        ])
    }
}

/// `[[key, [entry, ...]], ...]` as returned by XREAD.
pub fn read_reply(results: &[(String, Vec<StreamEntry>)]) -> RespValue {
    RespValue::array(
        results
            .iter()
            .map(|(key, entries)| {
                RespValue::array(vec![
                    RespValue::bulk(key.clone()),
                    RespValue::array(entries.iter().map(RespValue::from).collect()),
                ])
            })
            .collect(),
    )
}

#[derive(Debug, Clone, Default)]
pub struct Stream {
    entries: Vec<StreamEntry>,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_id(&self) -> Option<StreamId> {
        self.entries.last().map(|e| e.id)
    }

    /// Resolve an ID spec against the current top of the stream.
    pub fn resolve_id(&self, spec: IdSpec, now_ms: u64) -> Result<StreamId, StoreError> {
        let last = self.last_id();
        let id = match spec {
            IdSpec::Explicit(id) => id,
            IdSpec::AutoSeq(ms) => StreamId::new(ms, self.next_seq(ms)),
            IdSpec::Auto => match last {
                // clock went backwards: keep IDs increasing
                Some(last) if last.ms >= now_ms => StreamId::new(
                    last.ms,
                    last.seq.checked_add(1).ok_or(StoreError::StreamIdTooSmall)?,
                ),
                _ => StreamId::new(now_ms, self.next_seq(now_ms)),
            },
        };

        if id == StreamId::ZERO {
            return Err(StoreError::StreamIdZero);
        }
        if matches!(last, Some(last) if id <= last) {
            return Err(StoreError::StreamIdTooSmall);
        }
        Ok(id)
    }

    fn next_seq(&self, ms: u64) -> u64 {
        match self.last_id() {
            Some(last) if last.ms == ms => last.seq.saturating_add(1),
            _ if ms == 0 => 1,
            _ => 0,
        }
    }

    /// Append with a previously validated ID.
    pub fn push(&mut self, id: StreamId, fields: Vec<(String, String)>) {
        self.entries.push(StreamEntry { id, fields });
    }

    /// Entries with `start <= id <= end`, or `start < id` when `exclusive`.
    pub fn range(
        &self,
        start: StreamId,
        end: StreamId,
        exclusive: bool,
        count: Option<usize>,
    ) -> Vec<StreamEntry> {
        let first = self
            .entries
            .partition_point(|e| if exclusive { e.id <= start } else { e.id < start });
        self.entries[first..]
            .iter()
            .take_while(|e| e.id <= end)
            .take(count.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}
