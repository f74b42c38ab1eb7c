//! Blocking operations coordinator.
//!
//! Clients blocked in BLPOP or XREAD BLOCK are parked here as waiters holding
//! their reply sink. A waiter ends exactly once: either data arrives (a push
//! or append notifies the coordinator) or the periodic sweep finds its
//! deadline passed. Each collection is guarded by one lock, so registration,
//! notification and the sweep never interleave on the same collection.

use crate::metrics::Metrics;
use crate::protocol::{ReplySink, RespValue};
use crate::server::session::SessionId;
use crate::storage::stream::{self, StreamEntry};
use crate::storage::{now_millis, Store, StoreError, StreamId};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace};

struct ListWaiter {
    session: SessionId,
    key: String,
    /// Absolute unix milliseconds; None waits forever.
    deadline: Option<u64>,
    sink: ReplySink,
}

struct StreamWaiter {
    session: SessionId,
    keys: Vec<String>,
    /// Exclusive start ID per key, aligned with `keys`.
    starts: Vec<StreamId>,
    count: Option<usize>,
    deadline: Option<u64>,
    sink: ReplySink,
}

impl StreamWaiter {
    fn watches(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }
}

fn is_due(deadline: Option<u64>, now: u64) -> bool {
    matches!(deadline, Some(at) if now >= at)
}

/// Streams among `keys` with entries after their start ID.
pub fn collect_stream_entries(
    store: &Store,
    keys: &[String],
    starts: &[StreamId],
    count: Option<usize>,
) -> Vec<(String, Vec<StreamEntry>)> {
    keys.iter()
        .zip(starts)
        .filter_map(|(key, start)| {
            let entries = store.range_stream(key, *start, StreamId::MAX, true, count);
            (!entries.is_empty()).then(|| (key.clone(), entries))
        })
        .collect()
}

pub struct BlockingCoordinator {
    store: Arc<Store>,
    list_waiters: Mutex<Vec<ListWaiter>>,
    stream_waiters: Mutex<Vec<StreamWaiter>>,
}

impl BlockingCoordinator {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            list_waiters: Mutex::new(Vec::new()),
            stream_waiters: Mutex::new(Vec::new()),
        }
    }

    /// Pop the head of `key` now, or park the caller until a push or the
    /// deadline. Returns the popped element when it was served immediately.
    pub async fn block_list_pop(
        &self,
        session: SessionId,
        key: &str,
        deadline: Option<u64>,
        sink: ReplySink,
    ) -> Result<Option<String>, StoreError> {
        let mut waiters = self.list_waiters.lock().await;

        // data may have arrived between the caller's check and this lock
        let queued_ahead = waiters.iter().any(|w| w.key == key);
        if !queued_ahead {
            if let Some(value) = self.store.pop_left(key, 1)?.pop() {
                return Ok(Some(value));
            }
        }

        debug!(session, key, ?deadline, "Client blocked on list");
        Metrics::get().record_blocked("list");
        waiters.push(ListWaiter {
            session,
            key: key.to_string(),
            deadline,
            sink,
        });
        Ok(None)
    }

    /// Serve the oldest waiter on `key` with one popped element. Returns the
    /// element handed out, or None when nobody was served.
    pub async fn notify_list_push(&self, key: &str) -> Option<String> {
        let mut waiters = self.list_waiters.lock().await;
        waiters.retain(|w| !w.sink.is_closed());

        let index = waiters.iter().position(|w| w.key == key)?;
        let value = self.store.pop_left(key, 1).ok()?.pop()?;
        let waiter = waiters.remove(index);

        trace!(session = waiter.session, key, "Woke list waiter");
        waiter
            .sink
            .send(&RespValue::bulk_array([key.to_string(), value.clone()]));
        Some(value)
    }

    /// Read entries after `starts` now, or park the caller until an append or
    /// the deadline. Returns the reply when data was already available.
    pub async fn block_stream_read(
        &self,
        session: SessionId,
        keys: Vec<String>,
        starts: Vec<StreamId>,
        count: Option<usize>,
        deadline: Option<u64>,
        sink: ReplySink,
    ) -> Option<RespValue> {
        let mut waiters = self.stream_waiters.lock().await;

        let results = collect_stream_entries(&self.store, &keys, &starts, count);
        if !results.is_empty() {
            return Some(stream::read_reply(&results));
        }

        debug!(session, ?keys, ?deadline, "Client blocked on streams");
        Metrics::get().record_blocked("stream");
        waiters.push(StreamWaiter {
            session,
            keys,
            starts,
            count,
            deadline,
            sink,
        });
        None
    }

    /// Serve every waiter watching `key` that now has data, oldest first.
    /// Reads do not consume entries, so one append can wake several waiters.
    pub async fn notify_stream_append(&self, key: &str) -> usize {
        let mut waiters = self.stream_waiters.lock().await;
        waiters.retain(|w| !w.sink.is_closed());

        let mut served = 0;
        let mut index = 0;
        while index < waiters.len() {
            let waiter = &waiters[index];
            if !waiter.watches(key) {
                index += 1;
                continue;
            }
            let results =
                collect_stream_entries(&self.store, &waiter.keys, &waiter.starts, waiter.count);
            if results.is_empty() {
                index += 1;
                continue;
            }
            let waiter = waiters.remove(index);
            trace!(session = waiter.session, key, "Woke stream waiter");
            waiter.sink.send(&stream::read_reply(&results));
            served += 1;
        }
        served
    }

    /// Reply null to every waiter whose deadline is at or before `now`.
    pub async fn sweep_timeouts(&self, now: u64) -> usize {
        let null = RespValue::null();
        let mut expired = 0;

        {
            let mut waiters = self.list_waiters.lock().await;
            waiters.retain(|w| {
                if is_due(w.deadline, now) {
                    w.sink.send(&null);
                    expired += 1;
                    false
                } else {
                    true
                }
            });
        }
        {
            let mut waiters = self.stream_waiters.lock().await;
            waiters.retain(|w| {
                if is_due(w.deadline, now) {
                    w.sink.send(&null);
                    expired += 1;
                    false
                } else {
                    true
                }
            });
        }

        if expired > 0 {
            debug!(expired, "Blocked clients timed out");
            Metrics::get().record_blocked_timeouts(expired as u64);
        }
        expired
    }

    pub async fn sweep_now(&self) -> usize {
        self.sweep_timeouts(now_millis()).await
    }

    /// Forget every waiter of a disconnected session.
    pub async fn drop_session(&self, session: SessionId) {
        self.list_waiters
            .lock()
            .await
            .retain(|w| w.session != session);
        self.stream_waiters
            .lock()
            .await
            .retain(|w| w.session != session);
    }

    pub async fn waiter_counts(&self) -> (usize, usize) {
        (
            self.list_waiters.lock().await.len(),
            self.stream_waiters.lock().await.len(),
        )
    }
}
