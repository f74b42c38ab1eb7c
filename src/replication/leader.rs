//! Leader side of replication: follower registry, offset and WAIT.

use super::generate_replid;
use crate::metrics::Metrics;
use crate::protocol::{Command, ReplySink};
use crate::server::session::SessionId;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct Follower {
    pub sink: ReplySink,
    pub listening_port: u16,
    pub acked_offset: u64,
    /// Set once PSYNC has been answered; propagation starts here.
    pub streaming: bool,
}

pub struct LeaderState {
    replid: String,
    offset: AtomicU64,
    followers: DashMap<SessionId, Follower>,
    acks: AtomicUsize,
    ack_target: AtomicU64,
}

impl Default for LeaderState {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaderState {
    pub fn new() -> Self {
        Self {
            replid: generate_replid(),
            offset: AtomicU64::new(0),
            followers: DashMap::new(),
            acks: AtomicUsize::new(0),
            ack_target: AtomicU64::new(0),
        }
    }

    pub fn replid(&self) -> &str {
        &self.replid
    }

    /// Bytes of write traffic produced so far.
    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }

    pub fn follower_count(&self) -> usize {
        self.followers.len()
    }

    pub fn register_follower(&self, session: SessionId, listening_port: u16, sink: ReplySink) {
        info!(session, listening_port, "Follower registered");
        self.followers.insert(
            session,
            Follower {
                sink,
                listening_port,
                acked_offset: 0,
                streaming: false,
            },
        );
    }

    /// Mark a follower ready to receive propagated commands. Returns false
    /// when the session never registered.
    pub fn start_streaming(&self, session: SessionId) -> bool {
        match self.followers.get_mut(&session) {
            Some(mut follower) => {
                follower.streaming = true;
                true
            }
            None => false,
        }
    }

    pub fn remove_follower(&self, session: SessionId) {
        if self.followers.remove(&session).is_some() {
            info!(session, "Follower disconnected");
        }
    }

    pub fn followers(&self) -> Vec<Follower> {
        self.followers.iter().map(|f| f.value().clone()).collect()
    }

    /// Send a command to every streaming follower and account its bytes.
    pub fn propagate(&self, command: &Command) {
        let bytes = command.encode();
        let len = bytes.len() as u64;
        self.offset.fetch_add(len, Ordering::SeqCst);

        for follower in self.followers.iter().filter(|f| f.streaming) {
            follower.sink.send_raw(bytes.clone());
        }

        Metrics::get().record_replication_bytes(len);
        debug!(command = command.name(), offset = self.offset(), "Propagated");
    }

    /// Handle `REPLCONF ACK <offset>`.
    pub fn record_ack(&self, session: SessionId, offset: u64) {
        if let Some(mut follower) = self.followers.get_mut(&session) {
            follower.acked_offset = offset;
        }
        if offset >= self.ack_target.load(Ordering::SeqCst) {
            self.acks.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Wait until `needed` followers acknowledge the current offset or the
    /// timeout passes. A zero timeout waits without deadline.
    pub async fn wait_for_acks(&self, needed: usize, timeout_ms: u64, poll: Duration) -> usize {
        let followers = self.follower_count();
        if followers == 0 {
            return 0;
        }
        if self.offset() == 0 {
            return followers;
        }

        self.ack_target.store(self.offset(), Ordering::SeqCst);
        self.acks.store(0, Ordering::SeqCst);
        self.propagate(&Command::new("REPLCONF", ["GETACK", "*"]));

        let deadline =
            (timeout_ms > 0).then(|| Instant::now() + Duration::from_millis(timeout_ms));
        loop {
            let acks = self.acks.load(Ordering::SeqCst);
            if acks >= needed {
                return acks;
            }
            if matches!(deadline, Some(at) if Instant::now() >= at) {
                return acks;
            }
            tokio::time::sleep(poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const POLL: Duration = Duration::from_millis(5);

    #[test]
    fn test_propagation_counts_bytes_and_reaches_streaming_followers() {
        let leader = LeaderState::new();
        let (ready, mut rx_ready) = ReplySink::channel();
        let (pending, mut rx_pending) = ReplySink::channel();
        leader.register_follower(1, 6380, ready);
        leader.register_follower(2, 6381, pending);
        assert!(leader.start_streaming(1));
        assert!(!leader.start_streaming(99));

        let set = Command::new("SET", ["foo", "bar"]);
        leader.propagate(&set);

        assert_eq!(leader.offset(), set.encode().len() as u64);
        assert_eq!(rx_ready.try_recv().unwrap(), set.encode());
        assert!(rx_pending.try_recv().is_err());
        assert_eq!(leader.follower_count(), 2);
    }

    #[tokio::test]
    async fn test_wait_without_followers_or_writes() {
        let leader = LeaderState::new();
        assert_eq!(leader.wait_for_acks(1, 100, POLL).await, 0);

        leader.register_follower(1, 6380, ReplySink::discard());
        leader.register_follower(2, 6381, ReplySink::discard());
        assert_eq!(leader.wait_for_acks(5, 100, POLL).await, 2);
    }

    #[tokio::test]
    async fn test_wait_times_out_with_partial_acks() {
        let leader = LeaderState::new();
        leader.register_follower(1, 6380, ReplySink::discard());
        leader.start_streaming(1);
        leader.propagate(&Command::new("SET", ["a", "1"]));

        let started = Instant::now();
        assert_eq!(leader.wait_for_acks(1, 50, POLL).await, 0);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_wait_counts_acks_at_or_above_target() {
        let leader = Arc::new(LeaderState::new());
        let (sink, mut rx) = ReplySink::channel();
        leader.register_follower(1, 6380, sink);
        leader.start_streaming(1);
        leader.register_follower(2, 6381, ReplySink::discard());
        leader.start_streaming(2);

        let set = Command::new("SET", ["a", "1"]);
        leader.propagate(&set);
        let target = leader.offset();
        assert_eq!(rx.recv().await.unwrap(), set.encode());

        let waiter = {
            let leader = leader.clone();
            tokio::spawn(async move { leader.wait_for_acks(2, 0, POLL).await })
        };

        let getack = rx.recv().await.unwrap();
        assert_eq!(&getack[..], b"*3\r\n$8\r\nREPLCONF\r\n$6\r\nGETACK\r\n$1\r\n*\r\n");

        leader.record_ack(1, target - 1); // stale
        leader.record_ack(1, target);
        leader.record_ack(2, target + 37);

        assert_eq!(waiter.await.unwrap(), 2);
        assert_eq!(leader.offset(), target + getack.len() as u64);
    }
}
