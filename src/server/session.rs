use crate::error::CommandError;
use crate::protocol::{Command, ReplySink};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

pub type SessionId = u64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Per-connection state, created on connect and dropped on disconnect.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub sink: ReplySink,
    /// Set while EXEC replays queued commands.
    pub executing: bool,
    /// Set by QUIT.
    pub closing: bool,
    transaction: Option<Vec<Command>>,
    channels: HashSet<String>,
}

impl Session {
    pub fn new(sink: ReplySink) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            sink,
            executing: false,
            closing: false,
            transaction: None,
            channels: HashSet::new(),
        }
    }

    /// Session for the connection a follower holds to its leader. Replies
    /// are discarded; the follower writes its own REPLCONF answers.
    pub fn leader_link() -> Self {
        Self::new(ReplySink::discard())
    }

    // Transactions

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    pub fn begin_transaction(&mut self) -> Result<(), CommandError> {
        if self.transaction.is_some() {
            return Err(CommandError::NestedMulti);
        }
        self.transaction = Some(Vec::new());
        Ok(())
    }

    pub fn enqueue(&mut self, command: Command) {
        if let Some(queue) = self.transaction.as_mut() {
            queue.push(command);
        }
    }

    /// Take the queued commands in FIFO order and leave transaction mode.
    pub fn drain_transaction(&mut self) -> Option<Vec<Command>> {
        self.transaction.take()
    }

    /// Returns false when no transaction was open.
    pub fn discard_transaction(&mut self) -> bool {
        self.transaction.take().is_some()
    }

    // Pub/sub

    pub fn is_subscribed(&self) -> bool {
        !self.channels.is_empty()
    }

    /// Returns the subscription count after subscribing.
    pub fn subscribe(&mut self, channel: &str) -> usize {
        self.channels.insert(channel.to_string());
        self.channels.len()
    }

    /// Returns the subscription count after unsubscribing.
    pub fn unsubscribe(&mut self, channel: &str) -> usize {
        self.channels.remove(channel);
        self.channels.len()
    }

    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.channels.iter().cloned().collect();
        channels.sort();
        channels
    }
}
