//! Single-leader replication.
//!
//! A leader counts every propagated byte in its offset and streams write
//! commands to followers. A follower performs the PSYNC handshake and then
//! applies the leader's stream, counting the same bytes.

pub mod follower;
pub mod leader;

pub use follower::{run_follower, Handshake, HandshakePhase};
pub use leader::LeaderState;

use crate::config::LeaderAddr;
use crate::protocol::Command;
use rand::Rng;
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// 40 lowercase hex characters.
pub fn generate_replid() -> String {
    let bytes: [u8; 20] = rand::thread_rng().gen();
    bytes.iter().fold(String::with_capacity(40), |mut out, b| {
        let _ = write!(out, "{:02x}", b);
        out
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower(LeaderAddr),
}

pub struct Replication {
    role: Role,
    leader: LeaderState,
    follower_offset: AtomicU64,
    link_up: AtomicBool,
}

impl Replication {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            leader: LeaderState::new(),
            follower_offset: AtomicU64::new(0),
            link_up: AtomicBool::new(false),
        }
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    pub fn leader(&self) -> &LeaderState {
        &self.leader
    }

    /// Forward a successful write. Followers never propagate.
    pub fn propagate(&self, command: &Command) {
        if self.is_leader() {
            self.leader.propagate(command);
        }
    }

    pub fn follower_offset(&self) -> u64 {
        self.follower_offset.load(Ordering::SeqCst)
    }

    pub fn set_follower_offset(&self, offset: u64) {
        self.follower_offset.store(offset, Ordering::SeqCst);
    }

    pub fn advance_follower_offset(&self, bytes: u64) -> u64 {
        self.follower_offset.fetch_add(bytes, Ordering::SeqCst) + bytes
    }

    pub fn set_link_up(&self, up: bool) {
        self.link_up.store(up, Ordering::SeqCst);
    }

    /// Body of `INFO replication`.
    pub fn info(&self) -> String {
        let mut lines = vec!["# Replication".to_string()];
        match &self.role {
            Role::Leader => {
                lines.push("role:master".to_string());
                lines.push(format!("connected_slaves:{}", self.leader.follower_count()));
                for (i, follower) in self.leader.followers().iter().enumerate() {
                    lines.push(format!(
                        "slave{}:port={},offset={}",
                        i, follower.listening_port, follower.acked_offset
                    ));
                }
                lines.push(format!("master_replid:{}", self.leader.replid()));
                lines.push(format!("master_repl_offset:{}", self.leader.offset()));
            }
            Role::Follower(addr) => {
                let status = if self.link_up.load(Ordering::SeqCst) {
                    "up"
                } else {
                    "down"
                };
                lines.push("role:slave".to_string());
                lines.push(format!("master_host:{}", addr.host));
                lines.push(format!("master_port:{}", addr.port));
                lines.push(format!("master_link_status:{}", status));
                lines.push(format!("master_replid:{}", self.leader.replid()));
                lines.push(format!("master_repl_offset:{}", self.follower_offset()));
            }
        }
        lines.join("\r\n")
    }
}
