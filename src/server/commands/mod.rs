//! Command implementations, grouped by data type. Each file extends
//! [`Handler`](super::Handler) with the `handle_*` methods for its group.

mod admin;
mod connection;
mod keyspace;
mod lists;
mod pubsub;
mod replication;
mod sorted_sets;
mod streams;
mod strings;
mod transactions;

use crate::error::CommandError;
use crate::storage::now_millis;

pub(super) fn parse_i64(s: &str) -> Result<i64, CommandError> {
    s.parse().map_err(|_| CommandError::NotInteger)
}

pub(super) fn parse_u64(s: &str) -> Result<u64, CommandError> {
    s.parse().map_err(|_| CommandError::NotInteger)
}

pub(super) fn parse_f64(s: &str) -> Result<f64, CommandError> {
    match s.parse::<f64>() {
        Ok(v) if !v.is_nan() => Ok(v),
        _ => Err(CommandError::NotFloat),
    }
}

/// Absolute deadline for a blocking timeout in milliseconds. Zero blocks
/// forever.
pub(super) fn deadline_after(timeout_ms: u64) -> Option<u64> {
    (timeout_ms > 0).then(|| now_millis().saturating_add(timeout_ms))
}
