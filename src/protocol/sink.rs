use super::RespValue;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Write side of a connection.
///
/// Replies, blocked-client wakeups, pub/sub messages and replication traffic
/// all go through the same channel, so everything a client receives is
/// ordered by when it was sent. A discarding sink drops everything.
#[derive(Debug, Clone)]
pub struct ReplySink {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
}

impl ReplySink {
    /// Create a sink and the receiver a writer task drains into the socket.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn discard() -> Self {
        Self { tx: None }
    }

    /// Returns false once the receiving side is gone.
    pub fn send(&self, value: &RespValue) -> bool {
        self.send_raw(Bytes::from(value.to_bytes()))
    }

    pub fn send_raw(&self, bytes: Bytes) -> bool {
        match &self.tx {
            Some(tx) => tx.send(bytes).is_ok(),
            None => true,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(false, |tx| tx.is_closed())
    }
}
