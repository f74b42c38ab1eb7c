use crate::metrics::Metrics;
use crate::protocol::{ReplySink, RespValue};
use crate::server::session::SessionId;
use dashmap::DashMap;
use std::collections::HashMap;

/// Channel → subscriber registry.
///
/// Subscription counts per session live on the session itself; this only
/// maps channels to the sinks messages are fanned out to.
#[derive(Default)]
pub struct PubSub {
    channels: DashMap<String, HashMap<SessionId, ReplySink>>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, session: SessionId, channel: &str, sink: ReplySink) {
        self.channels
            .entry(channel.to_string())
            .or_default()
            .insert(session, sink);
    }

    pub fn unsubscribe(&self, session: SessionId, channel: &str) {
        if let Some(mut subscribers) = self.channels.get_mut(channel) {
            subscribers.remove(&session);
        }
        self.channels
            .remove_if(channel, |_, subscribers| subscribers.is_empty());
    }

    /// Deliver `[message, channel, payload]` to every subscriber. Returns the
    /// number of subscribers it was sent to.
    pub fn publish(&self, channel: &str, message: &str) -> usize {
        let Some(subscribers) = self.channels.get(channel) else {
            return 0;
        };
        let payload = RespValue::bulk_array(["message", channel, message]);
        let delivered = subscribers
            .values()
            .filter(|sink| sink.send(&payload))
            .count();
        Metrics::get().record_published(delivered as u64);
        delivered
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, |s| s.len())
    }

    /// Remove a session from the given channels. Idempotent.
    pub fn drop_session<'a>(
        &self,
        session: SessionId,
        channels: impl IntoIterator<Item = &'a String>,
    ) {
        for channel in channels {
            self.unsubscribe(session, channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_fans_out() {
        let pubsub = PubSub::new();
        let (a, mut rx_a) = ReplySink::channel();
        let (b, mut rx_b) = ReplySink::channel();
        pubsub.subscribe(1, "news", a);
        pubsub.subscribe(2, "news", b);

        assert_eq!(pubsub.subscriber_count("news"), 2);
        assert_eq!(pubsub.publish("news", "hi"), 2);

        let expected = b"*3\r\n$7\r\nmessage\r\n$4\r\nnews\r\n$2\r\nhi\r\n";
        assert_eq!(&rx_a.recv().await.unwrap()[..], expected);
        assert_eq!(&rx_b.recv().await.unwrap()[..], expected);
    }

    #[test]
    fn test_drop_session_is_idempotent() {
        let pubsub = PubSub::new();
        pubsub.subscribe(1, "a", ReplySink::discard());
        let channels = vec!["a".to_string()];

        pubsub.drop_session(1, &channels);
        pubsub.drop_session(1, &channels);
        assert_eq!(pubsub.subscriber_count("a"), 0);
        assert_eq!(pubsub.publish("a", "x"), 0);
    }
}
