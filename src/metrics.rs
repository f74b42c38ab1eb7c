use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::{global, KeyValue};
use std::sync::OnceLock;
use std::time::Instant;

/// OpenTelemetry metrics for server observability.
///
/// Tracks connections, commands, blocked clients, expiry, pub/sub and
/// replication traffic. Singleton instance accessed via `Metrics::get()`.
pub struct Metrics {
    // Server-level metrics
    pub connections_total: Counter<u64>,
    pub errors_total: Counter<u64>,

    // Command-specific metrics
    pub commands_total: Counter<u64>,
    pub command_duration: Histogram<f64>,

    // Blocking operations
    pub blocked_clients_total: Counter<u64>,
    pub blocked_timeouts_total: Counter<u64>,

    // Keyspace and messaging
    pub expired_keys_total: Counter<u64>,
    pub pubsub_messages_total: Counter<u64>,

    // Replication
    pub replication_bytes_total: Counter<u64>,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

impl Metrics {
    pub fn init() -> &'static Self {
        METRICS.get_or_init(|| {
            let meter = global::meter("reef-redis");

            Metrics {
                connections_total: meter
                    .u64_counter("reef_connections_total")
                    .with_description("Total number of client connections")
                    .init(),

                errors_total: meter
                    .u64_counter("reef_errors_total")
                    .with_description("Total number of error replies and protocol errors")
                    .init(),

                commands_total: meter
                    .u64_counter("reef_commands_total")
                    .with_description("Total number of commands executed")
                    .init(),

                command_duration: meter
                    .f64_histogram("reef_command_duration_seconds")
                    .with_description("Command execution duration in seconds")
                    .init(),

                blocked_clients_total: meter
                    .u64_counter("reef_blocked_clients_total")
                    .with_description("Total number of clients parked by a blocking command")
                    .init(),

                blocked_timeouts_total: meter
                    .u64_counter("reef_blocked_timeouts_total")
                    .with_description("Total number of blocked clients released by timeout")
                    .init(),

                expired_keys_total: meter
                    .u64_counter("reef_expired_keys_total")
                    .with_description("Total number of expired keys removed")
                    .init(),

                pubsub_messages_total: meter
                    .u64_counter("reef_pubsub_messages_total")
                    .with_description("Total number of messages delivered to subscribers")
                    .init(),

                replication_bytes_total: meter
                    .u64_counter("reef_replication_bytes_total")
                    .with_description("Total number of command bytes propagated to followers")
                    .init(),
            }
        })
    }

    pub fn get() -> &'static Self {
        METRICS.get().unwrap_or_else(|| {
            // For tests, initialize with defaults if not already initialized
            Self::init()
        })
    }

    pub fn record_command(&self, command: &str, duration: f64) {
        let labels = &[KeyValue::new("command", command.to_string())];
        self.commands_total.add(1, labels);
        self.command_duration.record(duration, labels);
    }

    pub fn record_error(&self, error_type: &str, command: Option<&str>) {
        let mut labels = vec![KeyValue::new("error_type", error_type.to_string())];
        if let Some(cmd) = command {
            labels.push(KeyValue::new("command", cmd.to_string()));
        }
        self.errors_total.add(1, &labels);
    }

    pub fn increment_connections(&self) {
        self.connections_total.add(1, &[]);
    }

    pub fn record_blocked(&self, kind: &'static str) {
        self.blocked_clients_total
            .add(1, &[KeyValue::new("kind", kind)]);
    }

    pub fn record_blocked_timeouts(&self, count: u64) {
        self.blocked_timeouts_total.add(count, &[]);
    }

    pub fn record_expired_key(&self) {
        self.expired_keys_total.add(1, &[]);
    }

    pub fn record_published(&self, receivers: u64) {
        self.pubsub_messages_total.add(receivers, &[]);
    }

    pub fn record_replication_bytes(&self, bytes: u64) {
        self.replication_bytes_total.add(bytes, &[]);
    }
}

// Timer utility for measuring durations
pub struct Timer {
    start: Instant,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_singleton() {
        let a = Metrics::get() as *const Metrics;
        let b = Metrics::init() as *const Metrics;
        assert_eq!(a, b);

        // recording against the no-op global meter must not panic
        Metrics::get().record_command("PING", 0.001);
        Metrics::get().record_blocked("list");
        Metrics::get().record_error("wrong_arity", Some("GET"));
    }

    #[test]
    fn test_timer_is_monotonic() {
        let timer = Timer::new();
        let first = timer.elapsed_seconds();
        assert!(timer.elapsed_seconds() >= first);
    }
}
