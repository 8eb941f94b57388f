use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::KeyValue;

/// OTel counters for queue traffic. Created once per `Queue`; every
/// instrument is labelled with the queue (collection) name.
#[derive(Clone)]
pub struct Metrics {
    pub messages_written: Counter<u64>,
    pub messages_deduplicated: Counter<u64>,
    pub messages_read: Counter<u64>,
    pub messages_leased: Counter<u64>,
    pub messages_self_expired: Counter<u64>,
    pub messages_acked: Counter<u64>,
    pub backpressure_waits: Counter<u64>,
    pub polling_timeouts: Counter<u64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create metrics from the global meter provider. If no meter provider
    /// is configured, the instruments are no-op.
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("ringq");
        Self::from_meter(&meter)
    }

    /// Create metrics from a specific meter (used in tests with in-memory exporter).
    pub fn from_meter(meter: &Meter) -> Self {
        Self {
            messages_written: meter
                .u64_counter("ringq.messages.written")
                .with_description("Messages durably inserted")
                .build(),
            messages_deduplicated: meter
                .u64_counter("ringq.messages.deduplicated")
                .with_description("Writes rejected because the unique key already existed")
                .build(),
            messages_read: meter
                .u64_counter("ringq.messages.read")
                .with_description("Messages returned to consumers")
                .build(),
            messages_leased: meter
                .u64_counter("ringq.messages.leased")
                .with_description("Documents claimed by leasing reads")
                .build(),
            messages_self_expired: meter
                .u64_counter("ringq.messages.self_expired")
                .with_description("Fetched documents dropped because their TTL had passed")
                .build(),
            messages_acked: meter
                .u64_counter("ringq.messages.acked")
                .with_description("Messages acknowledged")
                .build(),
            backpressure_waits: meter
                .u64_counter("ringq.backpressure.waits")
                .with_description("Writes that ran the queue length check")
                .build(),
            polling_timeouts: meter
                .u64_counter("ringq.polling.timeouts")
                .with_description("Blocking waits that gave up at their timeout")
                .build(),
        }
    }

    fn labels(queue: &str) -> [KeyValue; 1] {
        [KeyValue::new("queue", queue.to_string())]
    }

    pub fn record_written(&self, queue: &str) {
        self.messages_written.add(1, &Self::labels(queue));
    }

    pub fn record_deduplicated(&self, queue: &str) {
        self.messages_deduplicated.add(1, &Self::labels(queue));
    }

    pub fn record_read(&self, queue: &str, count: u64) {
        self.messages_read.add(count, &Self::labels(queue));
    }

    pub fn record_leased(&self, queue: &str, count: u64) {
        self.messages_leased.add(count, &Self::labels(queue));
    }

    pub fn record_self_expired(&self, queue: &str, count: u64) {
        self.messages_self_expired.add(count, &Self::labels(queue));
    }

    pub fn record_acked(&self, queue: &str, count: u64) {
        self.messages_acked.add(count, &Self::labels(queue));
    }

    pub fn record_backpressure_wait(&self, queue: &str) {
        self.backpressure_waits.add(1, &Self::labels(queue));
    }

    pub fn record_polling_timeout(&self, queue: &str) {
        self.polling_timeouts.add(1, &Self::labels(queue));
    }
}
