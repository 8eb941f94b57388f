//! The queue façade: writes, reads, acknowledgements and the blocking waits
//! in front of them.
//!
//! A `Queue` holds no mutable state of its own. Any number of `Queue` values,
//! in any number of threads, may share one store; they coordinate only through
//! `find_one_and_update` (claims) and `insert_if_absent` (deduplication).

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::{duration_ns, Clock, SystemClock};
use crate::config::QueueConfig;
use crate::document::{
    Document, Meta, EXPIRED_PATH, ID_FIELD, META_FIELD, ROUTING_KEY_PATH, VISIBLE_AFTER_PATH,
};
use crate::error::{QueueError, QueueResult, StorageError, StorageResult};
use crate::message::Message;
use crate::metrics::Metrics;
use crate::poll::{self, PollPolicy, WaitOutcome};
use crate::storage::{DocumentStore, Filter, Update};

/// Make writers wait while their partition is too long.
#[derive(Debug, Clone, PartialEq)]
pub struct Backpressure {
    /// Block until at most this many messages are deliverable.
    pub threshold: usize,
    /// Fraction of writes that run the check. `None` checks every write.
    pub check_probability: Option<f64>,
    pub polling: PollPolicy,
}

impl Backpressure {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            check_probability: None,
            polling: PollPolicy::default(),
        }
    }

    pub fn with_check_probability(mut self, probability: f64) -> Self {
        self.check_probability = Some(probability);
        self
    }

    pub fn with_polling(mut self, polling: PollPolicy) -> Self {
        self.polling = polling;
        self
    }
}

/// Options for `Queue::write`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOptions {
    pub routing_key: Option<String>,
    /// Time-to-live after which readers stop returning the message.
    pub expire: Option<Duration>,
    /// Dotted field path whose value must be unique in the collection.
    pub unique_key: Option<String>,
    /// Delay before the message becomes visible.
    pub visibility_timeout: Option<Duration>,
    pub backpressure: Option<Backpressure>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    pub fn with_expire(mut self, expire: Duration) -> Self {
        self.expire = Some(expire);
        self
    }

    pub fn with_unique_key(mut self, field_path: impl Into<String>) -> Self {
        self.unique_key = Some(field_path.into());
        self
    }

    pub fn with_visibility_timeout(mut self, delay: Duration) -> Self {
        self.visibility_timeout = Some(delay);
        self
    }

    pub fn with_backpressure(mut self, backpressure: Backpressure) -> Self {
        self.backpressure = Some(backpressure);
        self
    }
}

/// Options for `Queue::read`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOptions {
    pub routing_key: Option<String>,
    /// Upper bound on the batch size.
    pub messages_read: usize,
    /// `Some` claims each message for this long; `None` peeks without claiming.
    pub visibility_timeout: Option<Duration>,
    /// `Some` waits for a deliverable message before fetching.
    pub block: Option<PollPolicy>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            routing_key: None,
            messages_read: Self::DEFAULT_MESSAGES_READ,
            visibility_timeout: None,
            block: None,
        }
    }
}

impl ReadOptions {
    pub const DEFAULT_MESSAGES_READ: usize = 10;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    pub fn with_messages_read(mut self, messages_read: usize) -> Self {
        self.messages_read = messages_read;
        self
    }

    /// Lease the returned messages for `lease`.
    pub fn with_visibility_timeout(mut self, lease: Duration) -> Self {
        self.visibility_timeout = Some(lease);
        self
    }

    pub fn blocking(mut self, polling: PollPolicy) -> Self {
        self.block = Some(polling);
        self
    }
}

/// Empty routing keys address the unrouted partition.
fn partition(routing_key: &Option<String>) -> Option<&str> {
    routing_key.as_deref().filter(|k| !k.is_empty())
}

/// Bounded, at-least-once message queue over one collection of a `DocumentStore`.
pub struct Queue {
    store: Arc<dyn DocumentStore>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl Queue {
    /// Indexes provisioned on the backing collection.
    pub const INDEXED_FIELDS: [&'static str; 4] =
        [ID_FIELD, ROUTING_KEY_PATH, EXPIRED_PATH, VISIBLE_AFTER_PATH];

    /// Provision the bounded collection and its indexes (both idempotent) and
    /// return a handle to it.
    #[tracing::instrument(skip_all, fields(queue = %config.name))]
    pub fn open(store: Arc<dyn DocumentStore>, config: QueueConfig) -> QueueResult<Self> {
        if config.name.is_empty() {
            return Err(QueueError::InvalidOption("queue name is empty".to_string()));
        }
        store.ensure_bounded_collection(&config.name, config.bounds())?;
        for field in Self::INDEXED_FIELDS {
            store.ensure_index(&config.name, field)?;
        }
        info!(capacity = config.capacity, "queue opened");
        Ok(Self {
            store,
            config,
            clock: Arc::new(SystemClock),
            metrics: Metrics::new(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Store a message. Returns `false` only when `unique_key` is set and a
    /// document with the same value already exists.
    #[tracing::instrument(skip_all, fields(queue = %self.config.name, routing_key = ?options.routing_key))]
    pub fn write<P: Serialize>(&self, payload: &P, options: &WriteOptions) -> QueueResult<bool> {
        let payload = match serde_json::to_value(payload)
            .map_err(|e| QueueError::InvalidPayload(e.to_string()))?
        {
            Value::Object(map) => map,
            other => {
                return Err(QueueError::InvalidPayload(format!(
                    "payload must be an object, got {other}"
                )))
            }
        };
        if payload.contains_key(ID_FIELD) || payload.contains_key(META_FIELD) {
            return Err(QueueError::InvalidPayload(format!(
                "payload may not use reserved fields {ID_FIELD} or {META_FIELD}"
            )));
        }
        if let Some(field) = &options.unique_key {
            if field.is_empty() {
                return Err(QueueError::InvalidOption("unique_key is empty".to_string()));
            }
        }

        let routing_key = partition(&options.routing_key);
        if let Some(backpressure) = &options.backpressure {
            if poll::should_check(backpressure.check_probability, rand::random::<f64>()) {
                self.wait_for_room(routing_key, backpressure)?;
            }
        }

        let now = self.clock.now_ns();
        let meta = Meta {
            expired: false,
            timestamp_ns: now,
            expire_ns: options.expire.map(duration_ns),
            visible_after_ns: options
                .visibility_timeout
                .map_or(0, |delay| now.saturating_add(duration_ns(delay))),
            routing_key: routing_key.map(str::to_string),
        };
        let document = Document::new(meta, payload);

        let Some(field) = &options.unique_key else {
            self.store.insert(&self.config.name, &document)?;
            self.metrics.record_written(&self.config.name);
            debug!(id = %document.id, "message written");
            return Ok(true);
        };

        let duplicate = Filter::same_value(field, document.lookup(field));
        if self
            .store
            .insert_if_absent(&self.config.name, &duplicate, &document)?
        {
            self.metrics.record_written(&self.config.name);
            debug!(id = %document.id, unique_key = %field, "message written");
            Ok(true)
        } else {
            self.metrics.record_deduplicated(&self.config.name);
            debug!(unique_key = %field, "duplicate message not written");
            Ok(false)
        }
    }

    /// Fetch up to `messages_read` deliverable messages from one partition,
    /// leasing them when a visibility timeout is given. Self-expired messages
    /// are fetched (and leased) like any other but left out of the result.
    #[tracing::instrument(skip_all, fields(queue = %self.config.name, routing_key = ?options.routing_key))]
    pub fn read(&self, options: &ReadOptions) -> QueueResult<Vec<Message>> {
        let routing_key = partition(&options.routing_key);

        if let Some(polling) = &options.block {
            let outcome = poll::wait_until(polling, || {
                let filter = Filter::deliverable(self.clock.now_ns(), routing_key);
                self.store.exists(&self.config.name, &filter)
            })?;
            if outcome == WaitOutcome::TimedOut {
                self.metrics.record_polling_timeout(&self.config.name);
                debug!("blocking read timed out, reading anyway");
            }
        }

        let now = self.clock.now_ns();
        let filter = Filter::deliverable(now, routing_key);
        let fetched = match options.visibility_timeout {
            Some(lease) => self.claim(&filter, now, lease, options.messages_read)?,
            None => self
                .store
                .find(&self.config.name, &filter, Some(options.messages_read))?,
        };

        let fetched_count = fetched.len();
        let messages: Vec<Message> = fetched
            .into_iter()
            .map(Message::from_document)
            .filter(|m| !m.is_expired_at(now))
            .collect();

        let self_expired = (fetched_count - messages.len()) as u64;
        if self_expired > 0 {
            self.metrics
                .record_self_expired(&self.config.name, self_expired);
        }
        self.metrics
            .record_read(&self.config.name, messages.len() as u64);
        debug!(
            fetched = fetched_count,
            returned = messages.len(),
            "read complete"
        );
        Ok(messages)
    }

    /// Claim documents one at a time; each claim is atomic in the store, so
    /// concurrent readers never receive the same document.
    fn claim(
        &self,
        filter: &Filter,
        now: u64,
        lease: Duration,
        limit: usize,
    ) -> StorageResult<Vec<Document>> {
        let update = Update::set(
            VISIBLE_AFTER_PATH,
            now.saturating_add(duration_ns(lease)),
        );
        let mut claimed = Vec::with_capacity(limit.min(64));
        while claimed.len() < limit {
            match self
                .store
                .find_one_and_update(&self.config.name, filter, &update)?
            {
                Some(document) => claimed.push(document),
                None => break,
            }
        }
        if !claimed.is_empty() {
            self.metrics
                .record_leased(&self.config.name, claimed.len() as u64);
        }
        Ok(claimed)
    }

    /// Acknowledge messages. Idempotent.
    pub fn delete(&self, messages: &[Message]) -> QueueResult<()> {
        let ids: Vec<Uuid> = messages.iter().map(Message::id).collect();
        self.delete_ids(&ids)
    }

    /// Acknowledge by identity. Identities already evicted are ignored.
    #[tracing::instrument(skip_all, fields(queue = %self.config.name, count = ids.len()))]
    pub fn delete_ids(&self, ids: &[Uuid]) -> QueueResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let updated =
            self.store
                .update_many(&self.config.name, ids, &Update::set(EXPIRED_PATH, true))?;
        self.metrics.record_acked(&self.config.name, updated as u64);
        debug!(updated, "messages acknowledged");
        Ok(())
    }

    /// Number of messages a consumer of this partition could receive right now.
    pub fn deliverable_count(&self, routing_key: Option<&str>) -> QueueResult<usize> {
        let routing_key = routing_key.filter(|k| !k.is_empty());
        let filter = Filter::deliverable(self.clock.now_ns(), routing_key);
        Ok(self.store.count(&self.config.name, &filter)?)
    }

    fn wait_for_room(
        &self,
        routing_key: Option<&str>,
        backpressure: &Backpressure,
    ) -> StorageResult<()> {
        self.metrics.record_backpressure_wait(&self.config.name);
        let outcome = poll::wait_until::<StorageError>(&backpressure.polling, || {
            let filter = Filter::deliverable(self.clock.now_ns(), routing_key);
            let count = self.store.count(&self.config.name, &filter)?;
            Ok(poll::within_threshold(count, backpressure.threshold))
        })?;
        if outcome == WaitOutcome::TimedOut {
            self.metrics.record_polling_timeout(&self.config.name);
            debug!(
                threshold = backpressure.threshold,
                "backpressure wait timed out, writing anyway"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::metrics::test_harness::MetricTestHarness;
    use crate::storage::MemoryStore;
    use serde_json::json;
    use std::time::Instant;

    const START_NS: u64 = 1_700_000_000_000_000_000;

    struct Fixture {
        queue: Queue,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(START_NS));
        let queue = Queue::open(store.clone(), QueueConfig::new("test-queue"))
            .unwrap()
            .with_clock(clock.clone());
        Fixture {
            queue,
            store,
            clock,
        }
    }

    fn all_documents(f: &Fixture) -> Vec<Document> {
        f.store.find("test-queue", &Filter::all(), None).unwrap()
    }

    fn lease(secs: u64) -> ReadOptions {
        ReadOptions::new().with_visibility_timeout(Duration::from_secs(secs))
    }

    #[test]
    fn open_provisions_collection_and_indexes() {
        let f = fixture();
        let mut indexes = f.store.indexes("test-queue").unwrap();
        indexes.sort();
        let mut expected: Vec<String> =
            Queue::INDEXED_FIELDS.iter().map(|s| s.to_string()).collect();
        expected.sort();
        assert_eq!(indexes, expected);

        // Opening again over the same collection is fine.
        Queue::open(f.store.clone(), QueueConfig::new("test-queue")).unwrap();
    }

    #[test]
    fn open_rejects_empty_name() {
        let store = Arc::new(MemoryStore::new());
        let result = Queue::open(store, QueueConfig::new(""));
        assert!(matches!(result, Err(QueueError::InvalidOption(_))));
    }

    #[test]
    fn written_message_is_immediately_readable() {
        let f = fixture();
        assert!(f
            .queue
            .write(&json!({"task": "resize"}), &WriteOptions::new())
            .unwrap());

        let messages = f.queue.read(&ReadOptions::new()).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload()["task"], "resize");
        assert_eq!(messages[0].timestamp_ns(), START_NS);
        assert_eq!(messages[0].routing_key(), None);
    }

    #[test]
    fn peek_does_not_claim() {
        let f = fixture();
        f.queue
            .write(&json!({"n": 1}), &WriteOptions::new())
            .unwrap();

        assert_eq!(f.queue.read(&ReadOptions::new()).unwrap().len(), 1);
        assert_eq!(f.queue.read(&ReadOptions::new()).unwrap().len(), 1);
        assert_eq!(all_documents(&f)[0].meta.visible_after_ns, 0);
    }

    #[test]
    fn lease_hides_message_until_it_lapses() {
        let f = fixture();
        f.queue
            .write(&json!({"n": 1}), &WriteOptions::new())
            .unwrap();

        let first = f.queue.read(&lease(30)).unwrap();
        assert_eq!(first.len(), 1);
        assert!(f.queue.read(&lease(30)).unwrap().is_empty());
        assert!(f.queue.read(&ReadOptions::new()).unwrap().is_empty());

        // Unacknowledged messages come back once the lease runs out.
        f.clock.advance(Duration::from_secs(31));
        let again = f.queue.read(&lease(30)).unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].id(), first[0].id());
    }

    #[test]
    fn leasing_returns_the_prior_document() {
        let f = fixture();
        f.queue
            .write(&json!({"n": 1}), &WriteOptions::new())
            .unwrap();

        let claimed = f.queue.read(&lease(10)).unwrap();
        assert_eq!(claimed[0].visible_after_ns(), 0);
        assert_eq!(
            all_documents(&f)[0].meta.visible_after_ns,
            START_NS + 10_000_000_000
        );
    }

    #[test]
    fn delayed_message_becomes_visible_after_its_delay() {
        let f = fixture();
        let options = WriteOptions::new().with_visibility_timeout(Duration::from_secs(5));
        f.queue.write(&json!({"n": 1}), &options).unwrap();

        assert!(f.queue.read(&ReadOptions::new()).unwrap().is_empty());
        f.clock.advance(Duration::from_secs(5));
        assert!(
            f.queue.read(&ReadOptions::new()).unwrap().is_empty(),
            "visible_after must be strictly in the past"
        );
        f.clock.advance(Duration::from_millis(1));
        assert_eq!(f.queue.read(&ReadOptions::new()).unwrap().len(), 1);
    }

    #[test]
    fn routing_partitions_are_isolated() {
        let f = fixture();
        for n in 0..3 {
            f.queue
                .write(&json!({"n": n}), &WriteOptions::new().with_routing_key("a"))
                .unwrap();
        }
        for n in 0..2 {
            f.queue
                .write(&json!({"n": n}), &WriteOptions::new().with_routing_key("b"))
                .unwrap();
        }

        let read_a = ReadOptions::new().with_routing_key("a").with_messages_read(10);
        let a = f.queue.read(&read_a).unwrap();
        assert_eq!(a.len(), 3);
        assert!(a.iter().all(|m| m.routing_key() == Some("a")));

        let unrouted = f
            .queue
            .read(&ReadOptions::new().with_messages_read(10))
            .unwrap();
        assert!(unrouted.is_empty());

        let read_b = ReadOptions::new().with_routing_key("b").with_messages_read(10);
        assert_eq!(f.queue.read(&read_b).unwrap().len(), 2);
    }

    #[test]
    fn empty_routing_key_is_the_unrouted_partition() {
        let f = fixture();
        f.queue
            .write(&json!({"n": 1}), &WriteOptions::new().with_routing_key(""))
            .unwrap();
        assert_eq!(all_documents(&f)[0].meta.routing_key, None);
        assert_eq!(f.queue.read(&ReadOptions::new()).unwrap().len(), 1);
        assert_eq!(
            f.queue
                .read(&ReadOptions::new().with_routing_key(""))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn batch_size_caps_each_read() {
        let f = fixture();
        for n in 0..5 {
            f.queue
                .write(&json!({"n": n}), &WriteOptions::new())
                .unwrap();
        }
        let options = lease(60).with_messages_read(2);
        assert_eq!(f.queue.read(&options).unwrap().len(), 2);
        assert_eq!(f.queue.read(&options).unwrap().len(), 2);
        assert_eq!(f.queue.read(&options).unwrap().len(), 1);
        assert!(f.queue.read(&options).unwrap().is_empty());

        let none = ReadOptions::new().with_messages_read(0);
        assert!(f.queue.read(&none).unwrap().is_empty());
    }

    #[test]
    fn delete_acknowledges_idempotently() {
        let f = fixture();
        f.queue
            .write(&json!({"n": 1}), &WriteOptions::new())
            .unwrap();
        let messages = f.queue.read(&ReadOptions::new()).unwrap();

        f.queue.delete(&messages).unwrap();
        f.queue.delete(&messages).unwrap();
        f.queue.delete(&[]).unwrap();

        assert!(f.queue.read(&ReadOptions::new()).unwrap().is_empty());
        let stored = all_documents(&f);
        assert_eq!(stored.len(), 1, "acknowledgement is a tombstone");
        assert!(stored[0].meta.expired);
    }

    #[test]
    fn delete_ids_ignores_unknown_identities() {
        let f = fixture();
        f.queue.delete_ids(&[Uuid::now_v7()]).unwrap();
    }

    #[test]
    fn unique_key_deduplicates() {
        let f = fixture();
        let options = WriteOptions::new().with_unique_key("job_id");
        assert!(f.queue.write(&json!({"job_id": 7}), &options).unwrap());
        assert!(!f.queue.write(&json!({"job_id": 7}), &options).unwrap());
        assert!(f.queue.write(&json!({"job_id": 8}), &options).unwrap());
        assert_eq!(all_documents(&f).len(), 2);
    }

    #[test]
    fn unique_key_matches_acknowledged_documents_too() {
        let f = fixture();
        let options = WriteOptions::new().with_unique_key("job_id");
        f.queue.write(&json!({"job_id": 7}), &options).unwrap();
        let messages = f.queue.read(&ReadOptions::new()).unwrap();
        f.queue.delete(&messages).unwrap();

        assert!(!f.queue.write(&json!({"job_id": 7}), &options).unwrap());
    }

    #[test]
    fn unique_key_absent_from_payload_dedups_on_absence() {
        let f = fixture();
        let options = WriteOptions::new().with_unique_key("job_id");
        assert!(f.queue.write(&json!({"other": 1}), &options).unwrap());
        assert!(!f.queue.write(&json!({"other": 2}), &options).unwrap());
    }

    #[test]
    fn unique_key_may_be_nested() {
        let f = fixture();
        let options = WriteOptions::new().with_unique_key("order.id");
        assert!(f
            .queue
            .write(&json!({"order": {"id": "A1"}}), &options)
            .unwrap());
        assert!(!f
            .queue
            .write(&json!({"order": {"id": "A1", "rev": 2}}), &options)
            .unwrap());
    }

    #[test]
    fn self_expired_messages_are_filtered_but_stay_claimable() {
        let f = fixture();
        let options = WriteOptions::new().with_expire(Duration::from_secs(1));
        f.queue.write(&json!({"n": 1}), &options).unwrap();

        assert_eq!(f.queue.read(&ReadOptions::new()).unwrap().len(), 1);
        f.clock.advance(Duration::from_secs(2));
        assert!(f.queue.read(&ReadOptions::new()).unwrap().is_empty());

        // Still stored, still not acknowledged, still counted.
        let stored = all_documents(&f);
        assert_eq!(stored.len(), 1);
        assert!(!stored[0].meta.expired);
        assert_eq!(f.queue.deliverable_count(None).unwrap(), 1);

        // A leasing read claims it even though nothing is returned.
        assert!(f.queue.read(&lease(30)).unwrap().is_empty());
        let stored = all_documents(&f);
        assert!(stored[0].meta.visible_after_ns > f.clock.now_ns());
    }

    #[test]
    fn rejects_non_object_and_reserved_payloads() {
        let f = fixture();
        let err = f.queue.write(&42, &WriteOptions::new()).unwrap_err();
        assert!(matches!(err, QueueError::InvalidPayload(_)));

        let err = f
            .queue
            .write(&json!({"_meta": {}}), &WriteOptions::new())
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidPayload(_)));

        let err = f
            .queue
            .write(&json!({"n": 1}), &WriteOptions::new().with_unique_key(""))
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidOption(_)));
        assert!(all_documents(&f).is_empty());
    }

    #[test]
    fn typed_payload_round_trips() {
        #[derive(Serialize, serde::Deserialize, Debug, PartialEq)]
        struct Job {
            id: u32,
            kind: String,
        }
        let f = fixture();
        let job = Job {
            id: 3,
            kind: "thumbnail".to_string(),
        };
        f.queue.write(&job, &WriteOptions::new()).unwrap();
        let messages = f.queue.read(&ReadOptions::new()).unwrap();
        assert_eq!(messages[0].payload_as::<Job>().unwrap(), job);
    }

    #[test]
    fn deliverable_count_tracks_partition() {
        let f = fixture();
        f.queue
            .write(&json!({"n": 1}), &WriteOptions::new().with_routing_key("a"))
            .unwrap();
        f.queue
            .write(&json!({"n": 2}), &WriteOptions::new())
            .unwrap();
        assert_eq!(f.queue.deliverable_count(Some("a")).unwrap(), 1);
        assert_eq!(f.queue.deliverable_count(None).unwrap(), 1);
        assert_eq!(f.queue.deliverable_count(Some("")).unwrap(), 1);

        f.queue.read(&lease(5)).unwrap();
        assert_eq!(f.queue.deliverable_count(None).unwrap(), 0);
    }

    #[test]
    fn blocking_read_gives_up_at_timeout() {
        let f = fixture();
        let polling =
            PollPolicy::new(Duration::from_millis(5)).with_timeout(Duration::from_millis(40));
        let started = Instant::now();
        let messages = f.queue.read(&ReadOptions::new().blocking(polling)).unwrap();
        assert!(messages.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn blocking_read_returns_immediately_when_available() {
        let f = fixture();
        f.queue
            .write(&json!({"n": 1}), &WriteOptions::new())
            .unwrap();
        let started = Instant::now();
        let messages = f
            .queue
            .read(&ReadOptions::new().blocking(PollPolicy::new(Duration::from_secs(30))))
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn backpressure_passes_when_under_threshold() {
        let f = fixture();
        let backpressure = Backpressure::new(0)
            .with_check_probability(1.0)
            .with_polling(PollPolicy::new(Duration::from_secs(30)));
        let options = WriteOptions::new().with_backpressure(backpressure);
        let started = Instant::now();
        assert!(f.queue.write(&json!({"n": 1}), &options).unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn backpressure_timeout_still_writes() {
        let f = fixture();
        f.queue
            .write(&json!({"n": 1}), &WriteOptions::new())
            .unwrap();

        let polling =
            PollPolicy::new(Duration::from_millis(5)).with_timeout(Duration::from_millis(30));
        let options =
            WriteOptions::new().with_backpressure(Backpressure::new(0).with_polling(polling));
        let started = Instant::now();
        assert!(f.queue.write(&json!({"n": 2}), &options).unwrap());
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(all_documents(&f).len(), 2);
    }

    #[test]
    fn backpressure_skipped_at_zero_probability() {
        let f = fixture();
        f.queue
            .write(&json!({"n": 1}), &WriteOptions::new())
            .unwrap();
        let backpressure = Backpressure::new(0)
            .with_check_probability(0.0)
            .with_polling(PollPolicy::new(Duration::from_secs(30)));
        let started = Instant::now();
        f.queue
            .write(&json!({"n": 2}), &WriteOptions::new().with_backpressure(backpressure))
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn backpressure_only_counts_the_target_partition() {
        let f = fixture();
        f.queue
            .write(&json!({"n": 1}), &WriteOptions::new().with_routing_key("busy"))
            .unwrap();
        let backpressure = Backpressure::new(0)
            .with_check_probability(1.0)
            .with_polling(PollPolicy::new(Duration::from_secs(30)));
        let options = WriteOptions::new()
            .with_routing_key("idle")
            .with_backpressure(backpressure);
        let started = Instant::now();
        f.queue.write(&json!({"n": 2}), &options).unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn records_metrics() {
        let harness = MetricTestHarness::new();
        let store = Arc::new(MemoryStore::new());
        let queue = Queue::open(store, QueueConfig::new("metered"))
            .unwrap()
            .with_metrics(harness.metrics.clone());

        let unique = WriteOptions::new().with_unique_key("k");
        queue.write(&json!({"k": 1}), &unique).unwrap();
        queue.write(&json!({"k": 1}), &unique).unwrap();
        queue.write(&json!({"k": 2}), &unique).unwrap();

        let messages = queue.read(&lease(30)).unwrap();
        queue.delete(&messages).unwrap();

        harness.assert_counter("ringq.messages.written", "metered", 2);
        harness.assert_counter("ringq.messages.deduplicated", "metered", 1);
        harness.assert_counter("ringq.messages.leased", "metered", 2);
        harness.assert_counter("ringq.messages.read", "metered", 2);
        harness.assert_counter("ringq.messages.acked", "metered", 2);
    }
}
