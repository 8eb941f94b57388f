use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::document::Document;

/// A message handed to a consumer: the stored document as the read saw it.
///
/// For a leasing read this is the document *before* its lease was applied,
/// so `visible_after_ns` reflects the prior visibility.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    document: Document,
}

impl Message {
    pub fn from_document(document: Document) -> Self {
        Self { document }
    }

    pub fn id(&self) -> Uuid {
        self.document.id
    }

    pub fn routing_key(&self) -> Option<&str> {
        self.document.meta.routing_key.as_deref()
    }

    pub fn timestamp_ns(&self) -> u64 {
        self.document.meta.timestamp_ns
    }

    pub fn visible_after_ns(&self) -> u64 {
        self.document.meta.visible_after_ns
    }

    pub fn expire_ns(&self) -> Option<u64> {
        self.document.meta.expire_ns
    }

    /// Whether an acknowledgement had retired this message when it was read.
    pub fn is_acknowledged(&self) -> bool {
        self.document.meta.expired
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.document.payload
    }

    /// Decode the payload into a typed value.
    pub fn payload_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(Value::Object(self.document.payload.clone()))
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn into_document(self) -> Document {
        self.document
    }

    /// Self-expiry: more than `expire_ns` has passed since the message was
    /// written. This never changes what is stored.
    pub fn is_expired_at(&self, now_ns: u64) -> bool {
        match self.document.meta.expire_ns {
            Some(ttl) => now_ns.saturating_sub(self.document.meta.timestamp_ns) > ttl,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemClock.now_ns())
    }
}
