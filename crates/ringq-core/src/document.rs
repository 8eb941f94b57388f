use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Top-level field holding the document identity.
pub const ID_FIELD: &str = "_id";
/// Top-level field holding the queue metadata.
pub const META_FIELD: &str = "_meta";

pub const EXPIRED_PATH: &str = "_meta.expired";
pub const VISIBLE_AFTER_PATH: &str = "_meta.visible_after_ns";
pub const ROUTING_KEY_PATH: &str = "_meta.routing_key";

/// Queue bookkeeping stored alongside every payload under `_meta`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Meta {
    /// Soft-delete flag. Only acknowledgement sets it.
    pub expired: bool,
    pub timestamp_ns: u64,
    /// Time-to-live relative to `timestamp_ns`. `None` never self-expires.
    pub expire_ns: Option<u64>,
    /// The message is not deliverable until `now > visible_after_ns`.
    /// Zero means immediately visible.
    pub visible_after_ns: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,
}

/// A record as persisted in a bounded collection: identity, metadata and the
/// producer's payload fields flattened at the top level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: Uuid,
    #[serde(rename = "_meta")]
    pub meta: Meta,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Document {
    /// Build a document with a fresh UUIDv7 identity.
    pub fn new(meta: Meta, payload: Map<String, Value>) -> Self {
        Self {
            id: Uuid::now_v7(),
            meta,
            payload,
        }
    }

    /// Resolve a dotted field path against the persisted layout.
    ///
    /// `_id` yields the identity as a string, `_meta.*` the metadata fields and
    /// anything else walks the payload. Returns `None` when any segment is
    /// missing, and also for a `null` routing key.
    pub fn lookup(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        let head = segments.next()?;
        match head {
            ID_FIELD => {
                if segments.next().is_some() {
                    return None;
                }
                Some(Value::String(self.id.to_string()))
            }
            META_FIELD => {
                let meta = serde_json::to_value(&self.meta).ok()?;
                walk(&meta, segments).filter(|v| !v.is_null())
            }
            _ => {
                let root = self.payload.get(head)?;
                walk(root, segments)
            }
        }
    }

    /// Set a dotted field path. `_id` is immutable.
    pub(crate) fn set(&mut self, path: &str, value: Value) -> crate::error::StorageResult<()> {
        use crate::error::StorageError;

        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        match head {
            "" => Err(StorageError::InvalidUpdate("empty field path".to_string())),
            ID_FIELD => Err(StorageError::InvalidUpdate(
                "document identity is immutable".to_string(),
            )),
            META_FIELD => {
                let Some(rest) = rest else {
                    return Err(StorageError::InvalidUpdate(
                        "cannot replace the whole metadata block".to_string(),
                    ));
                };
                let mut meta = serde_json::to_value(&self.meta)?;
                assign(&mut meta, rest, value)?;
                self.meta = serde_json::from_value(meta)?;
                Ok(())
            }
            _ => match rest {
                None => {
                    self.payload.insert(head.to_string(), value);
                    Ok(())
                }
                Some(rest) => {
                    let slot = self
                        .payload
                        .entry(head.to_string())
                        .or_insert_with(|| Value::Object(Map::new()));
                    assign(slot, rest, value)
                }
            },
        }
    }
}

fn walk<'a>(root: &Value, segments: impl Iterator<Item = &'a str>) -> Option<Value> {
    let mut current = root;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current.clone())
}

fn assign(root: &mut Value, path: &str, value: Value) -> crate::error::StorageResult<()> {
    let mut current = root;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let map = current.as_object_mut().ok_or_else(|| {
            crate::error::StorageError::InvalidUpdate(format!(
                "field path {path} crosses a non-object value"
            ))
        })?;
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return Ok(());
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    Err(crate::error::StorageError::InvalidUpdate(
        "empty field path".to_string(),
    ))
}
