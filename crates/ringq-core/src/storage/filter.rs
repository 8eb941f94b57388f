//! Typed predicates and updates understood by every `DocumentStore`.
//!
//! Paths are dotted and resolved with `Document::lookup`, so `_meta.*`,
//! `_id` and payload fields are all addressable.

use std::cmp::Ordering;

use serde_json::Value;

use crate::document::{Document, EXPIRED_PATH, ROUTING_KEY_PATH, VISIBLE_AFTER_PATH};
use crate::error::StorageResult;

/// A single test against one field of a document.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field is present and equal to `value`.
    Eq { path: String, value: Value },
    /// Field is missing (or `null`).
    Absent { path: String },
    /// Field is a number strictly less than `bound`.
    Lt { path: String, bound: Value },
}

impl Condition {
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Condition::Eq { path, value } => document.lookup(path).as_ref() == Some(value),
            Condition::Absent { path } => document.lookup(path).is_none(),
            Condition::Lt { path, bound } => document
                .lookup(path)
                .and_then(|actual| compare_numbers(&actual, bound))
                .is_some_and(|ord| ord == Ordering::Less),
        }
    }
}

/// A conjunction of conditions. The empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn where_eq(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq {
            path: path.into(),
            value: value.into(),
        });
        self
    }

    pub fn where_absent(mut self, path: impl Into<String>) -> Self {
        self.conditions
            .push(Condition::Absent { path: path.into() });
        self
    }

    pub fn where_lt(mut self, path: impl Into<String>, bound: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Lt {
            path: path.into(),
            bound: bound.into(),
        });
        self
    }

    /// Messages a consumer may receive at `now_ns`: not acknowledged, past
    /// their visibility point and in exactly the given routing partition.
    /// `None` selects the unrouted partition (routing key absent).
    pub fn deliverable(now_ns: u64, routing_key: Option<&str>) -> Self {
        let filter = Self::all()
            .where_eq(EXPIRED_PATH, false)
            .where_lt(VISIBLE_AFTER_PATH, now_ns);
        match routing_key {
            Some(key) => filter.where_eq(ROUTING_KEY_PATH, key),
            None => filter.where_absent(ROUTING_KEY_PATH),
        }
    }

    /// Documents whose `path` holds the same value as `candidate`, where a
    /// missing candidate value matches documents missing the field too.
    pub fn same_value(path: &str, candidate: Option<Value>) -> Self {
        match candidate {
            Some(value) => Self::all().where_eq(path, value),
            None => Self::all().where_absent(path),
        }
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.conditions.iter().all(|c| c.matches(document))
    }
}

/// Field assignments applied to one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    sets: Vec<(String, Value)>,
}

impl Update {
    pub fn set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::default().and_set(path, value)
    }

    pub fn and_set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.sets.push((path.into(), value.into()));
        self
    }

    /// Apply every assignment or none of them.
    pub fn apply(&self, document: &mut Document) -> StorageResult<()> {
        let mut updated = document.clone();
        for (path, value) in &self.sets {
            updated.set(path, value.clone())?;
        }
        *document = updated;
        Ok(())
    }
}

/// Order two JSON numbers without losing precision on large integers.
fn compare_numbers(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
        return Some(a.cmp(&b));
    }
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return Some(a.cmp(&b));
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}
