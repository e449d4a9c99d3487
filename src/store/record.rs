//! Content Record Module
//!
//! Defines persisted content records, their on-disk value shape and the
//! write-time timestamps the store assigns.

use std::fmt::Debug;
use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// == Type Contracts ==
/// Lookup key of a persisted record.
pub trait Slug:
    Clone + Eq + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> Slug for T where
    T: Clone + Eq + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Opaque payload of a persisted record.
pub trait Content: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Content for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

// == Stored Value ==
/// The value half of a persisted `(slug, value)` pair.
///
/// Records written before timestamps existed carry no `last_modified`; they
/// deserialize with the field absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredValue<V> {
    /// The stored payload
    pub content: V,
    /// Time of the most recent successful write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl<V> StoredValue<V> {
    /// Creates a value stamped at `last_modified`.
    pub fn stamped(content: V, last_modified: DateTime<Utc>) -> Self {
        Self {
            content,
            last_modified: Some(last_modified),
        }
    }

    /// Creates a value in the legacy, unstamped shape.
    pub fn legacy(content: V) -> Self {
        Self {
            content,
            last_modified: None,
        }
    }
}

// == Content Record ==
/// A slug together with its content and last-write time.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentRecord<K, V> {
    pub slug: K,
    pub content: V,
    pub last_modified: Option<DateTime<Utc>>,
}

impl<K, V> ContentRecord<K, V> {
    pub fn from_stored(slug: K, value: StoredValue<V>) -> Self {
        Self {
            slug,
            content: value.content,
            last_modified: value.last_modified,
        }
    }
}

// == Since Lookup ==
/// Outcome of a staleness-aware read against an existing record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinceLookup<V> {
    /// Content changed at or after the reference time (or no comparison was possible)
    Modified(V),
    /// The record was last written strictly before the reference time
    Unchanged,
}

impl<V> SinceLookup<V> {
    /// Compares a stored value against the caller's reference time.
    ///
    /// Only a stamped record with a reference time can be `Unchanged`; an
    /// unstamped (legacy) record always reports its content.
    pub fn evaluate(value: StoredValue<V>, since: Option<DateTime<Utc>>) -> Self {
        match (value.last_modified, since) {
            (Some(modified), Some(since)) if modified < since => SinceLookup::Unchanged,
            _ => SinceLookup::Modified(value.content),
        }
    }
}

// == Utility Functions ==
/// Returns the write timestamp for a slug whose previous stamp was `previous`.
///
/// Stamps are strictly increasing per slug even if the wall clock steps back.
pub fn next_timestamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(prev) if now <= prev => prev + Duration::microseconds(1),
        _ => now,
    }
}
