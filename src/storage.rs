//! Client-local key/value storage and the records persisted in it.
//!
//! Two records live in storage:
//! - filter selection (`{categories, lengthRange, elevationGainRange}`)
//! - last map position (`{center, zoom, timestamp}`)
//!
//! Storage is best-effort. Read and write failures are logged and treated as
//! "no persistence"; they never reach the user.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};
use crate::{GpsPoint, ValueRange};

/// Minimal string key/value store, shaped like browser local storage.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Box<S> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        (**self).remove(key)
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory store with an optional byte quota.
///
/// The quota counts key and value bytes across all entries, like browser
/// storage does; a write that would exceed it fails with
/// [`TrackError::QuotaExceeded`] and leaves the old value in place.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Bytes currently used by keys and values.
    pub fn used_bytes(&self) -> usize {
        self.entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        if let Some(quota) = self.quota_bytes {
            let replaced = self.entries.get(key).map_or(0, |v| key.len() + v.len());
            let needed = self.used_bytes() - replaced + key.len() + value.len();
            if needed > quota {
                return Err(TrackError::QuotaExceeded {
                    key: key.to_string(),
                    bytes: key.len() + value.len(),
                });
            }
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

// ============================================================================
// SQLite store
// ============================================================================

/// Key/value store persisted in a SQLite table.
#[cfg(feature = "persistence")]
pub struct SqliteStore {
    db: rusqlite::Connection,
}

#[cfg(feature = "persistence")]
impl SqliteStore {
    /// Open (or create) a store at `db_path`.
    pub fn new(db_path: &str) -> Result<Self> {
        let db = rusqlite::Connection::open(db_path)?;
        Self::init_schema(&db)?;
        Ok(Self { db })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    fn init_schema(conn: &rusqlite::Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER DEFAULT (strftime('%s', 'now'))
            );
        "#,
        )?;
        Ok(())
    }
}

#[cfg(feature = "persistence")]
impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        use rusqlite::OptionalExtension;

        let value = self
            .db
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?",
                rusqlite::params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.db.execute(
            "INSERT OR REPLACE INTO kv_store (key, value) VALUES (?, ?)",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.db
            .execute("DELETE FROM kv_store WHERE key = ?", rusqlite::params![key])?;
        Ok(())
    }
}

// ============================================================================
// Persisted filter selection
// ============================================================================

/// Filter selection as stored on disk.
///
/// Every field is optional. Missing ranges fall back to the session bounds.
/// Missing categories mean none have been chosen yet (no tracks were visible
/// when the record was written), which is different from an explicitly empty
/// set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length_range: Option<ValueRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation_gain_range: Option<ValueRange>,
}

impl PersistedFilters {
    /// Check ranges: finite endpoints with `min <= max`.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(range) = &self.length_range {
            if !range.is_valid() {
                return Err(format!("invalid lengthRange [{}, {}]", range.min, range.max));
            }
        }
        if let Some(range) = &self.elevation_gain_range {
            if !range.is_valid() {
                return Err(format!(
                    "invalid elevationGainRange [{}, {}]",
                    range.min, range.max
                ));
            }
        }
        Ok(())
    }
}

/// Outcome of reading the persisted filter record.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterLoad {
    /// Nothing stored (or storage unreadable)
    Missing,
    /// A valid record
    Restored(PersistedFilters),
    /// A record was present but malformed; it has been removed
    Discarded,
}

/// Read the persisted filter record under `key`.
///
/// A malformed record (bad JSON, non-array categories, inverted or
/// non-finite ranges) is removed from storage and reported as
/// [`FilterLoad::Discarded`].
pub fn load_filters<S: KeyValueStore + ?Sized>(store: &mut S, key: &str) -> FilterLoad {
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return FilterLoad::Missing,
        Err(e) => {
            warn!("[Storage] Failed to read '{}': {}", key, e);
            return FilterLoad::Missing;
        }
    };

    let parsed = serde_json::from_str::<PersistedFilters>(&raw)
        .map_err(|e| e.to_string())
        .and_then(|filters| filters.validate().map(|_| filters));

    match parsed {
        Ok(filters) => {
            debug!(
                "[Storage] Restored filters: {:?} categories",
                filters.categories.as_ref().map(BTreeSet::len)
            );
            FilterLoad::Restored(filters)
        }
        Err(message) => {
            let err = TrackError::InvalidPersistedState {
                key: key.to_string(),
                message,
            };
            warn!("[Storage] Discarding record: {}", err);
            if let Err(e) = store.remove(key) {
                warn!("[Storage] Failed to remove '{}': {}", key, e);
            }
            FilterLoad::Discarded
        }
    }
}

/// Persist the filter record. Failures are logged and swallowed.
pub fn save_filters<S: KeyValueStore + ?Sized>(
    store: &mut S,
    key: &str,
    filters: &PersistedFilters,
) -> bool {
    write_json(store, key, filters)
}

// ============================================================================
// Persisted map position
// ============================================================================

/// Last map view, restored on the next load.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapPosition {
    pub center: GpsPoint,
    pub zoom: f64,
    /// Unix timestamp in milliseconds when the position was saved
    pub timestamp: i64,
}

impl MapPosition {
    /// Position stamped with the current time.
    pub fn now(center: GpsPoint, zoom: f64) -> Self {
        Self {
            center,
            zoom,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.center.is_valid() && self.zoom.is_finite() && self.zoom >= 0.0
    }

    /// Age relative to `now_ms`; future timestamps count as zero.
    pub fn age(&self, now_ms: i64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.timestamp).max(0) as u64)
    }
}

/// Read the saved map position.
///
/// Invalid records are removed. With `max_age`, positions older than that
/// are ignored (but kept in storage until overwritten).
pub fn load_map_position<S: KeyValueStore + ?Sized>(
    store: &mut S,
    key: &str,
    max_age: Option<Duration>,
) -> Option<MapPosition> {
    let raw = match store.get(key) {
        Ok(raw) => raw?,
        Err(e) => {
            warn!("[Storage] Failed to read '{}': {}", key, e);
            return None;
        }
    };

    let position = match serde_json::from_str::<MapPosition>(&raw) {
        Ok(p) if p.is_valid() => p,
        Ok(_) | Err(_) => {
            warn!("[Storage] Discarding invalid map position under '{}'", key);
            if let Err(e) = store.remove(key) {
                warn!("[Storage] Failed to remove '{}': {}", key, e);
            }
            return None;
        }
    };

    if let Some(max_age) = max_age {
        let age = position.age(chrono::Utc::now().timestamp_millis());
        if age > max_age {
            debug!("[Storage] Ignoring map position saved {:?} ago", age);
            return None;
        }
    }

    Some(position)
}

/// Persist the map position. Failures are logged and swallowed.
pub fn save_map_position<S: KeyValueStore + ?Sized>(
    store: &mut S,
    key: &str,
    position: &MapPosition,
) -> bool {
    write_json(store, key, position)
}

fn write_json<S, T>(store: &mut S, key: &str, value: &T) -> bool
where
    S: KeyValueStore + ?Sized,
    T: Serialize,
{
    let json = match serde_json::to_string(value) {
        Ok(json) => json,
        Err(e) => {
            warn!("[Storage] Failed to serialize '{}': {}", key, e);
            return false;
        }
    };

    match store.set(key, &json) {
        Ok(()) => true,
        Err(e) => {
            warn!("[Storage] Failed to write '{}': {}", key, e);
            false
        }
    }
}
