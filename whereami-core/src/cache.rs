//! TTL-keyed weather cache with JSON persistence.
//!
//! Mutations only touch memory. The owner takes a [`PendingWrite`] while it
//! holds its lock and commits it afterwards, so disk I/O never runs under that lock.
//!
//! File layout: one JSON object whose keys are cache keys, each mapping to
//! `{ "data": <snapshot>, "ts": <unix seconds> }`, plus the reserved [`UNIT_KEY`]
//! holding the unit (`"c"` / `"f"`) the stored temperatures are in.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::HashMap,
    fs,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::model::{Unit, WeatherSnapshot};

/// Reserved key recording the unit of every stored temperature.
pub const UNIT_KEY: &str = "_unit";

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub snapshot: WeatherSnapshot,
    pub timestamp: DateTime<Utc>,
}

impl CacheEntry {
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        self.age(now) < ttl
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    data: WeatherSnapshot,
    ts: f64,
}

/// In-memory store, authoritative for the life of the process.
///
/// Not synchronized; the owner wraps it in its own lock.
#[derive(Debug, Default)]
pub struct WeatherCache {
    entries: HashMap<String, CacheEntry>,
    unit: Option<Unit>,
    path: Option<PathBuf>,
    // Bumped by every mutation; `taken` is the revision last handed out for writing.
    revision: u64,
    taken: u64,
    // Revision currently on disk. Held for the duration of a write.
    written: Arc<Mutex<u64>>,
}

/// Serialized cache contents, to be written once the owner's lock is released.
#[must_use = "nothing is written until `commit` is called"]
#[derive(Debug)]
pub struct PendingWrite {
    path: PathBuf,
    body: Value,
    revision: u64,
    written: Arc<Mutex<u64>>,
}

impl PendingWrite {
    /// Best effort; a failed write only costs durability.
    ///
    /// Writes are serialized, and one older than what is already on disk is dropped.
    pub fn commit(self) {
        let mut written = self.written.lock();
        if *written >= self.revision {
            tracing::debug!("Skipping cache write {}, revision {} already on disk", self.revision, *written);
            return;
        }

        match write_atomically(&self.path, &self.body) {
            Ok(()) => *written = self.revision,
            Err(e) => tracing::warn!("Failed to write cache file {}: {e}", self.path.display()),
        }
    }
}

impl WeatherCache {
    /// Memory-only cache, nothing is written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Read the cache file once. A missing or corrupt file yields an empty cache.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut cache = Self { path: Some(path.clone()), ..Self::default() };

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return cache,
            Err(e) => {
                tracing::warn!("Failed to read cache file {}: {e}", path.display());
                return cache;
            }
        };

        match serde_json::from_str::<Map<String, Value>>(&contents) {
            Ok(map) => cache.absorb(map),
            Err(e) => tracing::warn!("Ignoring corrupt cache file {}: {e}", path.display()),
        }

        tracing::debug!("Loaded {} cached entries from {}", cache.entries.len(), path.display());
        cache
    }

    fn absorb(&mut self, map: Map<String, Value>) {
        for (key, value) in map {
            if key == UNIT_KEY {
                self.unit = value.as_str().and_then(Unit::parse);
                continue;
            }

            match serde_json::from_value::<StoredEntry>(value) {
                Ok(stored) => {
                    let Some(timestamp) = from_unix_seconds(stored.ts) else {
                        tracing::debug!("Skipping cache entry {key}: bad timestamp");
                        continue;
                    };
                    self.entries.insert(
                        key.clone(),
                        CacheEntry { key, snapshot: stored.data, timestamp },
                    );
                }
                Err(e) => tracing::debug!("Skipping malformed cache entry {key}: {e}"),
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn unit(&self) -> Option<Unit> {
        self.unit
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn put(&mut self, key: &str, snapshot: WeatherSnapshot, at: DateTime<Utc>) {
        self.entries.insert(
            key.to_string(),
            CacheEntry { key: key.to_string(), snapshot, timestamp: at },
        );
        self.revision += 1;
    }

    /// Drop every entry and the recorded unit.
    pub fn invalidate_all(&mut self) {
        self.entries.clear();
        self.unit = None;
        self.revision += 1;
    }

    /// Clear everything if the stored unit is not `unit`, then record `unit`.
    ///
    /// Returns `true` when the store was invalidated.
    pub fn reconcile_unit(&mut self, unit: Unit) -> bool {
        if self.unit == Some(unit) {
            return false;
        }

        let invalidated = !self.entries.is_empty() || self.unit.is_some();
        if invalidated {
            tracing::info!(
                "Unit changed from {:?} to {unit}, clearing {} cached entries",
                self.unit.map(|u| u.as_str()),
                self.entries.len()
            );
        }
        self.entries.clear();
        self.unit = Some(unit);
        self.revision += 1;
        invalidated
    }

    fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (key, entry) in &self.entries {
            let stored = StoredEntry {
                data: entry.snapshot.clone(),
                ts: to_unix_seconds(entry.timestamp),
            };
            match serde_json::to_value(stored) {
                Ok(value) => {
                    map.insert(key.clone(), value);
                }
                Err(e) => tracing::warn!("Failed to serialize cache entry {key}: {e}"),
            }
        }
        if let Some(unit) = self.unit {
            map.insert(UNIT_KEY.to_string(), Value::String(unit.as_str().to_string()));
        }
        Value::Object(map)
    }

    /// Snapshot of unsaved changes, or `None` when there is nothing to write.
    pub fn take_write(&mut self) -> Option<PendingWrite> {
        if self.revision == self.taken {
            return None;
        }
        self.taken = self.revision;

        let path = self.path.clone()?;
        Some(PendingWrite {
            path,
            body: self.to_json(),
            revision: self.revision,
            written: Arc::clone(&self.written),
        })
    }

    /// Write unsaved changes now.
    pub fn flush(&mut self) {
        if let Some(write) = self.take_write() {
            write.commit();
        }
    }
}

fn write_atomically(path: &Path, value: &Value) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec(value)?)?;
    fs::rename(&tmp, path)
}

fn to_unix_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

fn from_unix_seconds(ts: f64) -> Option<DateTime<Utc>> {
    if !ts.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis((ts * 1000.0).round() as i64)
}
