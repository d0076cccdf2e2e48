//! Resolution caches.
//!
//! The runtime cache lives for one engine and holds resolved targets. The
//! persistent cache is a JSON file mapping signature cache keys to
//! [`CacheEntry`] descriptors so later processes can skip collection. Both
//! are validated against the file's [`Fingerprint`] before a hit is used.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use scout_lang::{Access, ResolvedTarget, content_hash};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::DEFAULT_CACHE_TTL_MS;
use crate::error::CacheError;

/// Identity of a file's contents at resolution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    pub mtime_ms: u64,
    pub size: u64,
    pub content_hash: u64,
}

impl Fingerprint {
    pub fn new(meta: &std::fs::Metadata, content: &str) -> Self {
        let mtime_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        Self {
            mtime_ms,
            size: meta.len(),
            content_hash: content_hash(content.as_bytes()),
        }
    }

    /// Read `path` once, returning its fingerprint and contents.
    pub async fn read(path: &Path) -> std::io::Result<(Self, String)> {
        let meta = tokio::fs::metadata(path).await?;
        let content = tokio::fs::read_to_string(path).await?;
        Ok((Self::new(&meta, &content), content))
    }
}

// ── Runtime cache ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct RuntimeEntry {
    target: ResolvedTarget,
    fingerprint: Fingerprint,
    stored_at: Instant,
    hits: u64,
}

/// In-memory resolved targets keyed by signature cache key.
#[derive(Debug)]
pub struct RuntimeCache {
    entries: Mutex<HashMap<String, RuntimeEntry>>,
    ttl: Duration,
}

impl RuntimeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// A hit only when the target came from `path` with the same
    /// fingerprint and has not expired. Stale entries are dropped.
    pub fn get(&self, key: &str, path: &Path, fingerprint: Fingerprint) -> Option<ResolvedTarget> {
        let mut entries = self.entries.lock().expect("runtime cache mutex poisoned");
        let entry = entries.get_mut(key)?;
        if entry.target.metadata.path == path
            && entry.fingerprint == fingerprint
            && entry.stored_at.elapsed() < self.ttl
        {
            entry.hits += 1;
            return Some(entry.target.clone());
        }
        entries.remove(key);
        None
    }

    /// The cached target's path, if any, without validating it.
    pub fn peek_path(&self, key: &str) -> Option<PathBuf> {
        self.entries
            .lock()
            .expect("runtime cache mutex poisoned")
            .get(key)
            .map(|e| e.target.metadata.path.clone())
    }

    /// Times the entry under `key` has been served.
    pub fn hits(&self, key: &str) -> Option<u64> {
        self.entries
            .lock()
            .expect("runtime cache mutex poisoned")
            .get(key)
            .map(|e| e.hits)
    }

    pub fn insert(&self, key: String, target: ResolvedTarget, fingerprint: Fingerprint) {
        self.entries.lock().expect("runtime cache mutex poisoned").insert(
            key,
            RuntimeEntry {
                target,
                fingerprint,
                stored_at: Instant::now(),
                hits: 0,
            },
        );
    }

    pub fn remove(&self, key: &str) {
        self.entries
            .lock()
            .expect("runtime cache mutex poisoned")
            .remove(key);
    }

    /// Drop every entry resolved from `path`.
    pub fn remove_path(&self, path: &Path) -> usize {
        let mut entries = self.entries.lock().expect("runtime cache mutex poisoned");
        let before = entries.len();
        entries.retain(|_, e| e.target.metadata.path != path);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .expect("runtime cache mutex poisoned")
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("runtime cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Persistent cache ───────────────────────────────────────────────

/// One persisted resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    #[serde(default)]
    pub cache_key: String,
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub access: Access,
    pub full_name: String,
    pub language: String,
    pub score: f64,
    /// Descriptor of the resolved value, compared against a fresh load.
    pub value: serde_json::Value,
    pub cached_at: DateTime<Utc>,
    /// Lifetime the entry was stored with.
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
    /// Times the entry has been served, from either cache.
    #[serde(default)]
    pub hits: u64,
}

fn default_ttl_ms() -> u64 {
    DEFAULT_CACHE_TTL_MS
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let ttl = i64::try_from(self.ttl_ms).map_or(chrono::Duration::MAX, chrono::Duration::milliseconds);
        now.signed_duration_since(self.cached_at) >= ttl
    }
}

#[derive(Debug)]
struct PersistentInner {
    path: PathBuf,
    /// `None` until the file has been read.
    entries: tokio::sync::Mutex<Option<BTreeMap<String, CacheEntry>>>,
    write_lock: tokio::sync::Mutex<()>,
}

/// JSON-file cache of resolutions.
///
/// The file is read lazily on first use; a missing or corrupt file is an
/// empty cache. Writes happen on background tasks, each snapshotting the
/// latest state under a write lock, and [`flush`](Self::flush) waits for
/// them. I/O failures are logged and never surface to callers.
#[derive(Debug)]
pub struct PersistentCache {
    inner: Arc<PersistentInner>,
    enabled: bool,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl PersistentCache {
    pub fn new(path: PathBuf, enabled: bool) -> Self {
        Self {
            inner: Arc::new(PersistentInner {
                path,
                entries: tokio::sync::Mutex::new(None),
                write_lock: tokio::sync::Mutex::new(()),
            }),
            enabled,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        if !self.enabled {
            return None;
        }
        let mut guard = self.inner.entries.lock().await;
        load_entries(&self.inner.path, &mut guard).await.get(key).cloned()
    }

    pub async fn insert(&self, key: String, entry: CacheEntry) {
        if !self.enabled {
            return;
        }
        {
            let mut guard = self.inner.entries.lock().await;
            load_entries(&self.inner.path, &mut guard)
                .await
                .insert(key, entry);
        }
        self.schedule_save();
    }

    pub async fn remove(&self, key: &str) {
        if !self.enabled {
            return;
        }
        let removed = {
            let mut guard = self.inner.entries.lock().await;
            load_entries(&self.inner.path, &mut guard)
                .await
                .remove(key)
                .is_some()
        };
        if removed {
            self.schedule_save();
        }
    }

    /// Count one more serve of `key`. Returns the new count.
    pub async fn record_hit(&self, key: &str) -> Option<u64> {
        if !self.enabled {
            return None;
        }
        let hits = {
            let mut guard = self.inner.entries.lock().await;
            let entry = load_entries(&self.inner.path, &mut guard).await.get_mut(key)?;
            entry.hits += 1;
            entry.hits
        };
        self.schedule_save();
        Some(hits)
    }

    /// Drop every entry resolved from `path`; returns how many were dropped.
    pub async fn remove_path(&self, path: &Path) -> usize {
        if !self.enabled {
            return 0;
        }
        let removed = {
            let mut guard = self.inner.entries.lock().await;
            let entries = load_entries(&self.inner.path, &mut guard).await;
            let before = entries.len();
            entries.retain(|_, e| e.path != path);
            before - entries.len()
        };
        if removed > 0 {
            self.schedule_save();
        }
        removed
    }

    pub async fn len(&self) -> usize {
        if !self.enabled {
            return 0;
        }
        let mut guard = self.inner.entries.lock().await;
        load_entries(&self.inner.path, &mut guard).await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Empty the cache and delete its file.
    pub async fn clear(&self) {
        self.flush().await;
        *self.inner.entries.lock().await = Some(BTreeMap::new());
        let _write = self.inner.write_lock.lock().await;
        match tokio::fs::remove_file(&self.inner.path).await {
            Ok(()) => debug!(path = %self.inner.path.display(), "Removed cache file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.inner.path.display(), error = %e, "Failed to remove cache file"),
        }
    }

    /// Wait for every scheduled save to finish.
    pub async fn flush(&self) {
        let handles: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.pending.lock().expect("pending saves mutex poisoned"));
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Cache save task failed");
            }
        }
    }

    fn schedule_save(&self) {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let _write = inner.write_lock.lock().await;
            let snapshot = inner.entries.lock().await.clone().unwrap_or_default();
            if let Err(e) = write_snapshot(&inner.path, &snapshot).await {
                warn!(path = %inner.path.display(), error = %e, "Failed to save cache");
            }
        });
        let mut pending = self.pending.lock().expect("pending saves mutex poisoned");
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }
}

async fn load_entries<'a>(
    path: &Path,
    slot: &'a mut Option<BTreeMap<String, CacheEntry>>,
) -> &'a mut BTreeMap<String, CacheEntry> {
    if slot.is_none() {
        *slot = Some(read_entries(path).await);
    }
    slot.get_or_insert_with(BTreeMap::new)
}

/// Read the cache file, keeping every entry that parses.
async fn read_entries(path: &Path) -> BTreeMap<String, CacheEntry> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot read cache file, starting empty");
            return BTreeMap::new();
        }
    };
    parse_entries(&text, path)
}

fn parse_entries(text: &str, path: &Path) -> BTreeMap<String, CacheEntry> {
    let map = match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(text) {
        Ok(map) => map,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Corrupt cache file, starting empty");
            return BTreeMap::new();
        }
    };
    let total = map.len();
    let entries: BTreeMap<String, CacheEntry> = map
        .into_iter()
        .filter_map(|(key, value)| match serde_json::from_value(value) {
            Ok(entry) => Some((key, entry)),
            Err(e) => {
                debug!(%key, error = %e, "Skipping unreadable cache entry");
                None
            }
        })
        .collect();
    debug!(path = %path.display(), loaded = entries.len(), skipped = total - entries.len(), "Loaded cache");
    entries
}

async fn write_snapshot(
    path: &Path,
    entries: &BTreeMap<String, CacheEntry>,
) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(entries)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
