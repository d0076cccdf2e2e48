//! Turns a ranked candidate into a [`ResolvedTarget`].
//!
//! Every resolution re-reads the candidate file, runs the safety gate, and
//! only then consults the caches, so an edited or newly unsafe file is
//! never served from a stale entry. Module loads are single-flight per
//! path and fingerprint; resolutions are serialized per signature key.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use lru::LruCache;
use scout_lang::value::{TargetMetadata, serialize_cache_value};
use scout_lang::{Access, AccessKind, LanguagePlugin, ModuleExports, ResolvedTarget, Signature, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheEntry, Fingerprint, PersistentCache, RuntimeCache};
use crate::candidate::Candidate;
use crate::config::ScoutConfig;
use crate::error::{DiscoveryError, LoadError, Result};
use crate::evaluator::{
    SafetyPolicy, plan_access, resolve_target_from_module, select_export_from_metadata,
    validate_resolution,
};
use crate::loader::ModuleLoader;
use crate::registry::PluginRegistry;

#[derive(Debug)]
struct ModuleSlot {
    fingerprint: Fingerprint,
    exports: OnceCell<Arc<ModuleExports>>,
}

/// Where a resolution was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Runtime,
    Persistent,
    Fresh,
}

#[derive(Debug)]
pub struct ResultAssembler {
    loader: Arc<dyn ModuleLoader>,
    safety: SafetyPolicy,
    runtime: RuntimeCache,
    persistent: PersistentCache,
    ttl_ms: u64,
    /// Most recently loaded modules, bounded like the parse caches.
    modules: Mutex<LruCache<PathBuf, Arc<ModuleSlot>>>,
    /// In-flight resolutions per signature key; removed once uncontended.
    key_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ResultAssembler {
    pub fn new(root: &Path, config: &ScoutConfig, loader: Arc<dyn ModuleLoader>) -> Self {
        let capacity =
            NonZeroUsize::new(config.cache.parse_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            loader,
            safety: SafetyPolicy::new(&config.discovery.unsafe_patterns),
            runtime: RuntimeCache::new(Duration::from_millis(config.cache.ttl_ms)),
            persistent: PersistentCache::new(config.cache_path(root), config.cache.enabled),
            ttl_ms: config.cache.ttl_ms,
            modules: Mutex::new(LruCache::new(capacity)),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn loader(&self) -> &Arc<dyn ModuleLoader> {
        &self.loader
    }

    pub fn persistent(&self) -> &PersistentCache {
        &self.persistent
    }

    pub fn runtime(&self) -> &RuntimeCache {
        &self.runtime
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.key_locks.lock().expect("key lock map poisoned");
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Drop the map's lock for `key` when only the map and `lock` hold it.
    /// Must be called after the guard is released.
    fn release_key_lock(&self, key: &str, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.key_locks.lock().expect("key lock map poisoned");
        if Arc::strong_count(lock) == 2 {
            locks.remove(key);
        }
    }

    /// Resolve one candidate: safety gate, caches, then a fresh load.
    #[instrument(skip_all, fields(path = %candidate.relative_path, name = %candidate.name()))]
    pub async fn resolve(
        &self,
        candidate: &Candidate,
        signature: &Signature,
        plugin: Arc<dyn LanguagePlugin>,
    ) -> Result<ResolvedTarget> {
        self.resolve_with_source(candidate, signature, plugin)
            .await
            .map(|(target, _)| target)
    }

    pub async fn resolve_with_source(
        &self,
        candidate: &Candidate,
        signature: &Signature,
        plugin: Arc<dyn LanguagePlugin>,
    ) -> Result<(ResolvedTarget, ResolutionSource)> {
        let key = signature.cache_key();
        let lock = self.key_lock(&key);
        let resolved = {
            let _guard = lock.lock().await;
            self.resolve_locked(&key, candidate, signature, plugin).await
        };
        self.release_key_lock(&key, &lock);
        resolved
    }

    async fn resolve_locked(
        &self,
        key: &str,
        candidate: &Candidate,
        signature: &Signature,
        plugin: Arc<dyn LanguagePlugin>,
    ) -> Result<(ResolvedTarget, ResolutionSource)> {
        let path = candidate.path.as_path();
        let (fingerprint, content) = Fingerprint::read(path).await?;
        self.ensure_safe(path, plugin.as_ref(), &content)?;

        if let Some(target) = self.runtime.get(key, path, fingerprint) {
            self.persistent.record_hit(key).await;
            debug!(%key, "Runtime cache hit");
            return Ok((target, ResolutionSource::Runtime));
        }

        if let Some(entry) = self.persistent.get(key).await {
            if entry.path == path {
                match self
                    .revalidate(key, &entry, signature, fingerprint, Arc::clone(&plugin))
                    .await
                {
                    Some(target) => return Ok((target, ResolutionSource::Persistent)),
                    None => self.persistent.remove(key).await,
                }
            }
        }

        let access = plan_access(&candidate.descriptor)
            .or_else(|| select_export_from_metadata(&candidate.file, signature))
            .ok_or_else(|| DiscoveryError::Validation {
                path: path.to_path_buf(),
                problems: vec![format!("`{}` is not exported", candidate.name())],
            })?;

        let exports = self.load_exports(path, fingerprint, Arc::clone(&plugin)).await?;
        let (value, access) = resolve_target_from_module(&exports, signature, Some(&access))
            .ok_or_else(|| DiscoveryError::Validation {
                path: path.to_path_buf(),
                problems: vec!["no export matches the signature".to_string()],
            })?;
        validate_resolution(&value, &access, signature, &module_stem(path)).map_err(|problems| {
            DiscoveryError::Validation {
                path: path.to_path_buf(),
                problems,
            }
        })?;

        let target = build_target(value, access, path, plugin.id(), candidate.score, key);
        self.store(key, &target, fingerprint).await;
        info!(%key, full_name = %target.full_name, "Resolved target");
        Ok((target, ResolutionSource::Fresh))
    }

    /// Cache-only resolution, used before any collection happens.
    ///
    /// Returns a target only when a cached entry still points at a safe,
    /// unchanged file whose fresh load yields the same value.
    #[instrument(skip_all)]
    pub async fn lookup(
        &self,
        signature: &Signature,
        registry: &PluginRegistry,
    ) -> Option<ResolvedTarget> {
        let key = signature.cache_key();
        let lock = self.key_lock(&key);
        let found = {
            let _guard = lock.lock().await;
            self.lookup_locked(&key, signature, registry).await
        };
        self.release_key_lock(&key, &lock);
        found
    }

    async fn lookup_locked(
        &self,
        key: &str,
        signature: &Signature,
        registry: &PluginRegistry,
    ) -> Option<ResolvedTarget> {
        if let Some(path) = self.runtime.peek_path(key) {
            if let Some(target) = self.lookup_runtime(key, &path, registry).await {
                self.persistent.record_hit(key).await;
                return Some(target);
            }
        }

        let entry = self.persistent.get(key).await?;
        let plugin = registry.for_file(&entry.path)?;
        let checked = match Fingerprint::read(&entry.path).await {
            Ok((fingerprint, content))
                if self.ensure_safe(&entry.path, plugin.as_ref(), &content).is_ok() =>
            {
                self.revalidate(key, &entry, signature, fingerprint, plugin)
                    .await
            }
            Ok(_) => None,
            Err(e) => {
                debug!(path = %entry.path.display(), error = %e, "Cached file unreadable");
                None
            }
        };
        if checked.is_none() {
            self.persistent.remove(key).await;
        }
        checked
    }

    async fn lookup_runtime(
        &self,
        key: &str,
        path: &Path,
        registry: &PluginRegistry,
    ) -> Option<ResolvedTarget> {
        let plugin = registry.for_file(path)?;
        let Ok((fingerprint, content)) = Fingerprint::read(path).await else {
            self.runtime.remove(key);
            return None;
        };
        if self.ensure_safe(path, plugin.as_ref(), &content).is_err() {
            return None;
        }
        self.runtime.get(key, path, fingerprint)
    }

    /// Re-load a persisted entry and confirm it still describes the module.
    async fn revalidate(
        &self,
        key: &str,
        entry: &CacheEntry,
        signature: &Signature,
        fingerprint: Fingerprint,
        plugin: Arc<dyn LanguagePlugin>,
    ) -> Option<ResolvedTarget> {
        if entry.fingerprint != fingerprint {
            debug!(%key, "Persistent entry fingerprint changed");
            return None;
        }
        if entry.is_expired(Utc::now()) {
            debug!(%key, "Persistent entry expired");
            return None;
        }
        let language = plugin.id();
        let exports = match self.load_exports(&entry.path, fingerprint, plugin).await {
            Ok(exports) => exports,
            Err(e) => {
                warn!(%key, error = %e, "Reload of cached module failed");
                return None;
            }
        };
        let value = exports.get(&entry.access)?;
        if serialize_cache_value(&value) != entry.value {
            debug!(%key, "Cached descriptor no longer matches module");
            return None;
        }
        if validate_resolution(&value, &entry.access, signature, &module_stem(&entry.path)).is_err()
        {
            return None;
        }
        let target = ResolvedTarget {
            value,
            access: entry.access.clone(),
            full_name: entry.full_name.clone(),
            metadata: TargetMetadata {
                path: entry.path.clone(),
                language: language.to_string(),
                score: entry.score,
                cache_key: key.to_string(),
            },
        };
        self.runtime
            .insert(key.to_string(), target.clone(), fingerprint);
        let hits = self.persistent.record_hit(key).await;
        debug!(%key, ?hits, "Persistent cache hit");
        Some(target)
    }

    fn ensure_safe(&self, path: &Path, plugin: &dyn LanguagePlugin, content: &str) -> Result<()> {
        let Some(pattern) = self.safety.check(plugin, content) else {
            return Ok(());
        };
        warn!(path = %path.display(), %pattern, "Refusing to load unsafe candidate");
        self.runtime.remove_path(path);
        self.modules
            .lock()
            .expect("module slot map poisoned")
            .pop(path);
        Err(DiscoveryError::UnsafeCandidate {
            path: path.to_path_buf(),
            pattern,
        })
    }

    /// Single-flight load of a module's exports for one fingerprint.
    async fn load_exports(
        &self,
        path: &Path,
        fingerprint: Fingerprint,
        plugin: Arc<dyn LanguagePlugin>,
    ) -> std::result::Result<Arc<ModuleExports>, LoadError> {
        let slot = {
            let mut modules = self.modules.lock().expect("module slot map poisoned");
            let current = modules
                .get(path)
                .filter(|slot| slot.fingerprint == fingerprint)
                .cloned();
            if let Some(slot) = current {
                slot
            } else {
                plugin
                    .parse_cache()
                    .invalidate_if_changed(path, fingerprint.content_hash);
                let slot = Arc::new(ModuleSlot {
                    fingerprint,
                    exports: OnceCell::new(),
                });
                modules.put(path.to_path_buf(), Arc::clone(&slot));
                slot
            }
        };
        let exports = slot
            .exports
            .get_or_try_init(|| async {
                debug!(path = %path.display(), loader = self.loader.name(), "Loading module");
                self.loader.load(path, plugin).await.map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(exports))
    }

    async fn store(&self, key: &str, target: &ResolvedTarget, fingerprint: Fingerprint) {
        self.runtime
            .insert(key.to_string(), target.clone(), fingerprint);
        self.persistent
            .insert(
                key.to_string(),
                CacheEntry {
                    cache_key: key.to_string(),
                    path: target.metadata.path.clone(),
                    fingerprint,
                    access: target.access.clone(),
                    full_name: target.full_name.clone(),
                    language: target.metadata.language.clone(),
                    score: target.metadata.score,
                    value: serialize_cache_value(&target.value),
                    cached_at: Utc::now(),
                    ttl_ms: self.ttl_ms,
                    hits: 0,
                },
            )
            .await;
    }

    /// Forget everything known about `path`.
    pub async fn invalidate_path(&self, path: &Path) {
        let runtime = self.runtime.remove_path(path);
        let persistent = self.persistent.remove_path(path).await;
        self.modules
            .lock()
            .expect("module slot map poisoned")
            .pop(path);
        debug!(path = %path.display(), runtime, persistent, "Invalidated path");
    }

    pub async fn clear(&self) {
        self.runtime.clear();
        self.modules.lock().expect("module slot map poisoned").clear();
        self.persistent.clear().await;
    }

    pub async fn flush(&self) {
        self.persistent.flush().await;
    }
}

fn module_stem(path: &Path) -> String {
    path.file_stem()
        .map_or_else(String::new, |s| s.to_string_lossy().to_string())
}

/// `stem.Name` for exports, the bare stem for the module itself.
fn full_name(path: &Path, access: &Access, value: &Value) -> String {
    let stem = module_stem(path);
    if access.kind == AccessKind::Module {
        return stem;
    }
    let name = access
        .name
        .as_deref()
        .or_else(|| value.name())
        .unwrap_or("default");
    format!("{stem}.{name}")
}

fn build_target(
    value: Value,
    access: Access,
    path: &Path,
    language: &str,
    score: f64,
    key: &str,
) -> ResolvedTarget {
    ResolvedTarget {
        full_name: full_name(path, &access, &value),
        value,
        access,
        metadata: TargetMetadata {
            path: path.to_path_buf(),
            language: language.to_string(),
            score,
            cache_key: key.to_string(),
        },
    }
}
