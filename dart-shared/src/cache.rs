// Copyright 2022 Xayn AG
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Two-tier (in-memory + on-disk), content-addressed cache for upstream calls.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use md5::{Digest, Md5};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Configuration for a [`Cache`] instance.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root directory for the disk tier.
    pub cache_dir: PathBuf,
    /// Time-to-live for entries in either tier.
    pub ttl: Duration,
    /// Whether a successful-but-empty upstream result should be written to the
    /// cache. See `spec.md` §9's open question: the source never caches negative
    /// results and is silent on empty-but-successful ones; this makes the choice
    /// explicit rather than guessing. Default `false`.
    pub cache_empty_results: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cache/dart"),
            ttl: Duration::from_secs(24 * 60 * 60),
            cache_empty_results: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    timestamp_secs: u64,
    function: String,
    data: serde_json::Value,
}

#[derive(Default)]
struct Stats {
    hits: AtomicU64,
    misses: AtomicU64,
    saves: AtomicU64,
}

/// Content-addressed cache keyed by `(function name, canonicalized parameters)`.
///
/// Mirrors the source's `DartCache`: memory tier checked first, disk tier
/// sharded by the first two hex characters of the MD5 key, TTL invalidation on
/// read, corrupted files deleted rather than propagated as errors.
pub struct Cache {
    config: CacheConfig,
    memory: RwLock<HashMap<String, Entry>>,
    stats: Stats,
}

impl Cache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            memory: RwLock::new(HashMap::new()),
            stats: Stats::default(),
        }
    }

    fn key(function_name: &str, params: &serde_json::Value) -> String {
        // params must already be canonicalized (sorted keys) by the caller;
        // `serde_json::Value`'s `Map` is a `BTreeMap` so `to_string()` on a
        // `Value` built from it is already key-sorted.
        let key_string = format!("{function_name}:{params}");
        let mut hasher = Md5::new();
        hasher.update(key_string.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn disk_path(&self, key: &str) -> PathBuf {
        self.config.cache_dir.join(&key[..2]).join(format!("{key}.cache"))
    }

    fn is_valid(&self, timestamp_secs: u64) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        now.saturating_sub(timestamp_secs) < self.config.ttl.as_secs()
    }

    /// Looks up a previously cached value for `function_name` called with
    /// `params` (must be a `serde_json::Value::Object` with sorted keys, e.g.
    /// produced via [`canonical_params`]).
    pub async fn get<T: DeserializeOwned>(
        &self,
        function_name: &str,
        params: &serde_json::Value,
    ) -> Option<T> {
        let key = Self::key(function_name, params);

        if let Some(entry) = self.memory.read().await.get(&key) {
            if self.is_valid(entry.timestamp_secs) {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                debug!(function = function_name, "memory cache hit");
                return serde_json::from_value(entry.data.clone()).ok();
            }
        }
        self.memory.write().await.remove(&key);

        let path = self.disk_path(&key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Entry>(&bytes) {
                Ok(entry) if self.is_valid(entry.timestamp_secs) => {
                    let value = serde_json::from_value(entry.data.clone()).ok();
                    self.memory.write().await.insert(key, entry);
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(function = function_name, "file cache hit");
                    value
                }
                Ok(_) => {
                    let _ = tokio::fs::remove_file(&path).await;
                    debug!(function = function_name, "expired cache removed");
                    self.stats.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
                Err(error) => {
                    warn!(function = function_name, %error, "corrupted cache entry, removing");
                    let _ = tokio::fs::remove_file(&path).await;
                    self.stats.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
            Err(_) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                debug!(function = function_name, "cache miss");
                None
            }
        }
    }

    /// Writes `data` into both tiers. Callers must not call this for negative
    /// (error) results; whether a successful-but-empty result is written is
    /// gated by [`CacheConfig::cache_empty_results`] and decided by the caller,
    /// not by this method.
    pub async fn set(
        &self,
        function_name: &str,
        params: &serde_json::Value,
        data: &impl Serialize,
    ) {
        let key = Self::key(function_name, params);
        let timestamp_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let data = match serde_json::to_value(data) {
            Ok(value) => value,
            Err(error) => {
                warn!(function = function_name, %error, "failed to serialize cache value");
                return;
            }
        };
        let entry = Entry {
            timestamp_secs,
            function: function_name.to_owned(),
            data,
        };

        self.memory.write().await.insert(key.clone(), entry.clone());

        let path = self.disk_path(&key);
        if let Some(parent) = path.parent() {
            if let Err(error) = tokio::fs::create_dir_all(parent).await {
                warn!(function = function_name, %error, "cache write error");
                return;
            }
        }
        match serde_json::to_vec(&entry) {
            Ok(bytes) => {
                if let Err(error) = tokio::fs::write(&path, bytes).await {
                    warn!(function = function_name, %error, "cache write error");
                } else {
                    self.stats.saves.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(error) => warn!(function = function_name, %error, "cache write error"),
        }
    }

    /// Clears both tiers. `older_than` restricts deletion to entries older than
    /// the given duration; `None` clears everything. Returns the number of
    /// on-disk files removed.
    pub async fn clear(&self, older_than: Option<Duration>) -> usize {
        let cutoff = older_than.map(|d| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .saturating_sub(d)
                .as_secs()
        });

        {
            let mut memory = self.memory.write().await;
            match cutoff {
                None => memory.clear(),
                Some(cutoff) => memory.retain(|_, entry| entry.timestamp_secs >= cutoff),
            }
        }

        let mut removed = 0usize;
        if let Ok(mut shards) = tokio::fs::read_dir(&self.config.cache_dir).await {
            while let Ok(Some(shard)) = shards.next_entry().await {
                let shard_path = shard.path();
                if !shard_path.is_dir() {
                    continue;
                }
                if let Ok(mut files) = tokio::fs::read_dir(&shard_path).await {
                    while let Ok(Some(file)) = files.next_entry().await {
                        let path = file.path();
                        if path.extension().and_then(|e| e.to_str()) != Some("cache") {
                            continue;
                        }
                        let should_remove = match cutoff {
                            None => true,
                            Some(cutoff) => file_is_older_than(&path, cutoff).await,
                        };
                        if should_remove && tokio::fs::remove_file(&path).await.is_ok() {
                            removed += 1;
                        }
                    }
                }
            }
        }
        removed
    }

    pub async fn stats(&self) -> CacheStats {
        let hits = self.stats.hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        let saves = self.stats.saves.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            saves,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
            memory_entries: self.memory.read().await.len(),
        }
    }
}

async fn file_is_older_than(path: &Path, cutoff_secs: u64) -> bool {
    tokio::fs::metadata(path)
        .await
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() < cutoff_secs)
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub saves: u64,
    pub hit_rate: f64,
    pub memory_entries: usize,
}

/// Canonicalizes a parameter set into a stable `serde_json::Value` suitable for
/// cache keying: the object's keys are sorted because `serde_json::Map` (when
/// the `preserve_order` feature is not enabled, as here) is backed by a
/// `BTreeMap`, matching the source's `json.dumps(params, sort_keys=True)`.
pub fn canonical_params(params: impl Serialize) -> serde_json::Value {
    serde_json::to_value(params).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(dir: &Path) -> CacheConfig {
        CacheConfig {
            cache_dir: dir.to_path_buf(),
            ttl: Duration::from_secs(3600),
            cache_empty_results: false,
        }
    }

    #[tokio::test]
    async fn write_then_read_within_ttl_round_trips() {
        let dir = tempdir();
        let cache = Cache::new(config(dir.path()));
        let params = canonical_params(json!({"b": 1, "a": 2}));
        cache.set("search", &params, &json!({"hits": 3})).await;

        let value: serde_json::Value = cache.get("search", &params).await.unwrap();
        assert_eq!(value, json!({"hits": 3}));
        assert_eq!(cache.stats().await.hits, 1);
    }

    #[tokio::test]
    async fn miss_on_different_params() {
        let dir = tempdir();
        let cache = Cache::new(config(dir.path()));
        let params_a = canonical_params(json!({"a": 1}));
        let params_b = canonical_params(json!({"a": 2}));
        cache.set("search", &params_a, &json!("x")).await;
        let value: Option<serde_json::Value> = cache.get("search", &params_b).await;
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn clear_all_removes_memory_and_disk() {
        let dir = tempdir();
        let cache = Cache::new(config(dir.path()));
        let params = canonical_params(json!({"a": 1}));
        cache.set("search", &params, &json!("x")).await;
        let removed = cache.clear(None).await;
        assert_eq!(removed, 1);
        let value: Option<serde_json::Value> = cache.get("search", &params).await;
        assert!(value.is_none());
    }

    fn tempdir() -> TempDirGuard {
        let mut path = std::env::temp_dir();
        path.push(format!("dart-cache-test-{}", std::process::id()));
        path.push(unique_suffix());
        TempDirGuard(path)
    }

    fn unique_suffix() -> String {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        COUNTER.fetch_add(1, Ordering::Relaxed).to_string()
    }

    struct TempDirGuard(PathBuf);

    impl TempDirGuard {
        fn path(&self) -> &Path {
            &self.0
        }
    }

    impl Drop for TempDirGuard {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }
}
