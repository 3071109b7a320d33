//! File-based cache for vulnerability lookups.
//!
//! Each entry is a JSON file that expires after the configured TTL. Lookups
//! for the same `(package, version)` pair are therefore answered locally
//! across runs until the entry ages out.
//!
//! # Cache Location
//!
//! - Linux: `~/.cache/bootsbom/`
//! - macOS: `~/Library/Caches/bootsbom/`
//!
//! # Example
//!
//! ```no_run
//! use bootsbom::Cache;
//!
//! let cache = Cache::new();
//! cache.set("nvd_openssl_3.0.2", &Vec::<String>::new()).unwrap();
//! let hit: Option<Vec<String>> = cache.get("nvd_openssl_3.0.2");
//! assert!(hit.is_some());
//! ```

use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tracing::debug;

/// Default cache TTL in hours.
const CACHE_TTL_HOURS: u64 = 24;

/// Directory holding cached lookups.
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("bootsbom")
}

pub struct Cache {
    dir: PathBuf,
    ttl: Duration,
}

impl Cache {
    /// Creates a cache with the default 24-hour TTL.
    pub fn new() -> Self {
        Self::with_ttl_hours(CACHE_TTL_HOURS)
    }

    pub fn with_ttl_hours(hours: u64) -> Self {
        Self::with_dir(cache_dir(), Duration::from_secs(hours * 3600))
    }

    /// A cache rooted at an explicit directory.
    pub fn with_dir(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
        }
        Ok(())
    }

    /// Converts a cache key to a safe filename.
    fn cache_path(&self, key: &str) -> PathBuf {
        let safe_key: String = key
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", safe_key))
    }

    /// Returns `None` if the key is missing, expired or unreadable.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.cache_path(key);
        let modified = fs::metadata(&path).and_then(|m| m.modified()).ok()?;

        let expired = SystemTime::now()
            .duration_since(modified)
            .map(|elapsed| elapsed > self.ttl)
            .unwrap_or(false);
        if expired {
            debug!(key, "cache entry expired");
            let _ = fs::remove_file(&path);
            return None;
        }

        let content = fs::read_to_string(&path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be created or the
    /// entry cannot be written.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.ensure_dir()?;
        let path = self.cache_path(key);
        let content = serde_json::to_string(value)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// Removes every cached entry and returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        if self.dir.exists() {
            for entry in fs::read_dir(&self.dir)?.flatten() {
                let path = entry.path();
                if path.extension().map(|e| e == "json").unwrap_or(false)
                    && fs::remove_file(&path).is_ok()
                {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Severity, VulnRecord};

    #[test]
    fn set_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::with_dir(dir.path(), Duration::from_secs(3600));

        let vulns = vec![VulnRecord::new("CVE-2022-0778", Severity::High, 7.5)];
        cache.set("nvd_openssl_3.0.2", &vulns).unwrap();

        let hit: Option<Vec<VulnRecord>> = cache.get("nvd_openssl_3.0.2");
        assert_eq!(hit, Some(vulns));
        assert!(cache.get::<Vec<VulnRecord>>("nvd_zlib_1.2").is_none());
    }

    #[test]
    fn expired_entries_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::with_dir(dir.path(), Duration::ZERO);
        cache.set("key", &1u32).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get::<u32>("key").is_none());
    }

    #[test]
    fn keys_are_sanitized() {
        let cache = Cache::with_dir("/tmp/c", Duration::ZERO);
        assert_eq!(
            cache.cache_path("nvd_libc6:amd64_2.31/x"),
            PathBuf::from("/tmp/c/nvd_libc6_amd64_2.31_x.json")
        );
    }

    #[test]
    fn clear_counts_removed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::with_dir(dir.path(), Duration::from_secs(60));
        cache.set("a", &1u32).unwrap();
        cache.set("b", &2u32).unwrap();
        fs::write(dir.path().join("keep.txt"), "").unwrap();

        assert_eq!(cache.clear().unwrap(), 2);
        assert!(dir.path().join("keep.txt").exists());
    }
}
