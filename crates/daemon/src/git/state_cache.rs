// Short-TTL memoization of hot read-only git queries.
//
// Callers accept up to one TTL of staleness. Nothing invalidates entries on
// writes; code that needs a value right after a mutation runs the command
// directly instead of going through the cache.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Default TTL for cached queries.
pub const DEFAULT_TTL: Duration = Duration::from_millis(800);

/// Read queries eligible for caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackedQuery {
    Status,
    CurrentBranch,
    Head,
}

impl TrackedQuery {
    pub fn command(self) -> &'static str {
        match self {
            Self::Status => "git status --porcelain",
            Self::CurrentBranch => "git branch --show-current",
            Self::Head => "git rev-parse HEAD",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub server_id: String,
    pub project_path: String,
    pub command: String,
}

impl CacheKey {
    pub fn new(server_id: &str, project_path: &str, command: &str) -> Self {
        Self {
            server_id: server_id.to_string(),
            project_path: project_path.to_string(),
            command: command.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedValue {
    pub value: String,
    pub success: bool,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CachedValue,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct GitStateCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl Default for GitStateCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl GitStateCache {
    /// A zero TTL disables caching.
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached value, or `None` once `expires_at` has passed (the entry is
    /// evicted on that lookup).
    pub fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        let mut entries = self.lock_entries();
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if now <= entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: CacheKey, value: CachedValue) {
        if self.ttl.is_zero() {
            return;
        }
        let expires_at = Instant::now() + self.ttl;
        self.lock_entries().insert(key, CacheEntry { value, expires_at });
    }

    /// Remove expired entries.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock_entries();
        let before = entries.len();
        entries.retain(|_, entry| now <= entry.expires_at);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.lock_entries().clear();
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
