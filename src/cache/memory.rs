use super::{glob_regex, CacheBackend};
use crate::errors::{AppError, AppResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> AppResult<MutexGuard<'_, HashMap<String, CacheEntry>>> {
        self.entries.lock().map_err(|_| AppError::poisoned("memory cache"))
    }

    pub fn live_count(&self) -> AppResult<usize> {
        let now = Instant::now();
        let entries = self.entries()?;
        Ok(entries.values().filter(|entry| entry.is_live(now)).count())
    }
}

impl CacheBackend for MemoryCache {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries()?;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()> {
        let entry = CacheEntry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries()?.insert(key.to_string(), entry);
        Ok(())
    }

    fn delete(&self, key: &str) -> AppResult<bool> {
        let now = Instant::now();
        let removed = self.entries()?.remove(key);
        Ok(removed.is_some_and(|entry| entry.is_live(now)))
    }

    fn keys(&self, pattern: &str) -> AppResult<Vec<String>> {
        let regex = glob_regex(pattern)?;
        let now = Instant::now();
        let mut entries = self.entries()?;
        entries.retain(|_, entry| entry.is_live(now));
        let mut keys = entries
            .keys()
            .filter(|key| regex.is_match(key))
            .cloned()
            .collect::<Vec<_>>();
        keys.sort();
        Ok(keys)
    }
}
