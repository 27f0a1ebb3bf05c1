mod memory;
mod sqlite;

pub use memory::MemoryCache;
pub use sqlite::SqliteCache;

use crate::errors::{AppError, AppResult};
use crate::settings::CacheSettings;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;

pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> AppResult<Option<String>>;

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()>;

    fn delete(&self, key: &str) -> AppResult<bool>;

    fn keys(&self, pattern: &str) -> AppResult<Vec<String>>;
}

pub fn open_cache(settings: &CacheSettings) -> AppResult<Arc<dyn CacheBackend>> {
    match &settings.cache_path {
        Some(path) => Ok(Arc::new(SqliteCache::new(path)?)),
        None => Ok(Arc::new(MemoryCache::new())),
    }
}

pub(crate) fn glob_regex(pattern: &str) -> AppResult<Regex> {
    let mut expression = String::with_capacity(pattern.len() + 8);
    expression.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expression.push_str(".*"),
            '?' => expression.push('.'),
            other => expression.push_str(&regex::escape(&other.to_string())),
        }
    }
    expression.push('$');
    Regex::new(&expression).map_err(|error| AppError::Cache(format!("invalid key pattern '{pattern}': {error}")))
}

#[cfg(test)]
mod tests {
    use super::glob_regex;

    #[test]
    fn glob_matches_whole_key() {
        let regex = glob_regex("overview_state_*").expect("regex");
        assert!(regex.is_match("overview_state_42"));
        assert!(!regex.is_match("rebuild_overview_state_42_task_id"));
    }

    #[test]
    fn glob_escapes_regex_metacharacters() {
        let regex = glob_regex("a.b?_state").expect("regex");
        assert!(regex.is_match("a.bc_state"));
        assert!(!regex.is_match("axbc_state"));
    }
}
