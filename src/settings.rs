use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct CacheSettings {
    pub rebuild_delay_ms: u64,
    pub startup_rebuild_delay_ms: u64,
    pub worker_limit: usize,
    pub max_queue_size: usize,
    pub cache_path: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub log_filter: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            rebuild_delay_ms: 30_000,
            startup_rebuild_delay_ms: 0,
            worker_limit: 2,
            max_queue_size: 1_000,
            cache_path: None,
            log_dir: None,
            log_filter: "info".to_string(),
        }
    }
}

impl CacheSettings {
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> AppResult<Self> {
        let settings: Self = if raw.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.worker_limit == 0 {
            return Err(AppError::Config("worker_limit must be at least 1".to_string()));
        }
        if self.max_queue_size == 0 {
            return Err(AppError::Config("max_queue_size must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn rebuild_delay(&self) -> Duration {
        Duration::from_millis(self.rebuild_delay_ms)
    }

    pub fn startup_rebuild_delay(&self) -> Duration {
        Duration::from_millis(self.startup_rebuild_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::CacheSettings;
    use std::time::Duration;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let settings = CacheSettings::from_yaml("rebuild_delay_ms: 500\ncache_path: /tmp/cache.db\n")
            .expect("settings");
        assert_eq!(settings.rebuild_delay(), Duration::from_millis(500));
        assert_eq!(settings.worker_limit, 2);
        assert_eq!(settings.log_filter, "info");
        assert!(settings.cache_path.is_some());
    }

    #[test]
    fn rejects_zero_worker_limit() {
        let err = CacheSettings::from_yaml("worker_limit: 0").expect_err("invalid settings");
        assert!(err.to_string().starts_with("CONFIG_INVALID"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = CacheSettings::load(&dir.path().join("absent.yaml")).expect("settings");
        assert_eq!(settings, CacheSettings::default());
    }
}
