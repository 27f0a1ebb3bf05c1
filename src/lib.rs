pub mod builder;
pub mod cache;
pub mod db;
pub mod errors;
pub mod hooks;
pub mod keys;
pub mod models;
pub mod queue;
pub mod scheduler;
pub mod settings;
pub mod state;
pub mod store;
pub mod updater;

pub use crate::cache::{open_cache, CacheBackend, MemoryCache, SqliteCache};
pub use crate::db::Database;
pub use crate::errors::{AppError, AppResult};
pub use crate::hooks::StateHooks;
pub use crate::queue::{Job, JobContext, ManualQueue, TaskQueue, WorkerQueue};
pub use crate::scheduler::{RebuildScheduler, RebuildState, TaskRecord, TaskState};
pub use crate::settings::CacheSettings;
pub use crate::state::{InvalidationReport, StateCacheManager};
pub use crate::store::EntityStore;
pub use crate::updater::IncrementalUpdater;

use crate::models::{DetailState, Entity, OverviewState};
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

#[derive(Clone)]
pub struct StateService {
    state: Arc<StateCacheManager>,
    updater: Arc<IncrementalUpdater>,
    hooks: Arc<StateHooks>,
}

impl StateService {
    pub fn new(
        settings: CacheSettings,
        store: Arc<dyn EntityStore>,
        cache: Arc<dyn CacheBackend>,
        queue: Arc<dyn TaskQueue>,
    ) -> AppResult<Self> {
        settings.validate()?;
        let scheduler = RebuildScheduler::new(cache.clone(), queue);
        let state = Arc::new(StateCacheManager::new(cache, store, scheduler, settings));
        let updater = Arc::new(IncrementalUpdater::new(state.clone()));
        let hooks = Arc::new(StateHooks::new(updater.clone()));
        Ok(Self {
            state,
            updater,
            hooks,
        })
    }

    pub fn start(settings: CacheSettings, store: Arc<dyn EntityStore>, handle: Handle) -> AppResult<Self> {
        let cache = open_cache(&settings)?;
        let queue = WorkerQueue::from_settings(handle, &settings);
        queue.start();
        let service = Self::new(settings, store, cache, Arc::new(queue))?;
        service.invalidate_all()?;
        Ok(service)
    }

    pub fn state(&self) -> &StateCacheManager {
        &self.state
    }

    pub fn updater(&self) -> &IncrementalUpdater {
        &self.updater
    }

    pub fn hooks(&self) -> &StateHooks {
        &self.hooks
    }

    pub fn get_snapshot(&self, owner: &str) -> AppResult<OverviewState> {
        self.state.get_snapshot(owner)
    }

    pub fn get_detail_state(&self, entity: &Entity) -> AppResult<DetailState> {
        self.state.get_detail_state(entity)
    }

    pub fn invalidate_all(&self) -> AppResult<InvalidationReport> {
        self.state.invalidate_all()
    }
}

pub fn init_tracing(settings: &CacheSettings) -> AppResult<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_filter));

    match &settings.log_dir {
        Some(log_dir) => init_file_tracing(log_dir, filter),
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|error| AppError::Internal(error.to_string())),
    }
}

fn init_file_tracing(log_dir: &Path, filter: tracing_subscriber::EnvFilter) -> AppResult<()> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "state-cache.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}
