use crate::builder;
use crate::cache::CacheBackend;
use crate::errors::AppResult;
use crate::keys;
use crate::models::{DetailState, Entity, OverviewState};
use crate::scheduler::RebuildScheduler;
use crate::settings::CacheSettings;
use crate::store::EntityStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct InvalidationReport {
    pub detail_states_cleared: usize,
    pub rebuilds_scheduled: usize,
}

pub struct StateCacheManager {
    cache: Arc<dyn CacheBackend>,
    store: Arc<dyn EntityStore>,
    scheduler: RebuildScheduler,
    settings: CacheSettings,
}

impl StateCacheManager {
    pub fn new(
        cache: Arc<dyn CacheBackend>,
        store: Arc<dyn EntityStore>,
        scheduler: RebuildScheduler,
        settings: CacheSettings,
    ) -> Self {
        Self {
            cache,
            store,
            scheduler,
            settings,
        }
    }

    pub fn store(&self) -> &dyn EntityStore {
        self.store.as_ref()
    }

    pub fn cache(&self) -> &dyn CacheBackend {
        self.cache.as_ref()
    }

    pub fn scheduler(&self) -> &RebuildScheduler {
        &self.scheduler
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn get_snapshot(&self, owner: &str) -> AppResult<OverviewState> {
        let key = keys::overview_key(owner);
        if let Some(snapshot) = self.read_document::<OverviewState>(&key)? {
            tracing::debug!(key = %key, "snapshot cache hit");
            return Ok(snapshot);
        }
        tracing::debug!(key = %key, "snapshot cache miss");
        let snapshot = builder::build_snapshot(self.store(), owner)?;
        self.write_document(&key, &snapshot)?;
        Ok(snapshot)
    }

    pub fn get_detail_state(&self, entity: &Entity) -> AppResult<DetailState> {
        let key = keys::detail_key(entity.uuid());
        match self.read_document::<DetailState>(&key)? {
            Some(state) if state.kind() == entity.kind() => {
                tracing::debug!(key = %key, "detail state cache hit");
                return Ok(state);
            }
            Some(state) => {
                tracing::warn!(
                    key = %key,
                    cached = state.kind().as_str(),
                    expected = entity.kind().as_str(),
                    "cached detail state has the wrong kind; rebuilding"
                );
            }
            None => tracing::debug!(key = %key, "detail state cache miss"),
        }
        let state = builder::build_detail_state(self.store(), entity)?;
        self.write_document(&key, &state)?;
        Ok(state)
    }

    pub fn cached_snapshot(&self, owner: &str) -> AppResult<Option<OverviewState>> {
        self.read_document(&keys::overview_key(owner))
    }

    pub fn cached_detail_state(&self, uuid: &str) -> AppResult<Option<DetailState>> {
        self.read_document(&keys::detail_key(uuid))
    }

    pub fn store_snapshot(&self, owner: &str, snapshot: &OverviewState) -> AppResult<()> {
        self.write_document(&keys::overview_key(owner), snapshot)
    }

    pub fn store_detail_state(&self, uuid: &str, state: &DetailState) -> AppResult<()> {
        self.write_document(&keys::detail_key(uuid), state)
    }

    pub fn delete_snapshot(&self, owner: &str) -> AppResult<bool> {
        self.cache.delete(&keys::overview_key(owner))
    }

    pub fn delete_detail_state(&self, uuid: &str) -> AppResult<bool> {
        let removed = self.cache.delete(&keys::detail_key(uuid))?;
        if removed {
            tracing::debug!(uuid = %uuid, "dropped cached detail state");
        }
        Ok(removed)
    }

    pub fn schedule_snapshot_rebuild(&self, owner: &str, delay: Duration) -> AppResult<String> {
        let store = self.store.clone();
        let owned = owner.to_string();
        self.scheduler.schedule_rebuild(
            &keys::overview_key(owner),
            move || builder::build_snapshot(store.as_ref(), &owned),
            delay,
        )
    }

    pub fn schedule_detail_rebuild(&self, entity: &Entity, delay: Duration) -> AppResult<String> {
        let store = self.store.clone();
        let target = entity.clone();
        self.scheduler.schedule_rebuild(
            &keys::detail_key(entity.uuid()),
            move || {
                let current = builder::reload_entity(store.as_ref(), &target)?;
                builder::build_detail_state(store.as_ref(), &current)
            },
            delay,
        )
    }

    pub fn invalidate_all(&self) -> AppResult<InvalidationReport> {
        let mut report = InvalidationReport::default();

        for key in self.cache.keys(keys::DETAIL_PATTERN)? {
            if keys::is_detail_key(&key) && self.cache.delete(&key)? {
                report.detail_states_cleared += 1;
            }
        }

        for task_key in self.cache.keys(keys::DETAIL_TASK_PATTERN)? {
            if !keys::target_from_task_key(&task_key).is_some_and(keys::is_detail_key) {
                continue;
            }
            self.scheduler.revoke_queued_task(&task_key)?;
            self.cache.delete(&task_key)?;
        }

        let delay = self.settings.startup_rebuild_delay();
        for key in self.cache.keys(keys::OVERVIEW_PATTERN)? {
            let Some(owner) = keys::owner_from_overview_key(&key) else {
                continue;
            };
            self.schedule_snapshot_rebuild(owner, delay)?;
            report.rebuilds_scheduled += 1;
        }

        tracing::info!(
            detail_states_cleared = report.detail_states_cleared,
            rebuilds_scheduled = report.rebuilds_scheduled,
            "startup cache invalidation complete"
        );
        Ok(report)
    }

    fn read_document<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let Some(raw) = self.cache.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(document) => Ok(Some(document)),
            Err(error) => {
                tracing::warn!(key = %key, error = %error, "unreadable cached document treated as a miss");
                Ok(None)
            }
        }
    }

    fn write_document<T: Serialize>(&self, key: &str, document: &T) -> AppResult<()> {
        self.cache.set(key, &serde_json::to_string(document)?, None)
    }
}

#[cfg(test)]
mod tests {
    use super::StateCacheManager;
    use crate::cache::{CacheBackend, MemoryCache};
    use crate::db::Database;
    use crate::store::EntityStore;
    use crate::keys;
    use crate::models::{DetailState, Entity, Plant};
    use crate::queue::ManualQueue;
    use crate::scheduler::{RebuildScheduler, RebuildState};
    use crate::settings::CacheSettings;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    fn plant(uuid: &str, name: Option<&str>) -> Plant {
        Plant {
            uuid: uuid.to_string(),
            owner: "owner-1".to_string(),
            name: name.map(ToString::to_string),
            species: None,
            description: None,
            pot_size: None,
            created: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).single().expect("timestamp"),
            archived: false,
            group: None,
            default_photo: None,
        }
    }

    fn manager() -> (Arc<Database>, MemoryCache, ManualQueue, StateCacheManager) {
        let db = Arc::new(Database::open_in_memory().expect("db"));
        let cache = MemoryCache::new();
        let queue = ManualQueue::new();
        let scheduler = RebuildScheduler::new(Arc::new(cache.clone()), Arc::new(queue.clone()));
        let manager = StateCacheManager::new(
            Arc::new(cache.clone()),
            db.clone(),
            scheduler,
            CacheSettings::default(),
        );
        (db, cache, queue, manager)
    }

    #[test]
    fn get_snapshot_stores_built_document() {
        let (db, cache, _queue, manager) = manager();
        db.insert_plant(&plant("p1", Some("Rose"))).expect("plant");

        let snapshot = manager.get_snapshot("owner-1").expect("snapshot");
        assert!(snapshot.plants.contains_key("p1"));
        let raw = cache.get(&keys::overview_key("owner-1")).expect("get").expect("cached");
        assert_eq!(serde_json::from_str::<serde_json::Value>(&raw).expect("json")["plants"]["p1"]["name"], "Rose");
    }

    #[test]
    fn unreadable_document_is_rebuilt() {
        let (db, cache, _queue, manager) = manager();
        db.insert_plant(&plant("p1", None)).expect("plant");
        cache.set(&keys::detail_key("p1"), "{not json", None).expect("seed");

        let stored = db.get_plant("p1").expect("get").expect("exists");
        let state = manager.get_detail_state(&Entity::Plant(stored)).expect("state");
        assert!(matches!(state, DetailState::Plant(ref plant) if plant.plant.display_name == "Unnamed plant 1"));
        assert!(manager.cached_detail_state("p1").expect("cached").is_some());
    }

    #[test]
    fn invalidate_all_clears_details_and_schedules_overviews() {
        let (db, cache, queue, manager) = manager();
        db.insert_plant(&plant("p1", Some("Rose"))).expect("plant");
        let stored = Entity::Plant(db.get_plant("p1").expect("get").expect("exists"));

        manager.get_snapshot("owner-1").expect("snapshot");
        manager.get_detail_state(&stored).expect("detail");
        manager
            .schedule_detail_rebuild(&stored, Duration::from_secs(60))
            .expect("detail rebuild");
        cache.set("unrelated", "1", None).expect("seed");

        let report = manager.invalidate_all().expect("invalidate");
        assert_eq!(report.detail_states_cleared, 1);
        assert_eq!(report.rebuilds_scheduled, 1);
        assert!(manager.cached_detail_state("p1").expect("cached").is_none());
        assert!(cache
            .get(&keys::rebuild_task_key(&keys::detail_key("p1")))
            .expect("get")
            .is_none());
        assert_eq!(queue.revoked(), vec!["job-1".to_string()]);
        assert!(cache.get("unrelated").expect("get").is_some());

        assert!(manager.cached_snapshot("owner-1").expect("cached").is_some());
        assert!(matches!(
            manager.scheduler().rebuild_state(&keys::overview_key("owner-1")).expect("state"),
            RebuildState::Scheduled { .. }
        ));
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(
            manager.scheduler().rebuild_state(&keys::overview_key("owner-1")).expect("state"),
            RebuildState::Idle
        );
    }

    #[test]
    fn detail_rebuild_reloads_entity() {
        let (db, _cache, queue, manager) = manager();
        db.insert_plant(&plant("p1", Some("Rose"))).expect("plant");
        let stale = Entity::Plant(db.get_plant("p1").expect("get").expect("exists"));
        manager.get_detail_state(&stale).expect("detail");

        let mut renamed = plant("p1", Some("Climbing rose"));
        renamed.description = Some("south wall".to_string());
        db.update_plant(&renamed).expect("update");
        manager.schedule_detail_rebuild(&stale, Duration::ZERO).expect("schedule");
        queue.run_pending();

        let Some(DetailState::Plant(state)) = manager.cached_detail_state("p1").expect("cached") else {
            panic!("expected plant state");
        };
        assert_eq!(state.plant.display_name, "Climbing rose");
        assert_eq!(state.plant.description.as_deref(), Some("south wall"));
    }
}
