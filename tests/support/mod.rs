#![allow(dead_code)]

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use plant_state_cache::models::{Event, EventKind, Group, Photo, Plant};
use plant_state_cache::{
    AppError, AppResult, CacheBackend, CacheSettings, Database, EntityStore, ManualQueue,
    MemoryCache, StateService,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const OWNER: &str = "owner-1";

pub fn ts(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 1, 6, 0, 0).single().expect("timestamp") + ChronoDuration::minutes(minute)
}

pub fn plant(uuid: &str, minute: i64, name: Option<&str>) -> Plant {
    Plant {
        uuid: uuid.to_string(),
        owner: OWNER.to_string(),
        name: name.map(ToString::to_string),
        species: None,
        description: None,
        pot_size: None,
        created: ts(minute),
        archived: false,
        group: None,
        default_photo: None,
    }
}

pub fn group(uuid: &str, minute: i64, name: Option<&str>) -> Group {
    Group {
        uuid: uuid.to_string(),
        owner: OWNER.to_string(),
        name: name.map(ToString::to_string),
        location: None,
        description: None,
        created: ts(minute),
        archived: false,
    }
}

pub struct Fixture {
    pub db: Arc<Database>,
    pub cache: MemoryCache,
    pub queue: ManualQueue,
    pub service: StateService,
}

pub fn fixture() -> Fixture {
    let db = Arc::new(Database::open_in_memory().expect("db"));
    fixture_with_store(db.clone(), db)
}

pub fn fixture_with_store(db: Arc<Database>, store: Arc<dyn EntityStore>) -> Fixture {
    let cache = MemoryCache::new();
    let queue = ManualQueue::new();
    let service = StateService::new(
        CacheSettings::default(),
        store,
        Arc::new(cache.clone()),
        Arc::new(queue.clone()),
    )
    .expect("service");
    Fixture {
        db,
        cache,
        queue,
        service,
    }
}

/// Store wrapper counting full overview scans.
pub struct CountingStore {
    inner: Arc<Database>,
    pub owner_scans: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: Arc<Database>) -> Self {
        Self {
            inner,
            owner_scans: AtomicUsize::new(0),
        }
    }

    pub fn scans(&self) -> usize {
        self.owner_scans.load(Ordering::SeqCst)
    }
}

impl EntityStore for CountingStore {
    fn plants_for_owner(&self, owner: &str) -> AppResult<Vec<Plant>> {
        self.owner_scans.fetch_add(1, Ordering::SeqCst);
        self.inner.plants_for_owner(owner)
    }

    fn groups_for_owner(&self, owner: &str) -> AppResult<Vec<Group>> {
        self.inner.groups_for_owner(owner)
    }

    fn get_plant(&self, uuid: &str) -> AppResult<Option<Plant>> {
        self.inner.get_plant(uuid)
    }

    fn get_group(&self, uuid: &str) -> AppResult<Option<Group>> {
        self.inner.get_group(uuid)
    }

    fn plants_in_group(&self, group: &str) -> AppResult<Vec<Plant>> {
        self.inner.plants_in_group(group)
    }

    fn events_for_plant(&self, plant: &str) -> AppResult<Vec<Event>> {
        self.inner.events_for_plant(plant)
    }

    fn latest_event(&self, plant: &str, kind: EventKind) -> AppResult<Option<DateTime<Utc>>> {
        self.inner.latest_event(plant, kind)
    }

    fn photos_for_plant(&self, plant: &str) -> AppResult<Vec<Photo>> {
        self.inner.photos_for_plant(plant)
    }

    fn has_archived(&self, owner: &str) -> AppResult<bool> {
        self.inner.has_archived(owner)
    }
}

/// Cache backend whose server is never reachable.
pub struct UnreachableCache;

impl CacheBackend for UnreachableCache {
    fn get(&self, _key: &str) -> AppResult<Option<String>> {
        Err(AppError::Cache("connection refused".to_string()))
    }

    fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> AppResult<()> {
        Err(AppError::Cache("connection refused".to_string()))
    }

    fn delete(&self, _key: &str) -> AppResult<bool> {
        Err(AppError::Cache("connection refused".to_string()))
    }

    fn keys(&self, _pattern: &str) -> AppResult<Vec<String>> {
        Err(AppError::Cache("connection refused".to_string()))
    }
}
