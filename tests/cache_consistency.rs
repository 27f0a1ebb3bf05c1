mod support;

use plant_state_cache::builder::build_snapshot;
use plant_state_cache::keys;
use plant_state_cache::models::{DetailState, Entity, EntityPatch, EventKind, PlantPatch};
use plant_state_cache::{
    AppError, CacheBackend, CacheSettings, Database, EntityStore, ManualQueue, RebuildState, SqliteCache,
    StateService, TaskQueue,
};
use std::sync::Arc;
use std::time::Duration;
use support::{fixture, fixture_with_store, group, plant, ts, CountingStore, UnreachableCache, OWNER};

#[test]
fn second_read_is_served_from_cache() {
    let db = Arc::new(Database::open_in_memory().expect("db"));
    db.insert_plant(&plant("p1", 1, Some("Rose"))).expect("plant");
    let store = Arc::new(CountingStore::new(db.clone()));
    let fx = fixture_with_store(db, store.clone());

    let first = fx.service.get_snapshot(OWNER).expect("first read");
    let scans = store.scans();
    assert!(scans > 0);
    let second = fx.service.get_snapshot(OWNER).expect("second read");
    assert_eq!(store.scans(), scans);
    assert_eq!(
        serde_json::to_string(&first).expect("encode"),
        serde_json::to_string(&second).expect("encode")
    );
}

#[test]
fn deleted_snapshot_is_reconstructed() {
    let fx = fixture();
    fx.db.insert_group(&group("g1", 0, None)).expect("group");
    let mut fern = plant("p1", 1, None);
    fern.group = Some("g1".to_string());
    fx.db.insert_plant(&fern).expect("plant");
    fx.db.add_event("p1", EventKind::Fertilize, ts(9)).expect("event");

    let original = fx.service.get_snapshot(OWNER).expect("snapshot");
    assert!(fx.service.state().delete_snapshot(OWNER).expect("delete"));
    let rebuilt = fx.service.get_snapshot(OWNER).expect("rebuilt");
    assert_eq!(rebuilt, original);
}

#[test]
fn watering_rose_only_changes_rose() {
    let fx = fixture();
    let rose = plant("rose", 1, Some("Rose"));
    fx.db.insert_plant(&rose).expect("plant");
    fx.db.insert_plant(&plant("unnamed", 2, None)).expect("plant");
    let before = fx.service.get_snapshot(OWNER).expect("snapshot");
    let untouched = serde_json::to_string(&before.plants["unnamed"]).expect("encode");
    assert_eq!(before.plants["unnamed"].display_name, "Unnamed plant 1");

    fx.service
        .updater()
        .patch_entity_field(
            &Entity::Plant(rose),
            &EntityPatch::Plant(PlantPatch {
                last_watered: Some(Some(ts(45))),
                ..PlantPatch::default()
            }),
        )
        .expect("patch");

    let after = fx.service.state().cached_snapshot(OWNER).expect("read").expect("cached");
    assert_eq!(after.plants["rose"].last_watered, Some(ts(45)));
    assert_eq!(serde_json::to_string(&after.plants["unnamed"]).expect("encode"), untouched);
}

#[test]
fn removing_twice_is_harmless() {
    let fx = fixture();
    let p1 = plant("p1", 1, Some("Aloe"));
    fx.db.insert_plant(&p1).expect("plant");
    let snapshot = fx.service.get_snapshot(OWNER).expect("snapshot");
    assert_eq!(snapshot.plants.len(), 1);
    assert!(snapshot.groups.is_empty());

    let entity = Entity::Plant(p1);
    fx.service.updater().remove_entity_summary(&entity).expect("remove");
    fx.service.updater().remove_entity_summary(&entity).expect("remove again");
    let cached = fx.service.state().cached_snapshot(OWNER).expect("read").expect("cached");
    assert!(cached.plants.is_empty());
}

#[test]
fn archiving_and_unarchiving_through_hooks() {
    let fx = fixture();
    let mut aloe = plant("p1", 1, Some("Aloe"));
    fx.db.insert_plant(&aloe).expect("plant");
    fx.service.get_snapshot(OWNER).expect("snapshot");

    aloe.archived = true;
    fx.db.update_plant(&aloe).expect("archive");
    fx.service.hooks().on_entity_saved(&Entity::Plant(aloe.clone())).expect("hook");
    let archived = fx.service.state().cached_snapshot(OWNER).expect("read").expect("cached");
    assert!(!archived.plants.contains_key("p1"));
    assert!(archived.show_archive);

    aloe.archived = false;
    aloe.pot_size = Some(12);
    fx.db.update_plant(&aloe).expect("unarchive");
    fx.service.hooks().on_entity_saved(&Entity::Plant(aloe)).expect("hook");
    let restored = fx.service.state().cached_snapshot(OWNER).expect("read").expect("cached");
    assert_eq!(restored.plants["p1"].pot_size, Some(12));
    assert!(!restored.show_archive);
    assert_eq!(restored, build_snapshot(fx.db.as_ref(), OWNER).expect("build"));
}

#[test]
fn burst_of_shifts_runs_one_rebuild() {
    let fx = fixture();
    for index in 0..4 {
        fx.db
            .insert_plant(&plant(&format!("p{index}"), index, None))
            .expect("plant");
    }
    fx.service.get_snapshot(OWNER).expect("snapshot");

    for index in 0..3 {
        let mut named = fx.db.get_plant(&format!("p{index}")).expect("get").expect("exists");
        named.name = Some(format!("Plant {index}"));
        fx.db.update_plant(&named).expect("rename");
        fx.service.hooks().on_entity_saved(&Entity::Plant(named)).expect("hook");
    }

    assert_eq!(fx.queue.pending().len(), 1);
    assert_eq!(fx.queue.revoked().len(), 2);
    assert_eq!(fx.queue.run_pending(), 1);
    assert_eq!(fx.queue.executed().len(), 1);

    let snapshot = fx.service.state().cached_snapshot(OWNER).expect("read").expect("cached");
    assert_eq!(snapshot.plants["p3"].display_name, "Unnamed plant 1");
    assert_eq!(snapshot, build_snapshot(fx.db.as_ref(), OWNER).expect("build"));
    assert_eq!(
        fx.service
            .state()
            .scheduler()
            .rebuild_state(&keys::overview_key(OWNER))
            .expect("state"),
        RebuildState::Idle
    );
}

#[test]
fn unreachable_cache_is_reported() {
    let db = Arc::new(Database::open_in_memory().expect("db"));
    let rose = plant("p1", 1, Some("Rose"));
    db.insert_plant(&rose).expect("plant");
    let service = StateService::new(
        CacheSettings::default(),
        db,
        Arc::new(UnreachableCache),
        Arc::new(ManualQueue::new()),
    )
    .expect("service");

    let err = service.get_snapshot(OWNER).expect_err("cache down");
    assert!(matches!(err, AppError::Cache(_)));
    let err = service
        .hooks()
        .on_entity_saved(&Entity::Plant(rose))
        .expect_err("cache down");
    assert!(err.to_string().starts_with("CACHE_UNAVAILABLE"));
    assert!(service.invalidate_all().is_err());
}

#[test]
fn startup_invalidation_after_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = CacheSettings {
        cache_path: Some(dir.path().join("cache.db")),
        ..CacheSettings::default()
    };
    let db = Arc::new(Database::new(&dir.path().join("plants.db")).expect("db"));
    let mut rose = plant("p1", 1, Some("Rose"));
    db.insert_plant(&rose).expect("plant");

    {
        let cache = Arc::new(SqliteCache::new(settings.cache_path.as_deref().expect("path")).expect("cache"));
        let service = StateService::new(settings.clone(), db.clone(), cache, Arc::new(ManualQueue::new()))
            .expect("service");
        service.get_snapshot(OWNER).expect("snapshot");
        service.get_detail_state(&Entity::Plant(rose.clone())).expect("detail");
    }

    rose.name = Some("Tea rose".to_string());
    db.update_plant(&rose).expect("offline edit");

    let cache = Arc::new(SqliteCache::new(settings.cache_path.as_deref().expect("path")).expect("cache"));
    let queue = ManualQueue::new();
    let service = StateService::new(settings, db.clone(), cache.clone(), Arc::new(queue.clone()))
        .expect("service");
    let report = service.invalidate_all().expect("invalidate");
    assert_eq!(report.detail_states_cleared, 1);
    assert_eq!(report.rebuilds_scheduled, 1);

    let stale = service.state().cached_snapshot(OWNER).expect("read").expect("still served");
    assert_eq!(stale.plants["p1"].display_name, "Rose");
    assert_eq!(queue.run_pending(), 1);
    assert_eq!(service.get_snapshot(OWNER).expect("snapshot").plants["p1"].display_name, "Tea rose");

    let DetailState::Plant(detail) = service.get_detail_state(&Entity::Plant(rose)).expect("detail") else {
        panic!("expected plant state");
    };
    assert_eq!(detail.plant.display_name, "Tea rose");
    assert!(cache.keys(&keys::rebuild_task_key("*")).expect("keys").is_empty());
}

#[test]
fn failed_rebuild_is_replaced_not_stacked() {
    let fx = fixture();
    let scheduler = fx.service.state().scheduler();
    let target = keys::overview_key(OWNER);

    scheduler
        .schedule_rebuild::<u32, _>(
            &target,
            || Err(AppError::Store("disk I/O error".to_string())),
            Duration::ZERO,
        )
        .expect("schedule");
    fx.queue.run_pending();
    assert_eq!(fx.queue.failed().len(), 1);
    assert!(matches!(
        scheduler.rebuild_state(&target).expect("state"),
        RebuildState::Failed { .. }
    ));

    fx.service
        .state()
        .schedule_snapshot_rebuild(OWNER, Duration::from_secs(5))
        .expect("reschedule");
    assert_eq!(fx.queue.pending().len(), 1);
    fx.queue.run_pending();
    assert_eq!(scheduler.rebuild_state(&target).expect("state"), RebuildState::Idle);
    assert!(fx.service.state().cached_snapshot(OWNER).expect("read").is_some());
}

#[test]
fn revoking_a_finished_job_is_not_an_error() {
    let fx = fixture();
    let job_id = fx
        .service
        .state()
        .schedule_snapshot_rebuild(OWNER, Duration::ZERO)
        .expect("schedule");
    fx.queue.run_pending();
    assert!(!fx.queue.revoke(&job_id).expect("revoke"));
    assert!(!fx
        .service
        .state()
        .scheduler()
        .revoke_queued_task(&keys::rebuild_task_key(&keys::overview_key(OWNER)))
        .expect("revoke"));
}
