use crate::builder;
use crate::errors::{AppError, AppResult};
use crate::models::{
    DetailPatch, DetailState, Entity, EntityPatch, Event, EventKind, EventTimeline, Group,
    GroupRef, Plant, PlantDetails, PlantPatch, PlantStatePatch,
};
use crate::state::StateCacheManager;
use crate::store::EntityStore;
use crate::updater::{remove_in, IncrementalUpdater, NameSlot};
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct StateHooks {
    updater: Arc<IncrementalUpdater>,
}

impl StateHooks {
    pub fn new(updater: Arc<IncrementalUpdater>) -> Self {
        Self { updater }
    }

    pub fn updater(&self) -> &IncrementalUpdater {
        &self.updater
    }

    fn state(&self) -> &StateCacheManager {
        self.updater.state()
    }

    fn store(&self) -> &dyn EntityStore {
        self.state().store()
    }

    pub fn on_entity_saved(&self, entity: &Entity) -> AppResult<()> {
        tracing::debug!(kind = entity.kind().as_str(), uuid = %entity.uuid(), "entity saved");
        match entity {
            Entity::Plant(plant) => self.plant_saved(plant),
            Entity::Group(group) => self.group_saved(group),
        }
    }

    pub fn on_entity_deleted(&self, entity: &Entity) -> AppResult<()> {
        tracing::debug!(kind = entity.kind().as_str(), uuid = %entity.uuid(), "entity deleted");
        match entity {
            Entity::Plant(plant) => self.plant_deleted(plant),
            Entity::Group(group) => self.group_deleted(group),
        }
    }

    pub fn on_event_created(&self, plant: &Plant, event: &Event) -> AppResult<()> {
        self.event_changed(plant, event)
    }

    pub fn on_event_deleted(&self, plant: &Plant, event: &Event) -> AppResult<()> {
        self.event_changed(plant, event)
    }

    pub fn on_membership_changed(&self, group: &Group) -> AppResult<()> {
        tracing::debug!(uuid = %group.uuid, "group membership changed");
        let mut affected = self
            .store()
            .plants_in_group(&group.uuid)?
            .into_iter()
            .filter(|plant| plant.owner == group.owner)
            .map(|plant| plant.uuid)
            .collect::<BTreeSet<_>>();
        if let Some(DetailState::Group(state)) = self.state().cached_detail_state(&group.uuid)? {
            affected.extend(state.plants.into_keys());
        }
        let mut groups = BTreeSet::from([group.uuid.clone()]);

        let snapshot_changes = self.updater.modify_snapshot(&group.owner, |snapshot| {
            let mut candidates = affected.clone();
            candidates.extend(
                snapshot
                    .plants
                    .iter()
                    .filter(|(_, details)| references(details, &group.uuid))
                    .map(|(uuid, _)| uuid.clone()),
            );

            let mut touched = BTreeSet::from([group.uuid.clone()]);
            for uuid in &candidates {
                if !snapshot.plants.contains_key(uuid) {
                    continue;
                }
                let Some(plant) = self.store().get_plant(uuid)? else {
                    continue;
                };
                let group_ref = builder::group_ref_for(self.store(), &plant)?;
                if let Some(entry) = snapshot.plants.get_mut(uuid) {
                    touched.extend(entry.group.as_ref().map(|current| current.uuid.clone()));
                    touched.extend(group_ref.as_ref().map(|next| next.uuid.clone()));
                    entry.group = group_ref;
                }
            }
            for uuid in &touched {
                self.updater.recount_in(snapshot, uuid)?;
            }
            Ok((candidates, touched))
        })?;
        if let Some((candidates, touched)) = snapshot_changes {
            affected.extend(candidates);
            groups.extend(touched);
        }

        for uuid in &affected {
            let Some(plant) = self.store().get_plant(uuid)? else {
                continue;
            };
            let group_ref = builder::group_ref_for(self.store(), &plant)?;
            let previous = self.updater.modify_detail_state(uuid, |state| {
                let previous = match state {
                    DetailState::Plant(current) => current.plant.group.as_ref().map(|group| group.uuid.clone()),
                    DetailState::Group(_) => None,
                };
                state.apply_patch(&group_ref_patch(group_ref))?;
                Ok(previous)
            })?;
            groups.extend(previous.flatten());
            groups.extend(plant.group.clone());
        }

        self.repoint_cached_refs(&group.owner, &group.uuid, &affected)?;

        for uuid in &groups {
            self.updater.refresh_group_state(uuid)?;
        }
        Ok(())
    }

    pub fn on_photos_changed(&self, plant: &Plant) -> AppResult<()> {
        let current = self
            .store()
            .get_plant(&plant.uuid)?
            .ok_or_else(|| AppError::NotFound(format!("plant {}", plant.uuid)))?;
        let photos = self.store().photos_for_plant(&current.uuid)?;
        let fields = PlantPatch {
            thumbnail: Some(builder::thumbnail_for(&current, &photos)),
            ..PlantPatch::default()
        };

        let entity = Entity::Plant(current.clone());
        self.updater
            .patch_entity_field(&entity, &EntityPatch::Plant(fields.clone()))?;
        if let Some(group_uuid) = &current.group {
            self.updater.patch_group_entry(group_uuid, &current.uuid, &fields)?;
        }

        let (photos, default_photo) = builder::photo_details(&current, photos);
        self.updater.patch_detail_state(
            &entity,
            &DetailPatch::Plant(PlantStatePatch {
                plant_fields: Some(fields),
                photos: Some(photos),
                default_photo: Some(default_photo),
                ..PlantStatePatch::default()
            }),
        )
    }

    fn plant_saved(&self, plant: &Plant) -> AppResult<()> {
        let entity = Entity::Plant(plant.clone());
        let cached_details = match self.state().cached_detail_state(&plant.uuid)? {
            Some(DetailState::Plant(state)) => Some(state.plant),
            _ => None,
        };

        let before = self.updater.modify_snapshot(&plant.owner, |snapshot| {
            let before = snapshot.plants.get(&plant.uuid).cloned();
            self.updater.upsert_in(snapshot, &entity)?;
            let previous_group = before.as_ref().and_then(group_of);
            for group_uuid in previous_group.iter().chain(plant.group.iter()) {
                self.updater.recount_in(snapshot, group_uuid)?;
            }
            self.updater.refresh_archive_in(snapshot, &plant.owner)?;
            Ok(before)
        })?;

        let previous_slot = match (&before, &cached_details) {
            (Some(entry), _) => Some(entry.as_ref().map_or(NameSlot::Unnumbered, NameSlot::of)),
            (None, Some(details)) => Some(NameSlot::of(details)),
            (None, None) => self.slot_in_group_state(plant)?,
        };
        let shifted = self
            .updater
            .shifted_siblings(&entity, previous_slot.as_ref(), &NameSlot::of(plant))?;
        self.updater.apply_name_shift(&entity, &shifted, before.is_some())?;
        let previous_group_known = before.is_some() || cached_details.is_some();

        self.updater.modify_detail_state(&plant.uuid, |state| {
            let details = builder::plant_details(self.store(), plant)?;
            let (photos, default_photo) =
                builder::photo_details(plant, self.store().photos_for_plant(&plant.uuid)?);
            state.apply_patch(&DetailPatch::Plant(PlantStatePatch {
                plant: Some(details),
                photos: Some(photos),
                default_photo: Some(default_photo),
                ..PlantStatePatch::default()
            }))
        })?;

        let previous_group = before
            .flatten()
            .as_ref()
            .and_then(group_of)
            .or_else(|| cached_details.as_ref().and_then(group_of));
        if let Some(group_uuid) = &plant.group {
            self.updater.sync_group_member(group_uuid, plant)?;
        }
        match previous_group {
            Some(old) if plant.group.as_ref() != Some(&old) => {
                self.updater.remove_group_member(&old, &plant.uuid)?;
            }
            Some(_) => {}
            None if !previous_group_known => {
                for other in self.store().groups_for_owner(&plant.owner)? {
                    if plant.group.as_ref() != Some(&other.uuid) {
                        self.updater.remove_group_member(&other.uuid, &plant.uuid)?;
                    }
                }
            }
            None => {}
        }
        Ok(())
    }

    // The plant's entry in its group's cached document, when nothing else remembers its old name.
    fn slot_in_group_state(&self, plant: &Plant) -> AppResult<Option<NameSlot>> {
        let Some(group_uuid) = &plant.group else {
            return Ok(None);
        };
        Ok(match self.state().cached_detail_state(group_uuid)? {
            Some(DetailState::Group(state)) => state.plants.get(&plant.uuid).map(NameSlot::of),
            _ => None,
        })
    }

    fn group_saved(&self, group: &Group) -> AppResult<()> {
        let entity = Entity::Group(group.clone());
        let cached_details = match self.state().cached_detail_state(&group.uuid)? {
            Some(DetailState::Group(state)) => Some(state.group),
            _ => None,
        };

        let before = self.updater.modify_snapshot(&group.owner, |snapshot| {
            let before = snapshot.groups.get(&group.uuid).cloned();
            self.updater.upsert_in(snapshot, &entity)?;
            self.updater.refresh_group_refs_in(snapshot, &group.uuid)?;
            self.updater.refresh_archive_in(snapshot, &group.owner)?;
            Ok(before)
        })?;

        let previous_slot = match &before {
            Some(entry) => Some(entry.as_ref().map_or(NameSlot::Unnumbered, NameSlot::of)),
            None => cached_details.as_ref().map(NameSlot::of),
        };
        let shifted = self
            .updater
            .shifted_siblings(&entity, previous_slot.as_ref(), &NameSlot::of(group))?;
        self.updater.apply_name_shift(&entity, &shifted, before.is_some())?;

        self.updater.refresh_group_state(&group.uuid)?;
        let patch = group_ref_patch(Some(self.updater.group_ref(group)?));
        for member in self.store().plants_in_group(&group.uuid)? {
            if member.owner == group.owner {
                self.updater.patch_detail_state(&Entity::Plant(member), &patch)?;
            }
        }
        Ok(())
    }

    fn plant_deleted(&self, plant: &Plant) -> AppResult<()> {
        let entity = Entity::Plant(plant.clone());
        let cached = self.updater.modify_snapshot(&plant.owner, |snapshot| {
            remove_in(snapshot, &entity);
            if let Some(group_uuid) = &plant.group {
                self.updater.recount_in(snapshot, group_uuid)?;
            }
            self.updater.refresh_archive_in(snapshot, &plant.owner)
        })?;

        let shifted = self
            .updater
            .shifted_siblings(&entity, Some(&NameSlot::of(plant)), &NameSlot::Unnumbered)?;
        self.updater.apply_name_shift(&entity, &shifted, cached.is_some())?;

        self.state().delete_detail_state(&plant.uuid)?;
        if let Some(group_uuid) = &plant.group {
            self.updater.remove_group_member(group_uuid, &plant.uuid)?;
        }
        Ok(())
    }

    fn group_deleted(&self, group: &Group) -> AppResult<()> {
        let entity = Entity::Group(group.clone());
        let snapshot_cached = self
            .updater
            .modify_snapshot(&group.owner, |snapshot| {
                remove_in(snapshot, &entity);
                self.updater.refresh_group_refs_in(snapshot, &group.uuid)?;
                self.updater.refresh_archive_in(snapshot, &group.owner)
            })?
            .is_some();

        let shifted = self
            .updater
            .shifted_siblings(&entity, Some(&NameSlot::of(group)), &NameSlot::Unnumbered)?;
        self.updater.apply_name_shift(&entity, &shifted, snapshot_cached)?;

        self.state().delete_detail_state(&group.uuid)?;
        self.repoint_cached_refs(&group.owner, &group.uuid, &BTreeSet::new())
    }

    // Cached plant documents outside `visited` that still reference `group_uuid`.
    fn repoint_cached_refs(&self, owner: &str, group_uuid: &str, visited: &BTreeSet<String>) -> AppResult<()> {
        for plant in self.store().plants_for_owner(owner)? {
            if visited.contains(&plant.uuid) {
                continue;
            }
            self.updater.modify_detail_state(&plant.uuid, |state| {
                let stale = matches!(state, DetailState::Plant(current) if references(&current.plant, group_uuid));
                if !stale {
                    return Ok(());
                }
                state.apply_patch(&group_ref_patch(builder::group_ref_for(self.store(), &plant)?))
            })?;
        }
        Ok(())
    }

    fn event_changed(&self, plant: &Plant, event: &Event) -> AppResult<()> {
        if event.plant != plant.uuid {
            return Err(AppError::InvalidPatch(format!(
                "event {} belongs to plant {}, not {}",
                event.id, event.plant, plant.uuid
            )));
        }
        tracing::debug!(plant = %plant.uuid, kind = event.kind.as_str(), "plant events changed");

        let fields = if event.kind.is_summarized() {
            Some(self.summary_fields(plant, event.kind)?)
        } else {
            None
        };
        let entity = Entity::Plant(plant.clone());
        if let Some(fields) = &fields {
            self.updater
                .patch_entity_field(&entity, &EntityPatch::Plant(fields.clone()))?;
            if let Some(group_uuid) = &plant.group {
                self.updater.patch_group_entry(group_uuid, &plant.uuid, fields)?;
            }
        }

        self.updater.modify_detail_state(&plant.uuid, |state| {
            let events = EventTimeline::from_events(&self.store().events_for_plant(&plant.uuid)?);
            state.apply_patch(&DetailPatch::Plant(PlantStatePatch {
                plant_fields: fields,
                events: Some(events),
                ..PlantStatePatch::default()
            }))
        })?;
        Ok(())
    }

    // Summary fields fed by `kind`, re-read from the store so that deleting
    // the newest event falls back to the one before it.
    fn summary_fields(&self, plant: &Plant, kind: EventKind) -> AppResult<PlantPatch> {
        let latest = self.store().latest_event(&plant.uuid, kind)?;
        Ok(match kind {
            EventKind::Water => PlantPatch {
                last_watered: Some(latest),
                ..PlantPatch::default()
            },
            EventKind::Fertilize => PlantPatch {
                last_fertilized: Some(latest),
                ..PlantPatch::default()
            },
            EventKind::Prune | EventKind::Repot => PlantPatch::default(),
        })
    }
}

fn references(details: &PlantDetails, group_uuid: &str) -> bool {
    details.group.as_ref().is_some_and(|group| group.uuid == group_uuid)
}

fn group_of(details: &PlantDetails) -> Option<String> {
    details.group.as_ref().map(|group| group.uuid.clone())
}

fn group_ref_patch(group: Option<GroupRef>) -> DetailPatch {
    DetailPatch::Plant(PlantStatePatch {
        plant_fields: Some(PlantPatch {
            group: Some(group),
            ..PlantPatch::default()
        }),
        ..PlantStatePatch::default()
    })
}
