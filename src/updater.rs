use crate::builder::{self, Sibling};
use crate::errors::{AppError, AppResult};
use crate::models::{
    DetailPatch, DetailState, Entity, EntityPatch, Group, GroupPatch, GroupRef, GroupStatePatch,
    OverviewState, Plant, PlantDetails, PlantPatch,
};
use crate::state::StateCacheManager;
use crate::store::EntityStore;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NameSlot {
    Numbered(Option<String>),
    Unnumbered,
}

impl NameSlot {
    pub(crate) fn of<T: Sibling>(entity: &T) -> Self {
        if !entity.sibling_archived() && entity.is_unnamed() {
            Self::Numbered(entity.sibling_bucket().map(ToString::to_string))
        } else {
            Self::Unnumbered
        }
    }

    // Archived siblings count too: their names still show up in group references.
    fn covers(&self, sibling: &dyn Sibling) -> bool {
        match self {
            Self::Numbered(bucket) => sibling.is_unnamed() && bucket.as_deref() == sibling.sibling_bucket(),
            Self::Unnumbered => false,
        }
    }
}

pub struct IncrementalUpdater {
    state: Arc<StateCacheManager>,
}

impl IncrementalUpdater {
    pub fn new(state: Arc<StateCacheManager>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &StateCacheManager {
        &self.state
    }

    fn store(&self) -> &dyn EntityStore {
        self.state.store()
    }

    // One read-modify-write cycle on an owner's cached overview. Returns
    // `None` without calling `edit` when nothing is cached. The document is
    // only written back if `edit` changed it.
    pub fn modify_snapshot<R, F>(&self, owner: &str, edit: F) -> AppResult<Option<R>>
    where
        F: FnOnce(&mut OverviewState) -> AppResult<R>,
    {
        let Some(mut snapshot) = self.state.cached_snapshot(owner)? else {
            tracing::debug!(owner = %owner, "snapshot not cached; nothing to patch");
            return Ok(None);
        };
        let before = snapshot.clone();
        let result = edit(&mut snapshot)?;
        if snapshot != before {
            self.state.store_snapshot(owner, &snapshot)?;
        }
        Ok(Some(result))
    }

    pub fn modify_detail_state<R, F>(&self, uuid: &str, edit: F) -> AppResult<Option<R>>
    where
        F: FnOnce(&mut DetailState) -> AppResult<R>,
    {
        let Some(mut state) = self.state.cached_detail_state(uuid)? else {
            tracing::debug!(uuid = %uuid, "detail state not cached; nothing to patch");
            return Ok(None);
        };
        let before = state.clone();
        let result = edit(&mut state)?;
        if state != before {
            self.state.store_detail_state(uuid, &state)?;
        }
        Ok(Some(result))
    }

    pub fn upsert_entity_summary(&self, entity: &Entity) -> AppResult<()> {
        self.modify_snapshot(entity.owner(), |snapshot| self.upsert_in(snapshot, entity))?;
        Ok(())
    }

    pub fn remove_entity_summary(&self, entity: &Entity) -> AppResult<()> {
        self.modify_snapshot(entity.owner(), |snapshot| {
            remove_in(snapshot, entity);
            Ok(())
        })?;
        Ok(())
    }

    pub fn patch_entity_field(&self, entity: &Entity, patch: &EntityPatch) -> AppResult<()> {
        if patch.kind() != entity.kind() {
            return Err(AppError::InvalidPatch(format!(
                "{} patch cannot be applied to {} {}",
                patch.kind().as_str(),
                entity.kind().as_str(),
                entity.uuid()
            )));
        }
        self.modify_snapshot(entity.owner(), |snapshot| {
            match patch {
                EntityPatch::Plant(fields) => {
                    if let Some(details) = snapshot.plants.get_mut(entity.uuid()) {
                        fields.apply(details);
                    }
                }
                EntityPatch::Group(fields) => {
                    if let Some(details) = snapshot.groups.get_mut(entity.uuid()) {
                        fields.apply(details);
                    }
                }
            }
            Ok(())
        })?;
        Ok(())
    }

    pub fn patch_detail_state(&self, entity: &Entity, patch: &DetailPatch) -> AppResult<()> {
        self.modify_detail_state(entity.uuid(), |state| state.apply_patch(patch))?;
        Ok(())
    }

    pub fn update_membership_count(&self, group: &Group) -> AppResult<()> {
        self.modify_snapshot(&group.owner, |snapshot| self.recount_in(snapshot, &group.uuid))?;
        Ok(())
    }

    pub fn refresh_archive_flag(&self, owner: &str) -> AppResult<()> {
        self.modify_snapshot(owner, |snapshot| self.refresh_archive_in(snapshot, owner))?;
        Ok(())
    }

    pub(crate) fn upsert_in(&self, snapshot: &mut OverviewState, entity: &Entity) -> AppResult<()> {
        if entity.is_archived() {
            remove_in(snapshot, entity);
            return Ok(());
        }
        match entity {
            Entity::Plant(plant) => {
                let details = builder::plant_details(self.store(), plant)?;
                snapshot.plants.insert(plant.uuid.clone(), details);
            }
            Entity::Group(group) => {
                let details = builder::group_details(self.store(), group)?;
                snapshot.groups.insert(group.uuid.clone(), details);
            }
        }
        Ok(())
    }

    pub(crate) fn recount_in(&self, snapshot: &mut OverviewState, group_uuid: &str) -> AppResult<()> {
        let Some(details) = snapshot.groups.get_mut(group_uuid) else {
            return Ok(());
        };
        let Some(group) = self.store().get_group(group_uuid)? else {
            return Ok(());
        };
        let count = builder::member_count(self.store(), &group)?;
        GroupPatch { plants: Some(count) }.apply(details);
        Ok(())
    }

    pub(crate) fn refresh_archive_in(&self, snapshot: &mut OverviewState, owner: &str) -> AppResult<()> {
        snapshot.show_archive = self.store().has_archived(owner)?;
        Ok(())
    }

    pub(crate) fn refresh_group_refs_in(&self, snapshot: &mut OverviewState, group_uuid: &str) -> AppResult<()> {
        let points_here =
            |details: &PlantDetails| details.group.as_ref().is_some_and(|group| group.uuid == group_uuid);
        if !snapshot.plants.values().any(|details| points_here(details)) {
            return Ok(());
        }
        let group_ref = match self.store().get_group(group_uuid)? {
            Some(group) => Some(self.group_ref(&group)?),
            None => None,
        };
        for details in snapshot.plants.values_mut() {
            if points_here(details) {
                details.group = group_ref.clone();
            }
        }
        Ok(())
    }

    pub(crate) fn group_ref(&self, group: &Group) -> AppResult<GroupRef> {
        let siblings = self.store().groups_for_owner(&group.owner)?;
        Ok(GroupRef {
            uuid: group.uuid.clone(),
            name: builder::group_display_name(group, &siblings),
        })
    }

    // Stored siblings whose unnamed index moves because `entity` went from
    // `previous` to `current`. An unknown `previous` could have been any
    // bucket, so every later unnamed sibling counts.
    pub(crate) fn shifted_siblings(
        &self,
        entity: &Entity,
        previous: Option<&NameSlot>,
        current: &NameSlot,
    ) -> AppResult<Vec<Entity>> {
        if previous == Some(current) {
            return Ok(Vec::new());
        }

        let shifted = match entity {
            Entity::Plant(plant) => self
                .store()
                .plants_for_owner(&plant.owner)?
                .into_iter()
                .filter(|sibling| sibling.uuid != plant.uuid && plant.precedes(sibling))
                .filter(|sibling| shifts(previous, current, sibling))
                .map(Entity::Plant)
                .collect(),
            Entity::Group(group) => self
                .store()
                .groups_for_owner(&group.owner)?
                .into_iter()
                .filter(|sibling| sibling.uuid != group.uuid && group.precedes(sibling))
                .filter(|sibling| shifts(previous, current, sibling))
                .map(Entity::Group)
                .collect(),
        };
        Ok(shifted)
    }

    pub(crate) fn apply_name_shift(&self, entity: &Entity, shifted: &[Entity], snapshot_cached: bool) -> AppResult<()> {
        if shifted.is_empty() {
            return Ok(());
        }
        if snapshot_cached {
            self.state
                .schedule_snapshot_rebuild(entity.owner(), self.state.settings().rebuild_delay())?;
        }
        for sibling in shifted {
            self.state.delete_detail_state(sibling.uuid())?;
            match sibling {
                Entity::Plant(plant) => {
                    if let Some(group) = &plant.group {
                        self.state.delete_detail_state(group)?;
                    }
                }
                Entity::Group(group) => {
                    for member in self.store().plants_in_group(&group.uuid)? {
                        self.state.delete_detail_state(&member.uuid)?;
                    }
                }
            }
        }
        tracing::info!(
            owner = %entity.owner(),
            uuid = %entity.uuid(),
            shifted = shifted.len(),
            "unnamed index shift; overview rebuild required"
        );
        Ok(())
    }

    pub(crate) fn sync_group_member(&self, group_uuid: &str, plant: &Plant) -> AppResult<()> {
        self.edit_group_members(group_uuid, &plant.uuid, Some(plant))
    }

    pub(crate) fn remove_group_member(&self, group_uuid: &str, plant_uuid: &str) -> AppResult<()> {
        self.edit_group_members(group_uuid, plant_uuid, None)
    }

    fn edit_group_members(&self, group_uuid: &str, plant_uuid: &str, plant: Option<&Plant>) -> AppResult<()> {
        self.modify_detail_state(group_uuid, |state| {
            let DetailState::Group(group_state) = state else {
                return Ok(());
            };
            let Some(group) = self.store().get_group(group_uuid)? else {
                return Ok(());
            };
            let active = plant.filter(|plant| {
                !plant.archived && plant.owner == group.owner && plant.group.as_deref() == Some(group_uuid)
            });
            let mut patch = GroupStatePatch::default();
            match active {
                Some(plant) => patch.upsert_plants.push(builder::plant_details(self.store(), plant)?),
                None => patch.remove_plants.push(plant_uuid.to_string()),
            }
            patch.apply(group_state);
            let count = builder::member_count(self.store(), &group)?;
            GroupPatch { plants: Some(count) }.apply(&mut group_state.group);
            Ok(())
        })?;
        Ok(())
    }

    pub(crate) fn patch_group_entry(&self, group_uuid: &str, plant_uuid: &str, fields: &PlantPatch) -> AppResult<()> {
        self.modify_detail_state(group_uuid, |state| {
            if let DetailState::Group(group_state) = state {
                if let Some(entry) = group_state.plants.get_mut(plant_uuid) {
                    fields.apply(entry);
                }
            }
            Ok(())
        })?;
        Ok(())
    }

    pub(crate) fn refresh_group_state(&self, group_uuid: &str) -> AppResult<()> {
        self.modify_detail_state(group_uuid, |state| {
            let Some(group) = self.store().get_group(group_uuid)? else {
                return Ok(());
            };
            let fresh = builder::group_state(self.store(), &group)?;
            state.apply_patch(&DetailPatch::Group(GroupStatePatch {
                group: Some(fresh.group),
                plants: Some(fresh.plants),
                ..Default::default()
            }))
        })?;
        Ok(())
    }
}

fn shifts(previous: Option<&NameSlot>, current: &NameSlot, sibling: &dyn Sibling) -> bool {
    match previous {
        Some(previous) => previous.covers(sibling) || current.covers(sibling),
        None => sibling.is_unnamed(),
    }
}

pub(crate) fn remove_in(snapshot: &mut OverviewState, entity: &Entity) -> bool {
    let removed = match entity {
        Entity::Plant(plant) => snapshot.plants.remove(&plant.uuid).is_some(),
        Entity::Group(group) => snapshot.groups.remove(&group.uuid).is_some(),
    };
    if !removed {
        tracing::debug!(uuid = %entity.uuid(), "summary already absent");
    }
    removed
}
