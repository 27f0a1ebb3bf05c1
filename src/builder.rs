use crate::errors::{AppError, AppResult};
use crate::models::{
    DetailState, Entity, EventKind, EventTimeline, Group, GroupDetails, GroupRef, GroupState,
    OverviewState, PhotoDetails, Photo, Plant, PlantDetails, PlantState,
};
use crate::store::EntityStore;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

pub(crate) trait Sibling {
    fn sibling_uuid(&self) -> &str;
    fn sibling_created(&self) -> DateTime<Utc>;
    fn sibling_name(&self) -> Option<&str>;
    fn sibling_archived(&self) -> bool;
    fn sibling_bucket(&self) -> Option<&str>;

    fn is_unnamed(&self) -> bool {
        self.sibling_name().map_or(true, |name| name.trim().is_empty())
    }

    fn precedes(&self, other: &dyn Sibling) -> bool {
        (self.sibling_created(), self.sibling_uuid()) < (other.sibling_created(), other.sibling_uuid())
    }
}

impl Sibling for Plant {
    fn sibling_uuid(&self) -> &str {
        &self.uuid
    }
    fn sibling_created(&self) -> DateTime<Utc> {
        self.created
    }
    fn sibling_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    fn sibling_archived(&self) -> bool {
        self.archived
    }
    fn sibling_bucket(&self) -> Option<&str> {
        self.species.as_deref()
    }
}

impl Sibling for Group {
    fn sibling_uuid(&self) -> &str {
        &self.uuid
    }
    fn sibling_created(&self) -> DateTime<Utc> {
        self.created
    }
    fn sibling_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    fn sibling_archived(&self) -> bool {
        self.archived
    }
    fn sibling_bucket(&self) -> Option<&str> {
        None
    }
}

impl Sibling for PlantDetails {
    fn sibling_uuid(&self) -> &str {
        &self.uuid
    }
    fn sibling_created(&self) -> DateTime<Utc> {
        self.created
    }
    fn sibling_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    fn sibling_archived(&self) -> bool {
        self.archived
    }
    fn sibling_bucket(&self) -> Option<&str> {
        self.species.as_deref()
    }
}

impl Sibling for GroupDetails {
    fn sibling_uuid(&self) -> &str {
        &self.uuid
    }
    fn sibling_created(&self) -> DateTime<Utc> {
        self.created
    }
    fn sibling_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    fn sibling_archived(&self) -> bool {
        self.archived
    }
    fn sibling_bucket(&self) -> Option<&str> {
        None
    }
}

// 1 + the number of earlier, non-archived, unnamed siblings in the same bucket.
pub(crate) fn unnamed_index<T: Sibling>(entity: &T, siblings: &[T]) -> usize {
    1 + siblings
        .iter()
        .filter(|sibling| {
            sibling.sibling_uuid() != entity.sibling_uuid()
                && !sibling.sibling_archived()
                && sibling.is_unnamed()
                && sibling.sibling_bucket() == entity.sibling_bucket()
                && sibling.precedes(entity)
        })
        .count()
}

pub fn plant_display_name(plant: &Plant, siblings: &[Plant]) -> String {
    if !plant.is_unnamed() {
        return plant.name.clone().unwrap_or_default();
    }
    let index = unnamed_index(plant, siblings);
    match plant.species.as_deref() {
        Some(species) => format!("Unnamed {species} {index}"),
        None => format!("Unnamed plant {index}"),
    }
}

pub fn group_display_name(group: &Group, siblings: &[Group]) -> String {
    if !group.is_unnamed() {
        return group.name.clone().unwrap_or_default();
    }
    format!("Unnamed group {}", unnamed_index(group, siblings))
}

pub fn thumbnail_for(plant: &Plant, photos: &[Photo]) -> Option<String> {
    let default = plant
        .default_photo
        .and_then(|id| photos.iter().find(|photo| photo.id == id));
    default
        .or_else(|| photos.iter().max_by_key(|photo| (photo.timestamp, photo.id)))
        .map(|photo| photo.thumbnail.clone())
}

pub fn build_snapshot(store: &dyn EntityStore, owner: &str) -> AppResult<OverviewState> {
    let plants = store.plants_for_owner(owner)?;
    let groups = store.groups_for_owner(owner)?;

    let group_refs = groups
        .iter()
        .map(|group| {
            (
                group.uuid.clone(),
                GroupRef {
                    uuid: group.uuid.clone(),
                    name: group_display_name(group, &groups),
                },
            )
        })
        .collect::<HashMap<_, _>>();

    let mut snapshot = OverviewState {
        show_archive: plants.iter().any(|plant| plant.archived) || groups.iter().any(|group| group.archived),
        ..OverviewState::default()
    };

    for group in groups.iter().filter(|group| !group.archived) {
        let members = count_members(group, &plants);
        snapshot
            .groups
            .insert(group.uuid.clone(), describe_group(group, &groups, members));
    }

    for plant in plants.iter().filter(|plant| !plant.archived) {
        let group = plant.group.as_ref().and_then(|uuid| group_refs.get(uuid)).cloned();
        snapshot
            .plants
            .insert(plant.uuid.clone(), describe_plant(store, plant, &plants, group)?);
    }

    Ok(snapshot)
}

pub fn build_detail_state(store: &dyn EntityStore, entity: &Entity) -> AppResult<DetailState> {
    match entity {
        Entity::Plant(plant) => Ok(DetailState::Plant(plant_state(store, plant)?)),
        Entity::Group(group) => Ok(DetailState::Group(group_state(store, group)?)),
    }
}

pub fn plant_state(store: &dyn EntityStore, plant: &Plant) -> AppResult<PlantState> {
    let details = plant_details(store, plant)?;
    let events = EventTimeline::from_events(&store.events_for_plant(&plant.uuid)?);
    let (photos, default_photo) = photo_details(plant, store.photos_for_plant(&plant.uuid)?);
    Ok(PlantState {
        plant: details,
        events,
        photos,
        default_photo,
    })
}

pub fn group_state(store: &dyn EntityStore, group: &Group) -> AppResult<GroupState> {
    let details = group_details(store, group)?;
    let members = group_members(store, group)?;
    let siblings = store.plants_for_owner(&group.owner)?;
    let group_ref = GroupRef {
        uuid: group.uuid.clone(),
        name: details.display_name.clone(),
    };

    let mut plants = BTreeMap::new();
    for plant in members.iter().filter(|plant| !plant.archived) {
        plants.insert(
            plant.uuid.clone(),
            describe_plant(store, plant, &siblings, Some(group_ref.clone()))?,
        );
    }
    Ok(GroupState {
        group: details,
        plants,
    })
}

pub fn plant_details(store: &dyn EntityStore, plant: &Plant) -> AppResult<PlantDetails> {
    let siblings = store.plants_for_owner(&plant.owner)?;
    let group = group_ref_for(store, plant)?;
    describe_plant(store, plant, &siblings, group)
}

pub fn group_details(store: &dyn EntityStore, group: &Group) -> AppResult<GroupDetails> {
    let siblings = store.groups_for_owner(&group.owner)?;
    let members = member_count(store, group)?;
    Ok(describe_group(group, &siblings, members))
}

pub fn group_ref_for(store: &dyn EntityStore, plant: &Plant) -> AppResult<Option<GroupRef>> {
    let Some(uuid) = plant.group.as_deref() else {
        return Ok(None);
    };
    let Some(group) = store.get_group(uuid)? else {
        return Ok(None);
    };
    if group.owner != plant.owner {
        return Ok(None);
    }
    let siblings = store.groups_for_owner(&group.owner)?;
    Ok(Some(GroupRef {
        uuid: group.uuid.clone(),
        name: group_display_name(&group, &siblings),
    }))
}

pub fn member_count(store: &dyn EntityStore, group: &Group) -> AppResult<u32> {
    let members = group_members(store, group)?;
    Ok(members.iter().filter(|plant| !plant.archived).count() as u32)
}

pub fn photo_details(plant: &Plant, mut photos: Vec<Photo>) -> (Vec<PhotoDetails>, Option<PhotoDetails>) {
    photos.sort_by(|a, b| (b.timestamp, b.id).cmp(&(a.timestamp, a.id)));
    let default_photo = plant
        .default_photo
        .and_then(|id| photos.iter().find(|photo| photo.id == id))
        .map(PhotoDetails::from);
    (photos.iter().map(PhotoDetails::from).collect(), default_photo)
}

fn group_members(store: &dyn EntityStore, group: &Group) -> AppResult<Vec<Plant>> {
    Ok(store
        .plants_in_group(&group.uuid)?
        .into_iter()
        .filter(|plant| plant.owner == group.owner)
        .collect())
}

fn count_members(group: &Group, plants: &[Plant]) -> u32 {
    plants
        .iter()
        .filter(|plant| !plant.archived && plant.group.as_deref() == Some(group.uuid.as_str()))
        .count() as u32
}

fn describe_plant(
    store: &dyn EntityStore,
    plant: &Plant,
    siblings: &[Plant],
    group: Option<GroupRef>,
) -> AppResult<PlantDetails> {
    let photos = store.photos_for_plant(&plant.uuid)?;
    Ok(PlantDetails {
        uuid: plant.uuid.clone(),
        name: plant.name.clone(),
        display_name: plant_display_name(plant, siblings),
        species: plant.species.clone(),
        description: plant.description.clone(),
        pot_size: plant.pot_size,
        created: plant.created,
        archived: plant.archived,
        last_watered: store.latest_event(&plant.uuid, EventKind::Water)?,
        last_fertilized: store.latest_event(&plant.uuid, EventKind::Fertilize)?,
        thumbnail: thumbnail_for(plant, &photos),
        group,
    })
}

fn describe_group(group: &Group, siblings: &[Group], members: u32) -> GroupDetails {
    GroupDetails {
        uuid: group.uuid.clone(),
        name: group.name.clone(),
        display_name: group_display_name(group, siblings),
        location: group.location.clone(),
        description: group.description.clone(),
        created: group.created,
        archived: group.archived,
        plants: members,
    }
}

pub fn reload_entity(store: &dyn EntityStore, entity: &Entity) -> AppResult<Entity> {
    let reloaded = match entity {
        Entity::Plant(plant) => store.get_plant(&plant.uuid)?.map(Entity::Plant),
        Entity::Group(group) => store.get_group(&group.uuid)?.map(Entity::Group),
    };
    reloaded.ok_or_else(|| AppError::NotFound(format!("{} {}", entity.kind().as_str(), entity.uuid())))
}
