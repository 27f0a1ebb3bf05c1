use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Plant,
    Group,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plant => "plant",
            Self::Group => "group",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Water,
    Fertilize,
    Prune,
    Repot,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [Self::Water, Self::Fertilize, Self::Prune, Self::Repot];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Water => "water",
            Self::Fertilize => "fertilize",
            Self::Prune => "prune",
            Self::Repot => "repot",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "water" => Some(Self::Water),
            "fertilize" => Some(Self::Fertilize),
            "prune" => Some(Self::Prune),
            "repot" => Some(Self::Repot),
            _ => None,
        }
    }

    pub fn is_summarized(self) -> bool {
        matches!(self, Self::Water | Self::Fertilize)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Plant {
    pub uuid: String,
    pub owner: String,
    pub name: Option<String>,
    pub species: Option<String>,
    pub description: Option<String>,
    pub pot_size: Option<u32>,
    pub created: DateTime<Utc>,
    pub archived: bool,
    pub group: Option<String>,
    pub default_photo: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Group {
    pub uuid: String,
    pub owner: String,
    pub name: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub created: DateTime<Utc>,
    pub archived: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Event {
    pub id: i64,
    pub plant: String,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Photo {
    pub id: i64,
    pub plant: String,
    pub timestamp: DateTime<Utc>,
    pub image: String,
    pub thumbnail: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Plant(Plant),
    Group(Group),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Plant(_) => EntityKind::Plant,
            Self::Group(_) => EntityKind::Group,
        }
    }

    pub fn uuid(&self) -> &str {
        match self {
            Self::Plant(plant) => &plant.uuid,
            Self::Group(group) => &group.uuid,
        }
    }

    pub fn owner(&self) -> &str {
        match self {
            Self::Plant(plant) => &plant.owner,
            Self::Group(group) => &group.owner,
        }
    }

    pub fn is_archived(&self) -> bool {
        match self {
            Self::Plant(plant) => plant.archived,
            Self::Group(group) => group.archived,
        }
    }
}

impl From<Plant> for Entity {
    fn from(value: Plant) -> Self {
        Self::Plant(value)
    }
}

impl From<Group> for Entity {
    fn from(value: Group) -> Self {
        Self::Group(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GroupRef {
    pub uuid: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PlantDetails {
    pub uuid: String,
    pub name: Option<String>,
    pub display_name: String,
    pub species: Option<String>,
    pub description: Option<String>,
    pub pot_size: Option<u32>,
    pub created: DateTime<Utc>,
    pub archived: bool,
    pub last_watered: Option<DateTime<Utc>>,
    pub last_fertilized: Option<DateTime<Utc>>,
    pub thumbnail: Option<String>,
    pub group: Option<GroupRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GroupDetails {
    pub uuid: String,
    pub name: Option<String>,
    pub display_name: String,
    pub location: Option<String>,
    pub description: Option<String>,
    pub created: DateTime<Utc>,
    pub archived: bool,
    pub plants: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OverviewState {
    pub plants: BTreeMap<String, PlantDetails>,
    pub groups: BTreeMap<String, GroupDetails>,
    pub show_archive: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EventTimeline {
    pub water: Vec<DateTime<Utc>>,
    pub fertilize: Vec<DateTime<Utc>>,
    pub prune: Vec<DateTime<Utc>>,
    pub repot: Vec<DateTime<Utc>>,
}

impl EventTimeline {
    pub fn from_events(events: &[Event]) -> Self {
        let mut timeline = Self::default();
        for event in events {
            timeline.entry_mut(event.kind).push(event.timestamp);
        }
        for kind in EventKind::ALL {
            timeline.entry_mut(kind).sort_by(|a, b| b.cmp(a));
        }
        timeline
    }

    fn entry_mut(&mut self, kind: EventKind) -> &mut Vec<DateTime<Utc>> {
        match kind {
            EventKind::Water => &mut self.water,
            EventKind::Fertilize => &mut self.fertilize,
            EventKind::Prune => &mut self.prune,
            EventKind::Repot => &mut self.repot,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PhotoDetails {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub image: String,
    pub thumbnail: String,
}

impl From<&Photo> for PhotoDetails {
    fn from(value: &Photo) -> Self {
        Self {
            id: value.id,
            timestamp: value.timestamp,
            image: value.image.clone(),
            thumbnail: value.thumbnail.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PlantState {
    pub plant: PlantDetails,
    pub events: EventTimeline,
    pub photos: Vec<PhotoDetails>,
    pub default_photo: Option<PhotoDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GroupState {
    pub group: GroupDetails,
    pub plants: BTreeMap<String, PlantDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DetailState {
    Plant(PlantState),
    Group(GroupState),
}

impl DetailState {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Plant(_) => EntityKind::Plant,
            Self::Group(_) => EntityKind::Group,
        }
    }

    pub fn apply_patch(&mut self, patch: &DetailPatch) -> AppResult<()> {
        match (self, patch) {
            (Self::Plant(state), DetailPatch::Plant(patch)) => {
                patch.apply(state);
                Ok(())
            }
            (Self::Group(state), DetailPatch::Group(patch)) => {
                patch.apply(state);
                Ok(())
            }
            (state, patch) => Err(AppError::InvalidPatch(format!(
                "{} patch cannot be applied to {} detail state",
                patch.kind().as_str(),
                state.kind().as_str()
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlantPatch {
    pub last_watered: Option<Option<DateTime<Utc>>>,
    pub last_fertilized: Option<Option<DateTime<Utc>>>,
    pub thumbnail: Option<Option<String>>,
    pub group: Option<Option<GroupRef>>,
}

impl PlantPatch {
    pub fn apply(&self, details: &mut PlantDetails) {
        if let Some(value) = &self.last_watered {
            details.last_watered = *value;
        }
        if let Some(value) = &self.last_fertilized {
            details.last_fertilized = *value;
        }
        if let Some(value) = &self.thumbnail {
            details.thumbnail = value.clone();
        }
        if let Some(value) = &self.group {
            details.group = value.clone();
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupPatch {
    pub plants: Option<u32>,
}

impl GroupPatch {
    pub fn apply(&self, details: &mut GroupDetails) {
        if let Some(count) = self.plants {
            details.plants = count;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityPatch {
    Plant(PlantPatch),
    Group(GroupPatch),
}

impl EntityPatch {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Plant(_) => EntityKind::Plant,
            Self::Group(_) => EntityKind::Group,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlantStatePatch {
    pub plant: Option<PlantDetails>,
    pub plant_fields: Option<PlantPatch>,
    pub events: Option<EventTimeline>,
    pub photos: Option<Vec<PhotoDetails>>,
    pub default_photo: Option<Option<PhotoDetails>>,
}

impl PlantStatePatch {
    pub fn apply(&self, state: &mut PlantState) {
        if let Some(plant) = &self.plant {
            state.plant = plant.clone();
        }
        if let Some(fields) = &self.plant_fields {
            fields.apply(&mut state.plant);
        }
        if let Some(events) = &self.events {
            state.events = events.clone();
        }
        if let Some(photos) = &self.photos {
            state.photos = photos.clone();
        }
        if let Some(default_photo) = &self.default_photo {
            state.default_photo = default_photo.clone();
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupStatePatch {
    pub group: Option<GroupDetails>,
    pub plants: Option<BTreeMap<String, PlantDetails>>,
    pub upsert_plants: Vec<PlantDetails>,
    pub remove_plants: Vec<String>,
}

impl GroupStatePatch {
    pub fn apply(&self, state: &mut GroupState) {
        if let Some(group) = &self.group {
            state.group = group.clone();
        }
        if let Some(plants) = &self.plants {
            state.plants = plants.clone();
        }
        for plant in &self.upsert_plants {
            state.plants.insert(plant.uuid.clone(), plant.clone());
        }
        for uuid in &self.remove_plants {
            state.plants.remove(uuid);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailPatch {
    Plant(PlantStatePatch),
    Group(GroupStatePatch),
}

impl DetailPatch {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Plant(_) => EntityKind::Plant,
            Self::Group(_) => EntityKind::Group,
        }
    }
}
