use crate::errors::AppResult;
use crate::models::{Event, EventKind, Group, Photo, Plant};
use chrono::{DateTime, Utc};

pub trait EntityStore: Send + Sync {
    fn plants_for_owner(&self, owner: &str) -> AppResult<Vec<Plant>>;

    fn groups_for_owner(&self, owner: &str) -> AppResult<Vec<Group>>;

    fn get_plant(&self, uuid: &str) -> AppResult<Option<Plant>>;

    fn get_group(&self, uuid: &str) -> AppResult<Option<Group>>;

    fn plants_in_group(&self, group: &str) -> AppResult<Vec<Plant>>;

    fn events_for_plant(&self, plant: &str) -> AppResult<Vec<Event>>;

    fn latest_event(&self, plant: &str, kind: EventKind) -> AppResult<Option<DateTime<Utc>>>;

    fn photos_for_plant(&self, plant: &str) -> AppResult<Vec<Photo>>;

    fn has_archived(&self, owner: &str) -> AppResult<bool>;
}
