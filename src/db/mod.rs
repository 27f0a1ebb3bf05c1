use crate::errors::{AppError, AppResult};
use crate::models::{Event, EventKind, Group, Photo, Plant};
use crate::store::EntityStore;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = include_str!("schema.sql");

const PLANT_COLUMNS: &str =
    "uuid, owner, name, species, description, pot_size, created, archived, group_uuid, default_photo";
const GROUP_COLUMNS: &str = "uuid, owner, name, location, description, created, archived";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| AppError::poisoned("database"))
    }

    pub fn insert_plant(&self, plant: &Plant) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO plants (uuid, owner, name, species, description, pot_size, created, archived, group_uuid, default_photo)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                plant.uuid,
                plant.owner,
                plant.name,
                plant.species,
                plant.description,
                plant.pot_size,
                format_time(plant.created),
                plant.archived,
                plant.group,
                plant.default_photo,
            ],
        )?;
        Ok(())
    }

    pub fn update_plant(&self, plant: &Plant) -> AppResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE plants SET name = ?1, species = ?2, description = ?3, pot_size = ?4, archived = ?5,
               group_uuid = ?6, default_photo = ?7
             WHERE uuid = ?8",
            params![
                plant.name,
                plant.species,
                plant.description,
                plant.pot_size,
                plant.archived,
                plant.group,
                plant.default_photo,
                plant.uuid,
            ],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("plant {}", plant.uuid)));
        }
        Ok(())
    }

    pub fn delete_plant(&self, uuid: &str) -> AppResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM plant_events WHERE plant_uuid = ?1", [uuid])?;
        tx.execute("DELETE FROM plant_photos WHERE plant_uuid = ?1", [uuid])?;
        let deleted = tx.execute("DELETE FROM plants WHERE uuid = ?1", [uuid])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    pub fn insert_group(&self, group: &Group) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO plant_groups (uuid, owner, name, location, description, created, archived)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                group.uuid,
                group.owner,
                group.name,
                group.location,
                group.description,
                format_time(group.created),
                group.archived,
            ],
        )?;
        Ok(())
    }

    pub fn update_group(&self, group: &Group) -> AppResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE plant_groups SET name = ?1, location = ?2, description = ?3, archived = ?4 WHERE uuid = ?5",
            params![group.name, group.location, group.description, group.archived, group.uuid],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("group {}", group.uuid)));
        }
        Ok(())
    }

    pub fn delete_group(&self, uuid: &str) -> AppResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("UPDATE plants SET group_uuid = NULL WHERE group_uuid = ?1", [uuid])?;
        let deleted = tx.execute("DELETE FROM plant_groups WHERE uuid = ?1", [uuid])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    pub fn set_plant_group(&self, plant: &str, group: Option<&str>) -> AppResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE plants SET group_uuid = ?1 WHERE uuid = ?2",
            params![group, plant],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("plant {plant}")));
        }
        Ok(())
    }

    pub fn add_event(&self, plant: &str, kind: EventKind, timestamp: DateTime<Utc>) -> AppResult<Event> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO plant_events (plant_uuid, kind, timestamp) VALUES (?1, ?2, ?3)",
            params![plant, kind.as_str(), format_time(timestamp)],
        )?;
        Ok(Event {
            id: conn.last_insert_rowid(),
            plant: plant.to_string(),
            kind,
            timestamp,
        })
    }

    pub fn delete_event(&self, id: i64) -> AppResult<Option<Event>> {
        let conn = self.conn()?;
        let event = conn
            .query_row(
                "SELECT id, plant_uuid, kind, timestamp FROM plant_events WHERE id = ?1",
                [id],
                parse_event_row,
            )
            .optional()?;
        if event.is_some() {
            conn.execute("DELETE FROM plant_events WHERE id = ?1", [id])?;
        }
        Ok(event)
    }

    pub fn add_photo(
        &self,
        plant: &str,
        timestamp: DateTime<Utc>,
        image: &str,
        thumbnail: &str,
    ) -> AppResult<Photo> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO plant_photos (plant_uuid, timestamp, image, thumbnail) VALUES (?1, ?2, ?3, ?4)",
            params![plant, format_time(timestamp), image, thumbnail],
        )?;
        Ok(Photo {
            id: conn.last_insert_rowid(),
            plant: plant.to_string(),
            timestamp,
            image: image.to_string(),
            thumbnail: thumbnail.to_string(),
        })
    }

    pub fn delete_photo(&self, id: i64) -> AppResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("UPDATE plants SET default_photo = NULL WHERE default_photo = ?1", [id])?;
        let deleted = tx.execute("DELETE FROM plant_photos WHERE id = ?1", [id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    pub fn set_default_photo(&self, plant: &str, photo: Option<i64>) -> AppResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE plants SET default_photo = ?1 WHERE uuid = ?2",
            params![photo, plant],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("plant {plant}")));
        }
        Ok(())
    }

    fn query_plants(&self, filter: &str, value: &str) -> AppResult<Vec<Plant>> {
        let conn = self.conn()?;
        let mut statement = conn.prepare(&format!(
            "SELECT {PLANT_COLUMNS} FROM plants WHERE {filter} = ?1 ORDER BY created ASC, uuid ASC"
        ))?;
        let rows = statement.query_map([value], parse_plant_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }
}

impl EntityStore for Database {
    fn plants_for_owner(&self, owner: &str) -> AppResult<Vec<Plant>> {
        self.query_plants("owner", owner)
    }

    fn groups_for_owner(&self, owner: &str) -> AppResult<Vec<Group>> {
        let conn = self.conn()?;
        let mut statement = conn.prepare(&format!(
            "SELECT {GROUP_COLUMNS} FROM plant_groups WHERE owner = ?1 ORDER BY created ASC, uuid ASC"
        ))?;
        let groups = statement
            .query_map([owner], parse_group_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(groups)
    }

    fn get_plant(&self, uuid: &str) -> AppResult<Option<Plant>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {PLANT_COLUMNS} FROM plants WHERE uuid = ?1"),
            [uuid],
            parse_plant_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    fn get_group(&self, uuid: &str) -> AppResult<Option<Group>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {GROUP_COLUMNS} FROM plant_groups WHERE uuid = ?1"),
            [uuid],
            parse_group_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    fn plants_in_group(&self, group: &str) -> AppResult<Vec<Plant>> {
        self.query_plants("group_uuid", group)
    }

    fn events_for_plant(&self, plant: &str) -> AppResult<Vec<Event>> {
        let conn = self.conn()?;
        let mut statement = conn.prepare(
            "SELECT id, plant_uuid, kind, timestamp FROM plant_events
             WHERE plant_uuid = ?1 ORDER BY timestamp DESC, id DESC",
        )?;
        let events = statement
            .query_map([plant], parse_event_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    fn latest_event(&self, plant: &str, kind: EventKind) -> AppResult<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let latest: Option<String> = conn.query_row(
            "SELECT MAX(timestamp) FROM plant_events WHERE plant_uuid = ?1 AND kind = ?2",
            params![plant, kind.as_str()],
            |row| row.get(0),
        )?;
        latest
            .map(|raw| parse_time(&raw))
            .transpose()
            .map_err(AppError::from)
    }

    fn photos_for_plant(&self, plant: &str) -> AppResult<Vec<Photo>> {
        let conn = self.conn()?;
        let mut statement = conn.prepare(
            "SELECT id, plant_uuid, timestamp, image, thumbnail FROM plant_photos
             WHERE plant_uuid = ?1 ORDER BY timestamp DESC, id DESC",
        )?;
        let photos = statement
            .query_map([plant], |row| {
                Ok(Photo {
                    id: row.get(0)?,
                    plant: row.get(1)?,
                    timestamp: parse_time(&row.get::<_, String>(2)?)?,
                    image: row.get(3)?,
                    thumbnail: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(photos)
    }

    fn has_archived(&self, owner: &str) -> AppResult<bool> {
        let conn = self.conn()?;
        let archived: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM plants WHERE owner = ?1 AND archived = 1)
                 OR EXISTS (SELECT 1 FROM plant_groups WHERE owner = ?1 AND archived = 1)",
            [owner],
            |row| row.get(0),
        )?;
        Ok(archived)
    }
}

fn parse_plant_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Plant> {
    Ok(Plant {
        uuid: row.get(0)?,
        owner: row.get(1)?,
        name: row.get(2)?,
        species: row.get(3)?,
        description: row.get(4)?,
        pot_size: row.get(5)?,
        created: parse_time(&row.get::<_, String>(6)?)?,
        archived: row.get(7)?,
        group: row.get(8)?,
        default_photo: row.get(9)?,
    })
}

fn parse_group_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        uuid: row.get(0)?,
        owner: row.get(1)?,
        name: row.get(2)?,
        location: row.get(3)?,
        description: row.get(4)?,
        created: parse_time(&row.get::<_, String>(5)?)?,
        archived: row.get(6)?,
    })
}

fn parse_event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        plant: row.get(1)?,
        kind: parse_event_kind(&row.get::<_, String>(2)?)?,
        timestamp: parse_time(&row.get::<_, String>(3)?)?,
    })
}

fn parse_event_kind(raw: &str) -> rusqlite::Result<EventKind> {
    EventKind::parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Unknown event kind '{}'", raw),
            )),
        )
    })
}

// Fixed-width so that text ordering in SQL matches time ordering.
fn format_time(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())),
            )
        })
}
