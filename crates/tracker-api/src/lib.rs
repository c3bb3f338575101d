use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;
use tracker_core::{CoreError, Location, LocationDraft, LocationId, NewPerson, Person};
use tracker_store_sqlite::{SqliteStore, DEFAULT_BUSY_TIMEOUT};

pub use tracker_store_sqlite::{IntegrityReport, SchemaStatus};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("location {0} not found")]
    NotFound(i64),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<CoreError> for ApiError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::Validation(message) | CoreError::TimeFormat(message) => {
                Self::InvalidInput(message)
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiPerson {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

/// JSON shape of a location on the wire.
///
/// `id` and `changeTime` are filled in on output and ignored on input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiLocation {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub change_time: i64,
    #[serde(default)]
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
    pub lat: f32,
    pub lng: f32,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub persons: Vec<ApiPerson>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreatedLocation {
    pub id: i64,
    pub change_time: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedLocation {
    pub change_time: i64,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<ApiPerson>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Vec<ApiPerson>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl From<&Person> for ApiPerson {
    fn from(value: &Person) -> Self {
        Self { first_name: value.first_name.clone(), last_name: value.last_name.clone() }
    }
}

impl From<Location> for ApiLocation {
    fn from(value: Location) -> Self {
        Self {
            id: value.id.0,
            change_time: value.change_time,
            persons: value.persons.iter().map(ApiPerson::from).collect(),
            name: value.name,
            time: value.time,
            lat: value.lat,
            lng: value.lng,
            description: value.description,
        }
    }
}

impl ApiLocation {
    /// Client fields only; server-assigned `id` and `changeTime` are dropped.
    #[must_use]
    pub fn to_draft(&self) -> LocationDraft {
        LocationDraft {
            name: self.name.clone(),
            time: self.time,
            lat: self.lat,
            lng: self.lng,
            description: self.description.clone(),
            persons: self
                .persons
                .iter()
                .map(|person| NewPerson::new(person.first_name.clone(), person.last_name.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackerApi {
    db_path: PathBuf,
    busy_timeout: Duration,
}

impl TrackerApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path, busy_timeout: DEFAULT_BUSY_TIMEOUT }
    }

    /// Bound how long each call waits for a locked database.
    #[must_use]
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    fn open_store(&self) -> ApiResult<SqliteStore> {
        Ok(SqliteStore::open_with_busy_timeout(&self.db_path, self.busy_timeout)?)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> ApiResult<SchemaStatus> {
        let store = self.open_store()?;
        Ok(store.schema_status()?)
    }

    /// Bring the database to the latest schema version and report the result.
    ///
    /// # Errors
    /// Returns an error when the stored version is unsupported or an upgrade fails.
    pub fn migrate(&self) -> ApiResult<SchemaStatus> {
        let mut store = self.open_store()?;
        store.migrate().context("failed to migrate database")?;
        Ok(store.schema_status()?)
    }

    /// List locations, optionally only those changed at or after `change_time`.
    ///
    /// # Errors
    /// Returns [`ApiError::Storage`] when the listing cannot be read.
    pub fn list_locations(&self, change_time: Option<i64>) -> ApiResult<Vec<ApiLocation>> {
        let store = self.open_store()?;
        let locations = match change_time {
            Some(change_time) => store.get_locations_by_change_time(change_time),
            None => store.get_locations(),
        }
        .context("failed to list locations")?;
        Ok(locations.into_iter().map(ApiLocation::from).collect())
    }

    /// # Errors
    /// Returns [`ApiError::NotFound`] for an unknown id.
    pub fn get_location(&self, id: i64) -> ApiResult<ApiLocation> {
        let store = self.open_store()?;
        let location = store
            .get_location(LocationId(id))
            .with_context(|| format!("failed to load location {id}"))?
            .ok_or(ApiError::NotFound(id))?;
        Ok(ApiLocation::from(location))
    }

    /// # Errors
    /// Returns [`ApiError::InvalidInput`] when the location fails validation.
    pub fn create_location(&self, input: &ApiLocation) -> ApiResult<CreatedLocation> {
        let draft = input.to_draft();
        draft.validate()?;

        let mut store = self.open_store()?;
        let (id, change_time) = store.add_location(&draft).context("failed to create location")?;
        Ok(CreatedLocation { id: id.0, change_time })
    }

    /// Replace the client fields and person set of an existing location.
    ///
    /// # Errors
    /// Returns [`ApiError::NotFound`] for an unknown id and
    /// [`ApiError::InvalidInput`] when the location fails validation.
    pub fn update_location(&self, id: i64, input: &ApiLocation) -> ApiResult<UpdatedLocation> {
        let draft = input.to_draft();
        draft.validate()?;

        let mut store = self.open_store()?;
        if !store.exists_location(LocationId(id))? {
            return Err(ApiError::NotFound(id));
        }
        let change_time = store
            .change_location(LocationId(id), &draft)
            .with_context(|| format!("failed to update location {id}"))?
            .ok_or(ApiError::NotFound(id))?;
        Ok(UpdatedLocation { change_time })
    }

    /// # Errors
    /// Returns [`ApiError::NotFound`] for an unknown id.
    pub fn delete_location(&self, id: i64) -> ApiResult<()> {
        let mut store = self.open_store()?;
        store
            .delete_location(LocationId(id))
            .with_context(|| format!("failed to delete location {id}"))?
            .ok_or(ApiError::NotFound(id))?;
        Ok(())
    }

    /// Ids of locations deleted at or after `deletion_time`; `None` is the full history.
    ///
    /// # Errors
    /// Returns [`ApiError::Storage`] when tombstones cannot be read.
    pub fn list_deleted_location_ids(&self, deletion_time: Option<i64>) -> ApiResult<Vec<i64>> {
        let store = self.open_store()?;
        let ids = store
            .get_deleted_location_ids_by_deletion_time(deletion_time.unwrap_or(0))
            .context("failed to list deleted locations")?;
        Ok(ids.into_iter().map(|id| id.0).collect())
    }

    /// # Errors
    /// Returns [`ApiError::Storage`] when a health check query fails.
    pub fn health(&self) -> ApiResult<IntegrityReport> {
        let store = self.open_store()?;
        Ok(store.integrity_check().context("failed to run integrity check")?)
    }
}
