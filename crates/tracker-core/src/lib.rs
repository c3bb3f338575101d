use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub mod time_codec;

pub use time_codec::{format_time, is_sentinel, now_unix, parse_time, SENTINEL_TIME};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("time format error: {0}")]
    TimeFormat(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LocationId(pub i64);

impl Display for LocationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PersonId(pub i64);

impl Display for PersonId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A person row as persisted by the registry.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Person {
    pub id: PersonId,
    pub first_name: String,
    pub last_name: String,
}

/// A person reference supplied by a client, not yet resolved to a [`PersonId`].
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct NewPerson {
    pub first_name: String,
    pub last_name: String,
}

impl NewPerson {
    #[must_use]
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self { first_name: first_name.into(), last_name: last_name.into() }
    }

    /// Identity key used by the registry.
    ///
    /// Folds ASCII case only, matching SQLite `NOCASE` collation.
    #[must_use]
    pub fn identity_key(&self) -> (String, String) {
        (self.first_name.to_ascii_lowercase(), self.last_name.to_ascii_lowercase())
    }
}

impl From<&Person> for NewPerson {
    fn from(value: &Person) -> Self {
        Self { first_name: value.first_name.clone(), last_name: value.last_name.clone() }
    }
}

/// Client-controlled fields of a location.
///
/// `id` and `change_time` are absent on purpose: both are assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationDraft {
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
    pub lat: f32,
    pub lng: f32,
    pub description: String,
    #[serde(default)]
    pub persons: Vec<NewPerson>,
}

impl LocationDraft {
    /// Check coordinate ranges and person names.
    ///
    /// # Errors
    /// Returns [`CoreError::Validation`] describing the first offending field.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(CoreError::Validation(format!(
                "lat must be within [-90, 90], got {}",
                self.lat
            )));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(CoreError::Validation(format!(
                "lng must be within [-180, 180], got {}",
                self.lng
            )));
        }
        for (index, person) in self.persons.iter().enumerate() {
            if person.first_name.trim().is_empty() && person.last_name.trim().is_empty() {
                return Err(CoreError::Validation(format!(
                    "persons[{index}] must have a first or last name"
                )));
            }
        }
        Ok(())
    }

    /// Persons with case-insensitive duplicates removed, first occurrence kept.
    #[must_use]
    pub fn distinct_persons(&self) -> Vec<&NewPerson> {
        let mut seen = BTreeSet::new();
        self.persons.iter().filter(|person| seen.insert(person.identity_key())).collect()
    }
}

/// A persisted location with its associated persons.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub id: LocationId,
    pub change_time: i64,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
    pub lat: f32,
    pub lng: f32,
    pub description: String,
    pub persons: Vec<Person>,
}

impl Location {
    /// Rebuild the draft that would reproduce this location's client fields.
    #[must_use]
    pub fn to_draft(&self) -> LocationDraft {
        LocationDraft {
            name: self.name.clone(),
            time: self.time,
            lat: self.lat,
            lng: self.lng,
            description: self.description.clone(),
            persons: self.persons.iter().map(NewPerson::from).collect(),
        }
    }
}
