use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracker_core::{
    format_time, now_unix, parse_time, Location, LocationDraft, LocationId, Person, PersonId,
};

mod ledger;
mod registry;
mod schema;

pub use schema::{SchemaStatus, LATEST_SCHEMA_VERSION};

const LOCATION_SELECT_SQL: &str = "SELECT
    id, chng_time, name, time, lat, lng, description
FROM location";

/// How long a connection waits on a locked database before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Source of change and deletion watermarks, in seconds since the Unix epoch.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub struct SqliteStore {
    conn: Connection,
    clock: Clock,
}

impl fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: Option<i64>,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

impl IntegrityReport {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.quick_check_ok
            && self.foreign_key_violations.is_empty()
            && self.schema_status.pending_versions.is_empty()
    }
}

impl SqliteStore {
    /// Open a SQLite-backed location store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Like [`SqliteStore::open`], with `busy_timeout` bounding every lock wait.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open_with_busy_timeout(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to configure sqlite pragmas")?;
        conn.busy_timeout(busy_timeout).context("failed to set sqlite busy timeout")?;

        Ok(Self { conn, clock: Arc::new(now_unix) })
    }

    /// Replace the wall clock used for change and deletion times.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Report current and target schema versions plus pending upgrades.
    ///
    /// # Errors
    /// Returns an error when the stored version cannot be read.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        schema::status(&self.conn)
    }

    /// Create the schema when missing and apply every pending numbered upgrade.
    ///
    /// # Errors
    /// Returns an error when the stored version is newer than supported, is
    /// unreadable, or any upgrade script fails.
    pub fn migrate(&mut self) -> Result<()> {
        schema::migrate(&mut self.conn)
    }

    /// # Errors
    /// Returns an error when the existence query fails.
    pub fn exists_location(&self, id: LocationId) -> Result<bool> {
        let exists = self
            .conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM location WHERE id = ?1)",
                params![id.0],
                |row| row.get::<_, i64>(0),
            )
            .with_context(|| format!("failed to query location {id}"))?;
        Ok(exists == 1)
    }

    /// All locations ordered by observation time, persons populated.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn get_locations(&self) -> Result<Vec<Location>> {
        self.load_locations(None)
    }

    /// Locations whose change time is at or after `change_time`.
    ///
    /// `change_time <= 0` returns the full listing.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn get_locations_by_change_time(&self, change_time: i64) -> Result<Vec<Location>> {
        if change_time <= 0 {
            return self.load_locations(None);
        }
        self.load_locations(Some(change_time))
    }

    /// Load one location with its persons; `None` for an unknown id.
    ///
    /// # Errors
    /// Returns an error when the lookup fails.
    pub fn get_location(&self, id: LocationId) -> Result<Option<Location>> {
        let tx = self.conn.unchecked_transaction().context("failed to start read transaction")?;

        let location = tx
            .query_row(
                &format!("{LOCATION_SELECT_SQL} WHERE id = ?1"),
                params![id.0],
                read_location_row,
            )
            .optional()
            .with_context(|| format!("failed to query location {id}"))?;

        let Some(mut location) = location else {
            return Ok(None);
        };
        location.persons = location_persons(&tx, id)?;
        tx.commit().context("failed to finish read transaction")?;
        Ok(Some(location))
    }

    /// # Errors
    /// Returns an error when the association rows cannot be read.
    pub fn get_location_persons(&self, id: LocationId) -> Result<Vec<Person>> {
        location_persons(&self.conn, id)
    }

    /// Insert a location with a fresh change time and resolve its persons.
    ///
    /// Runs in one transaction; nothing is persisted when any step fails.
    ///
    /// # Errors
    /// Returns an error when validation fails or any write in the transaction fails.
    pub fn add_location(&mut self, draft: &LocationDraft) -> Result<(LocationId, i64)> {
        draft.validate().map_err(|err| anyhow!("location validation failed: {err}"))?;
        let time = format_time(draft.time).context("failed to format observation time")?;
        let change_time = (self.clock)();

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start add location transaction")?;

        tx.execute(
            "INSERT INTO location(chng_time, name, time, lat, lng, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                change_time,
                draft.name,
                time,
                f64::from(draft.lat),
                f64::from(draft.lng),
                draft.description,
            ],
        )
        .context("failed to insert location")?;
        let id = LocationId(tx.last_insert_rowid());

        insert_associations(&tx, id, draft)?;

        tx.commit().context("failed to commit add location transaction")?;
        Ok((id, change_time))
    }

    /// Overwrite the client fields of an existing location and replace its persons.
    ///
    /// The new change time is `max(now, previous)`. Returns `None` without writing
    /// anything when the id does not exist.
    ///
    /// # Errors
    /// Returns an error when validation fails or any write in the transaction fails.
    pub fn change_location(&mut self, id: LocationId, draft: &LocationDraft) -> Result<Option<i64>> {
        draft.validate().map_err(|err| anyhow!("location validation failed: {err}"))?;
        let time = format_time(draft.time).context("failed to format observation time")?;
        let now = (self.clock)();

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start change location transaction")?;

        let change_time = tx
            .query_row(
                "UPDATE location
                 SET
                    chng_time = MAX(?1, chng_time),
                    name = ?2,
                    time = ?3,
                    lat = ?4,
                    lng = ?5,
                    description = ?6
                 WHERE id = ?7
                 RETURNING chng_time",
                params![
                    now,
                    draft.name,
                    time,
                    f64::from(draft.lat),
                    f64::from(draft.lng),
                    draft.description,
                    id.0,
                ],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .with_context(|| format!("failed to update location {id}"))?;

        let Some(change_time) = change_time else {
            return Ok(None);
        };

        tx.execute("DELETE FROM location_person WHERE location_id = ?1", params![id.0])
            .with_context(|| format!("failed to clear persons of location {id}"))?;
        insert_associations(&tx, id, draft)?;

        tx.commit().context("failed to commit change location transaction")?;
        Ok(Some(change_time))
    }

    /// Remove a location and record its tombstone in the same transaction.
    ///
    /// Returns the deletion time, or `None` when the id does not exist; no
    /// tombstone is written in that case.
    ///
    /// # Errors
    /// Returns an error when any write in the transaction fails.
    pub fn delete_location(&mut self, id: LocationId) -> Result<Option<i64>> {
        let deletion_time = (self.clock)();

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start delete location transaction")?;

        tx.execute("DELETE FROM location_person WHERE location_id = ?1", params![id.0])
            .with_context(|| format!("failed to delete persons of location {id}"))?;
        let removed = tx
            .execute("DELETE FROM location WHERE id = ?1", params![id.0])
            .with_context(|| format!("failed to delete location {id}"))?;
        if removed == 0 {
            return Ok(None);
        }

        ledger::record_deletion(&tx, id, deletion_time)?;

        tx.commit().context("failed to commit delete location transaction")?;
        Ok(Some(deletion_time))
    }

    /// Ids of locations deleted at or after `deletion_time`.
    ///
    /// `deletion_time <= 0` returns the full tombstone history.
    ///
    /// # Errors
    /// Returns an error when tombstones cannot be read.
    pub fn get_deleted_location_ids_by_deletion_time(
        &self,
        deletion_time: i64,
    ) -> Result<Vec<LocationId>> {
        let filter = (deletion_time > 0).then_some(deletion_time);
        ledger::deleted_ids_since(&self.conn, filter)
    }

    /// Case-insensitive lookup of a person by name pair.
    ///
    /// # Errors
    /// Returns an error when the lookup fails; absence is `Ok(None)`.
    pub fn find_person_id(&self, first_name: &str, last_name: &str) -> Result<Option<PersonId>> {
        registry::find_person_id(&self.conn, first_name, last_name)
    }

    /// Insert a person row without checking for an existing one.
    ///
    /// # Errors
    /// Returns an error when the insert fails, including a duplicate name pair
    /// once the unique name index exists.
    pub fn create_person(&mut self, first_name: &str, last_name: &str) -> Result<PersonId> {
        registry::create_person(&self.conn, first_name, last_name)
    }

    /// Resolve a name pair to its canonical person id, creating it when absent.
    ///
    /// # Errors
    /// Returns an error when the transaction fails.
    pub fn find_or_create_person(&mut self, first_name: &str, last_name: &str) -> Result<PersonId> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start person transaction")?;
        let id = registry::find_or_create_person(&tx, first_name, last_name)?;
        tx.commit().context("failed to commit person transaction")?;
        Ok(id)
    }

    /// Run quick-check, foreign-key-check, and schema status health checks.
    ///
    /// # Errors
    /// Returns an error when any integrity query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ForeignKeyViolation {
                    table: row.get(0)?,
                    rowid: row.get(1)?,
                    parent: row.get(2)?,
                    fk_index: row.get(3)?,
                })
            })
            .context("failed to run PRAGMA foreign_key_check")?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row.context("failed to read foreign key violation")?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
        })
    }

    fn load_locations(&self, change_time: Option<i64>) -> Result<Vec<Location>> {
        let tx = self.conn.unchecked_transaction().context("failed to start read transaction")?;

        let mut locations = Vec::new();
        {
            let mut stmt = tx
                .prepare(&format!(
                    "{LOCATION_SELECT_SQL}
                     WHERE ?1 IS NULL OR chng_time >= ?1
                     ORDER BY time ASC, id ASC"
                ))
                .context("failed to prepare location query")?;
            let rows = stmt
                .query_map(params![change_time], read_location_row)
                .context("failed to query locations")?;
            for row in rows {
                locations.push(row.context("failed to read location row")?);
            }
        }

        let mut persons = persons_by_location(&tx, change_time)?;
        for location in &mut locations {
            location.persons = persons.remove(&location.id).unwrap_or_default();
        }

        tx.commit().context("failed to finish read transaction")?;
        Ok(locations)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn read_location_row(row: &Row<'_>) -> rusqlite::Result<Location> {
    let time: String = row.get(3)?;
    let lat: f64 = row.get(4)?;
    let lng: f64 = row.get(5)?;

    Ok(Location {
        id: LocationId(row.get(0)?),
        change_time: row.get(1)?,
        name: row.get(2)?,
        time: parse_time(&time),
        lat: lat as f32,
        lng: lng as f32,
        description: row.get(6)?,
        persons: Vec::new(),
    })
}

fn read_person_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Person> {
    Ok(Person {
        id: PersonId(row.get(offset)?),
        first_name: row.get(offset + 1)?,
        last_name: row.get(offset + 2)?,
    })
}

fn location_persons(conn: &Connection, id: LocationId) -> Result<Vec<Person>> {
    let mut stmt = conn
        .prepare(
            "SELECT p.id, p.first_name, p.last_name
             FROM location_person lp
             INNER JOIN person p ON lp.person_id = p.id
             WHERE lp.location_id = ?1
             ORDER BY p.id ASC",
        )
        .context("failed to prepare location persons query")?;
    let rows = stmt
        .query_map(params![id.0], |row| read_person_row(row, 0))
        .with_context(|| format!("failed to query persons of location {id}"))?;

    let mut persons = Vec::new();
    for row in rows {
        persons.push(row.context("failed to read location person row")?);
    }
    Ok(persons)
}

fn persons_by_location(
    conn: &Connection,
    change_time: Option<i64>,
) -> Result<BTreeMap<LocationId, Vec<Person>>> {
    let mut stmt = conn
        .prepare(
            "SELECT lp.location_id, p.id, p.first_name, p.last_name
             FROM location_person lp
             INNER JOIN person p ON lp.person_id = p.id
             INNER JOIN location l ON lp.location_id = l.id
             WHERE ?1 IS NULL OR l.chng_time >= ?1
             ORDER BY lp.location_id ASC, p.id ASC",
        )
        .context("failed to prepare location persons query")?;
    let rows = stmt
        .query_map(params![change_time], |row| {
            Ok((LocationId(row.get(0)?), read_person_row(row, 1)?))
        })
        .context("failed to query location persons")?;

    let mut persons: BTreeMap<LocationId, Vec<Person>> = BTreeMap::new();
    for row in rows {
        let (location_id, person) = row.context("failed to read location person row")?;
        persons.entry(location_id).or_default().push(person);
    }
    Ok(persons)
}

fn insert_associations(conn: &Connection, id: LocationId, draft: &LocationDraft) -> Result<()> {
    for person in draft.distinct_persons() {
        let person_id =
            registry::find_or_create_person(conn, &person.first_name, &person.last_name)?;
        conn.execute(
            "INSERT INTO location_person(location_id, person_id) VALUES (?1, ?2)",
            params![id.0, person_id.0],
        )
        .with_context(|| format!("failed to associate person {person_id} with location {id}"))?;
    }
    Ok(())
}
