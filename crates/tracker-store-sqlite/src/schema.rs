//! Schema bootstrap and sequential numbered upgrades.
//!
//! The stored version lives in `setting(key = 'db_version')`. A database without
//! a `setting` table is version 0 and receives the create script first.

use anyhow::{anyhow, bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const LATEST_SCHEMA_VERSION: i64 = 2;

const CREATE_SQL: &str = r"
CREATE TABLE IF NOT EXISTS setting (
  key TEXT PRIMARY KEY NOT NULL,
  value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS location (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  chng_time INTEGER NOT NULL,
  name TEXT NOT NULL DEFAULT '',
  time TEXT NOT NULL,
  lat REAL NOT NULL,
  lng REAL NOT NULL,
  description TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS person (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  first_name TEXT NOT NULL,
  last_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS location_person (
  location_id INTEGER NOT NULL,
  person_id INTEGER NOT NULL,
  FOREIGN KEY (location_id) REFERENCES location(id),
  FOREIGN KEY (person_id) REFERENCES person(id)
);

CREATE TABLE IF NOT EXISTS deleted_location (
  id INTEGER NOT NULL,
  del_time INTEGER NOT NULL
);

INSERT OR REPLACE INTO setting(key, value) VALUES ('db_version', '1');
";

// Duplicate persons are folded onto the lowest id of their case-insensitive
// name pair before the unique index can be created.
const UPGRADE_V2_SQL: &str = r"
UPDATE location_person SET person_id = (
  SELECT MIN(p2.id)
  FROM person p1
  JOIN person p2
    ON p2.first_name = p1.first_name COLLATE NOCASE
   AND p2.last_name = p1.last_name COLLATE NOCASE
  WHERE p1.id = location_person.person_id
);

DELETE FROM location_person
WHERE rowid NOT IN (
  SELECT MIN(rowid) FROM location_person GROUP BY location_id, person_id
);

DELETE FROM person
WHERE id NOT IN (
  SELECT MIN(id) FROM person GROUP BY first_name COLLATE NOCASE, last_name COLLATE NOCASE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_person_name
  ON person(first_name COLLATE NOCASE, last_name COLLATE NOCASE);
CREATE UNIQUE INDEX IF NOT EXISTS idx_location_person_pair
  ON location_person(location_id, person_id);
CREATE INDEX IF NOT EXISTS idx_location_person_person ON location_person(person_id);
CREATE INDEX IF NOT EXISTS idx_location_chng_time ON location(chng_time);
CREATE INDEX IF NOT EXISTS idx_location_time ON location(time);
CREATE INDEX IF NOT EXISTS idx_deleted_location_del_time ON deleted_location(del_time);
";

#[derive(Debug, Clone, Copy)]
struct Upgrade {
    version: i64,
    sql: &'static str,
}

const UPGRADES: &[Upgrade] = &[Upgrade { version: 2, sql: UPGRADE_V2_SQL }];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

pub(crate) fn status(conn: &Connection) -> Result<SchemaStatus> {
    let current_version = current_version(conn)?;
    let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
        ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
    } else {
        Vec::new()
    };

    Ok(SchemaStatus {
        current_version,
        target_version: LATEST_SCHEMA_VERSION,
        pending_versions,
    })
}

pub(crate) fn migrate(conn: &mut Connection) -> Result<()> {
    let mut version = current_version(conn)?;

    if version > LATEST_SCHEMA_VERSION {
        bail!("unsupported schema version {version}; this binary supports up to {LATEST_SCHEMA_VERSION}");
    }

    if version == 0 {
        info!("creating database schema");
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start schema create transaction")?;
        tx.execute_batch(CREATE_SQL).context("failed to apply schema create script")?;
        tx.commit().context("failed to commit schema create")?;
        version = 1;
    }

    for upgrade in UPGRADES {
        if upgrade.version <= version {
            continue;
        }

        info!(from_version = version, to_version = upgrade.version, "applying schema upgrade");
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .with_context(|| format!("failed to start upgrade v{} transaction", upgrade.version))?;
        tx.execute_batch(upgrade.sql)
            .with_context(|| format!("failed to apply upgrade v{}", upgrade.version))?;
        record_version(&tx, upgrade.version)?;
        tx.commit().with_context(|| format!("failed to commit upgrade v{}", upgrade.version))?;
        version = upgrade.version;
    }

    let recorded = current_version(conn)?;
    if recorded != LATEST_SCHEMA_VERSION {
        return Err(anyhow!(
            "schema version {recorded} after migration; expected {LATEST_SCHEMA_VERSION}"
        ));
    }

    Ok(())
}

fn current_version(conn: &Connection) -> Result<i64> {
    if !table_exists(conn, "setting")? {
        return Ok(0);
    }

    let raw = conn
        .query_row("SELECT value FROM setting WHERE key = 'db_version'", [], |row| {
            row.get::<_, String>(0)
        })
        .optional()
        .context("failed to read db_version setting")?
        .ok_or_else(|| anyhow!("database schema is invalid: setting table has no db_version"))?;

    raw.trim()
        .parse::<i64>()
        .with_context(|| format!("database schema is invalid: db_version `{raw}` is not an integer"))
}

fn record_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "UPDATE setting SET value = ?1 WHERE key = 'db_version'",
        params![version.to_string()],
    )
    .with_context(|| format!("failed to record schema version {version}"))?;
    Ok(())
}

pub(crate) fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

#[cfg(test)]
pub(crate) const CREATE_V1_SQL_FOR_TESTS: &str = CREATE_SQL;
