//! Person registry: one canonical row per case-insensitive name pair.
//!
//! Callers run these inside an `IMMEDIATE` transaction, so find-then-create is
//! serialized by the SQLite write lock; `idx_person_name` rejects anything that
//! slips past.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use tracker_core::PersonId;

pub(crate) fn find_person_id(
    conn: &Connection,
    first_name: &str,
    last_name: &str,
) -> Result<Option<PersonId>> {
    let id = conn
        .query_row(
            "SELECT MIN(id) FROM person
             WHERE first_name = ?1 COLLATE NOCASE AND last_name = ?2 COLLATE NOCASE",
            params![first_name, last_name],
            |row| row.get::<_, Option<i64>>(0),
        )
        .context("failed to query person id")?;
    Ok(id.map(PersonId))
}

pub(crate) fn create_person(conn: &Connection, first_name: &str, last_name: &str) -> Result<PersonId> {
    conn.execute(
        "INSERT INTO person(first_name, last_name) VALUES (?1, ?2)",
        params![first_name, last_name],
    )
    .context("failed to create person")?;
    Ok(PersonId(conn.last_insert_rowid()))
}

pub(crate) fn find_or_create_person(
    conn: &Connection,
    first_name: &str,
    last_name: &str,
) -> Result<PersonId> {
    if let Some(id) = find_person_id(conn, first_name, last_name)? {
        return Ok(id);
    }
    create_person(conn, first_name, last_name)
}
