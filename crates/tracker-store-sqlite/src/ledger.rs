//! Tombstones for deleted locations. Rows are never removed.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use tracker_core::LocationId;

pub(crate) fn record_deletion(conn: &Connection, id: LocationId, deletion_time: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO deleted_location(id, del_time) VALUES (?1, ?2)",
        params![id.0, deletion_time],
    )
    .with_context(|| format!("failed to insert tombstone for location {id}"))?;
    Ok(())
}

/// Ids deleted at or after `deletion_time`; `None` returns the full history.
pub(crate) fn deleted_ids_since(
    conn: &Connection,
    deletion_time: Option<i64>,
) -> Result<Vec<LocationId>> {
    let mut stmt = conn
        .prepare(
            "SELECT id FROM deleted_location
             WHERE ?1 IS NULL OR del_time >= ?1
             ORDER BY del_time ASC, id ASC",
        )
        .context("failed to prepare deleted location query")?;
    let rows = stmt
        .query_map(params![deletion_time], |row| row.get::<_, i64>(0))
        .context("failed to query deleted locations")?;

    let mut ids = Vec::new();
    for row in rows {
        ids.push(LocationId(row.context("failed to read deleted location row")?));
    }
    Ok(ids)
}
