//! Schema migrations, tracked through `PRAGMA user_version`.
//!
//! Each database has its own ordered registry; versions must stay monotonic.

use crate::error::{StoreError, StoreResult};
use rusqlite::Connection;

#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub sql: &'static str,
}

pub const CATALOG_MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: include_str!("0001_catalog.sql"),
}];

pub const FACE_MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: include_str!("0001_faces.sql"),
}];

pub fn latest_version(migrations: &[Migration]) -> u32 {
    migrations.last().map_or(0, |m| m.version)
}

/// Apply every migration newer than the database, in one transaction.
pub fn apply_migrations(conn: &mut Connection, migrations: &[Migration]) -> StoreResult<()> {
    let current = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    let latest = latest_version(migrations);

    if current > latest {
        return Err(StoreError::UnsupportedSchemaVersion {
            db_version: current,
            latest_supported: latest,
        });
    }
    if current == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in migrations.iter().filter(|m| m.version > current) {
        tx.execute_batch(migration.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
    }
    tx.commit()?;

    tracing::info!(from = current, to = latest, "applied schema migrations");
    Ok(())
}
