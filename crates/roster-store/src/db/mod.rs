//! Connection bootstrap for the catalog and face-model databases.
//!
//! Returned connections have `foreign_keys=ON`, a busy timeout, and all
//! migrations applied.

pub mod migrations;

use crate::error::{StoreError, StoreResult};
use migrations::{apply_migrations, Migration, CATALOG_MIGRATIONS, FACE_MIGRATIONS};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (creating if needed) the catalog + attendance database.
pub fn open_catalog(path: impl AsRef<Path>) -> StoreResult<Connection> {
    open_file(path.as_ref(), "catalog", CATALOG_MIGRATIONS)
}

pub fn open_catalog_in_memory() -> StoreResult<Connection> {
    open_memory("catalog", CATALOG_MIGRATIONS)
}

/// Prepare a connection opened elsewhere (e.g. by `tokio-rusqlite`) as a catalog.
pub fn bootstrap_catalog(conn: &mut Connection) -> StoreResult<()> {
    bootstrap(conn, CATALOG_MIGRATIONS)
}

/// Open (creating if needed) the face model database.
pub fn open_faces(path: impl AsRef<Path>) -> StoreResult<Connection> {
    open_file(path.as_ref(), "faces", FACE_MIGRATIONS)
}

pub fn open_faces_in_memory() -> StoreResult<Connection> {
    open_memory("faces", FACE_MIGRATIONS)
}

fn open_file(path: &Path, db: &'static str, migrations: &[Migration]) -> StoreResult<Connection> {
    let started = Instant::now();
    let result = Connection::open(path)
        .map_err(StoreError::from)
        .and_then(|mut conn| bootstrap(&mut conn, migrations).map(|()| conn));
    match &result {
        Ok(_) => tracing::info!(
            db,
            path = %path.display(),
            duration_ms = started.elapsed().as_millis() as u64,
            "database opened"
        ),
        Err(e) => tracing::error!(db, path = %path.display(), error = %e, "database open failed"),
    }
    result
}

fn open_memory(db: &'static str, migrations: &[Migration]) -> StoreResult<Connection> {
    let mut conn = Connection::open_in_memory()?;
    bootstrap(&mut conn, migrations)?;
    tracing::debug!(db, "in-memory database opened");
    Ok(conn)
}

fn bootstrap(conn: &mut Connection, migrations: &[Migration]) -> StoreResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    apply_migrations(conn, migrations)
}
