use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database schema version {db_version} is newer than supported {latest_supported}")]
    UnsupportedSchemaVersion { db_version: u32, latest_supported: u32 },
    #[error("{0} already exists")]
    Duplicate(String),
    #[error("unknown {0}")]
    UnknownReference(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
}

impl StoreError {
    /// Caller supplied something wrong, as opposed to a storage failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StoreError::Duplicate(_)
                | StoreError::UnknownReference(_)
                | StoreError::NotFound(_)
                | StoreError::InvalidInput(_)
        )
    }
}

/// Whether `err` is the SQLite constraint failure with the given extended code.
pub(crate) fn is_constraint(err: &rusqlite::Error, extended_code: std::os::raw::c_int) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.extended_code == extended_code)
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    is_constraint(err, rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE)
}

pub(crate) fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    is_constraint(err, rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY)
}
