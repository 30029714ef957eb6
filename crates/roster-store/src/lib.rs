//! roster-store: SQLite persistence for Roster.
//!
//! Two databases: the catalog (students, courses, attendance ledger) and the
//! face model (label map + LBPH samples) owned by the enrollment store.

pub mod catalog;
pub mod db;
pub mod error;
pub mod face_model;
pub mod ledger;

pub use catalog::{Catalog, Course, Student};
pub use db::{bootstrap_catalog, open_catalog, open_catalog_in_memory, open_faces, open_faces_in_memory};
pub use error::{StoreError, StoreResult};
pub use face_model::SqliteModelStore;
pub use ledger::{AttendanceRecord, AttendanceStatus, Ledger, SummaryRow, DATE_FORMAT};
