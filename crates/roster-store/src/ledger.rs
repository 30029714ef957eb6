//! Attendance ledger: one status per (course, student, date).
//!
//! The key is a UNIQUE index and every write is a single
//! `INSERT … ON CONFLICT DO UPDATE`, so concurrent writers can neither create
//! a second row nor interleave a read with a write.

use crate::error::{is_foreign_key_violation, StoreError, StoreResult};
use chrono::{NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Storage and wire format of attendance dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "late" => Ok(AttendanceStatus::Late),
            "excused" => Ok(AttendanceStatus::Excused),
            other => Err(StoreError::InvalidInput(format!("unknown attendance status `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    pub course_id: i64,
    pub student_id: i64,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    /// RFC 3339 UTC time of the last write.
    pub recorded_at: String,
}

/// One catalog student in a course/date summary. `status` is `None` when
/// nothing was recorded, which readers treat as unknown/absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryRow {
    pub student_id: i64,
    pub roll_code: String,
    pub first_name: String,
    pub last_name: String,
    pub status: Option<AttendanceStatus>,
}

pub struct Ledger<'conn> {
    conn: &'conn Connection,
}

impl<'conn> Ledger<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Insert or overwrite the status for `(course_id, student_id, date)`.
    pub fn upsert(
        &self,
        course_id: i64,
        student_id: i64,
        date: NaiveDate,
        status: AttendanceStatus,
    ) -> StoreResult<AttendanceRecord> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let recorded_at: String = self
            .conn
            .query_row(
                "INSERT INTO attendance (course_id, student_id, date, status, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (course_id, student_id, date)
                 DO UPDATE SET status = excluded.status, recorded_at = excluded.recorded_at
                 RETURNING recorded_at",
                params![
                    course_id,
                    student_id,
                    date.format(DATE_FORMAT).to_string(),
                    status.as_str(),
                    now
                ],
                |row| row.get(0),
            )
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    StoreError::UnknownReference(format!("course {course_id} or student {student_id}"))
                } else {
                    e.into()
                }
            })?;

        tracing::info!(course_id, student_id, %date, %status, "attendance recorded");
        Ok(AttendanceRecord {
            course_id,
            student_id,
            date,
            status,
            recorded_at,
        })
    }

    pub fn get(
        &self,
        course_id: i64,
        student_id: i64,
        date: NaiveDate,
    ) -> StoreResult<Option<AttendanceRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT status, recorded_at FROM attendance
                 WHERE course_id = ?1 AND student_id = ?2 AND date = ?3",
                params![course_id, student_id, date.format(DATE_FORMAT).to_string()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        row.map(|(status, recorded_at)| {
            Ok(AttendanceRecord {
                course_id,
                student_id,
                date,
                status: stored_status(&status)?,
                recorded_at,
            })
        })
        .transpose()
    }

    /// Every catalog student once, by roll code, with their status for the day.
    pub fn summary(&self, course_id: i64, date: NaiveDate) -> StoreResult<Vec<SummaryRow>> {
        let course_exists: bool = self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM courses WHERE id = ?1)",
            [course_id],
            |row| row.get(0),
        )?;
        if !course_exists {
            return Err(StoreError::NotFound(format!("course {course_id}")));
        }

        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.roll_code, s.first_name, s.last_name, a.status
             FROM students s
             LEFT JOIN attendance a
                ON a.student_id = s.id AND a.course_id = ?1 AND a.date = ?2
             ORDER BY s.roll_code, s.id",
        )?;
        let rows = stmt
            .query_map(params![course_id, date.format(DATE_FORMAT).to_string()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(student_id, roll_code, first_name, last_name, status)| {
                Ok(SummaryRow {
                    student_id,
                    roll_code,
                    first_name,
                    last_name,
                    status: status.as_deref().map(stored_status).transpose()?,
                })
            })
            .collect()
    }
}

fn stored_status(raw: &str) -> StoreResult<AttendanceStatus> {
    raw.parse()
        .map_err(|_| StoreError::InvalidData(format!("attendance status `{raw}`")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse() {
        assert_eq!("Present".parse::<AttendanceStatus>().unwrap(), AttendanceStatus::Present);
        assert_eq!(" late ".parse::<AttendanceStatus>().unwrap(), AttendanceStatus::Late);
        assert!(matches!(
            "tardy".parse::<AttendanceStatus>(),
            Err(StoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_status_display_matches_storage() {
        for status in [
            AttendanceStatus::Present,
            AttendanceStatus::Absent,
            AttendanceStatus::Late,
            AttendanceStatus::Excused,
        ] {
            assert_eq!(status.to_string().parse::<AttendanceStatus>().unwrap(), status);
        }
    }
}
