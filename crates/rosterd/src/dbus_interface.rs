use crate::engine::{EngineError, EngineHandle};
use chrono::NaiveDate;
use roster_core::{FaceErrorKind, MatchOutcome, StudentId};
use roster_store::{
    bootstrap_catalog, AttendanceStatus, Catalog, Ledger, Student, StoreError, StoreResult,
    DATE_FORMAT,
};
use serde_json::json;
use zbus::fdo;
use zbus::interface;

/// D-Bus interface for the Roster attendance daemon.
///
/// Bus name: io.roster.Attendance1
/// Object path: /io/roster/Attendance1
pub struct RosterService {
    engine: EngineHandle,
    db: tokio_rusqlite::Connection,
}

impl RosterService {
    pub fn new(engine: EngineHandle, db: tokio_rusqlite::Connection) -> Self {
        Self { engine, db }
    }

    /// Open the catalog database and bring its schema up to date.
    pub async fn open_db(path: &std::path::Path) -> anyhow::Result<tokio_rusqlite::Connection> {
        let db = tokio_rusqlite::Connection::open(path).await?;
        db.call(|conn| Ok(bootstrap_catalog(conn))).await??;
        Ok(db)
    }

    /// Run `f` on the database thread.
    async fn with_db<T, F>(&self, f: F) -> fdo::Result<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.db
            .call(move |conn| Ok(f(conn)))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "database thread unavailable");
                fdo::Error::Failed("database unavailable".into())
            })?
            .map_err(store_error)
    }

    async fn student(&self, student_id: StudentId) -> fdo::Result<Option<Student>> {
        self.with_db(move |conn| Catalog::new(conn).get_student(student_id))
            .await
    }

    /// The enrolled student in `image`, or the no-match error.
    async fn recognized_student(&self, image: Vec<u8>) -> fdo::Result<Student> {
        let outcome = self.engine.identify(image).await.map_err(engine_error)?;
        let student_id = match outcome {
            MatchOutcome::Matched { student_id, .. } => student_id,
            MatchOutcome::Rejected(_) => return Err(no_match()),
        };
        match self.student(student_id).await? {
            Some(student) => Ok(student),
            None => {
                tracing::warn!(student_id, "recognized face belongs to a student missing from the catalog");
                Err(no_match())
            }
        }
    }
}

#[interface(name = "io.roster.Attendance1")]
impl RosterService {
    /// Add one face sample for an existing student.
    async fn enroll_face(&self, student_id: i64, image: Vec<u8>) -> fdo::Result<String> {
        tracing::info!(student_id, bytes = image.len(), "enroll requested");
        if self.student(student_id).await?.is_none() {
            return Err(fdo::Error::InvalidArgs(format!("unknown student {student_id}")));
        }
        let enrollment = self
            .engine
            .enroll(image, student_id)
            .await
            .map_err(engine_error)?;
        Ok(json!({
            "status": "success",
            "student_id": enrollment.student_id,
            "label": enrollment.label.0,
            "new_label": enrollment.new_label,
        })
        .to_string())
    }

    /// Identify the student in one frame.
    async fn recognize(&self, image: Vec<u8>) -> fdo::Result<String> {
        tracing::info!(bytes = image.len(), "recognize requested");
        let student = self.recognized_student(image).await?;
        Ok(json!({
            "status": "success",
            "student_id": student.id,
            "student_name": student.display_name(),
            "roll_code": student.roll_code,
        })
        .to_string())
    }

    /// Recognize the student in one frame and mark them present.
    async fn check_in(&self, course_id: i64, image: Vec<u8>, date: &str) -> fdo::Result<String> {
        let date = parse_date(date)?;
        tracing::info!(course_id, %date, "check-in requested");
        let student = self.recognized_student(image).await?;
        let student_id = student.id;
        let record = self
            .with_db(move |conn| {
                Ledger::new(conn).upsert(course_id, student_id, date, AttendanceStatus::Present)
            })
            .await?;
        Ok(json!({
            "status": "success",
            "student_id": student.id,
            "student_name": student.display_name(),
            "roll_code": student.roll_code,
            "record": record,
        })
        .to_string())
    }

    /// Set one student's status for a course and date.
    async fn record_attendance(
        &self,
        course_id: i64,
        student_id: i64,
        date: &str,
        status: &str,
    ) -> fdo::Result<String> {
        let date = parse_date(date)?;
        let status = parse_status(status)?;
        tracing::info!(course_id, student_id, %date, %status, "record attendance requested");
        let record = self
            .with_db(move |conn| Ledger::new(conn).upsert(course_id, student_id, date, status))
            .await?;
        Ok(json!({ "status": "success", "record": record }).to_string())
    }

    /// Every student with their status for a course and date.
    async fn attendance_summary(&self, course_id: i64, date: &str) -> fdo::Result<String> {
        let date = parse_date(date)?;
        let rows = self
            .with_db(move |conn| Ledger::new(conn).summary(course_id, date))
            .await?;
        to_json(&rows)
    }

    async fn add_student(&self, roll_code: &str, first_name: &str, last_name: &str) -> fdo::Result<i64> {
        let (roll_code, first_name, last_name) =
            (roll_code.to_owned(), first_name.to_owned(), last_name.to_owned());
        let student = self
            .with_db(move |conn| Catalog::new(conn).add_student(&roll_code, &first_name, &last_name))
            .await?;
        tracing::info!(id = student.id, roll_code = %student.roll_code, "student added");
        Ok(student.id)
    }

    async fn add_course(&self, course_code: &str, course_name: &str) -> fdo::Result<i64> {
        let (course_code, course_name) = (course_code.to_owned(), course_name.to_owned());
        let course = self
            .with_db(move |conn| Catalog::new(conn).add_course(&course_code, &course_name))
            .await?;
        tracing::info!(id = course.id, course_code = %course.course_code, "course added");
        Ok(course.id)
    }

    async fn list_students(&self) -> fdo::Result<String> {
        let students = self.with_db(|conn| Catalog::new(conn).list_students()).await?;
        to_json(&students)
    }

    async fn list_courses(&self) -> fdo::Result<String> {
        let courses = self.with_db(|conn| Catalog::new(conn).list_courses()).await?;
        to_json(&courses)
    }

    async fn get_course(&self, course_id: i64) -> fdo::Result<String> {
        let course = self
            .with_db(move |conn| {
                Catalog::new(conn)
                    .get_course(course_id)?
                    .ok_or_else(|| StoreError::NotFound(format!("course {course_id}")))
            })
            .await?;
        to_json(&course)
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        let stats = self.engine.stats().await.map_err(engine_error)?;
        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "enrolled_students": stats.enrolled_students,
            "samples": stats.samples,
            "model": stats.state,
        })
        .to_string())
    }
}

/// Empty means today in local time.
fn parse_date(raw: &str) -> fdo::Result<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(chrono::Local::now().date_naive());
    }
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|_| fdo::Error::InvalidArgs(format!("invalid date {raw:?}, expected YYYY-MM-DD")))
}

/// Empty means present.
fn parse_status(raw: &str) -> fdo::Result<AttendanceStatus> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(AttendanceStatus::Present);
    }
    raw.parse().map_err(store_error)
}

fn to_json<T: serde::Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(e.to_string()))
}

fn no_match() -> fdo::Error {
    fdo::Error::Failed("no matching student found".into())
}

fn store_error(e: StoreError) -> fdo::Error {
    if e.is_client_error() {
        fdo::Error::InvalidArgs(e.to_string())
    } else {
        tracing::error!(error = %e, "database error");
        fdo::Error::Failed("database error".into())
    }
}

fn engine_error(e: EngineError) -> fdo::Error {
    match e {
        EngineError::Face(face) => match face.kind() {
            FaceErrorKind::UnusableSample | FaceErrorKind::InvalidImage => {
                fdo::Error::InvalidArgs(face.public_message())
            }
            FaceErrorKind::Persistence | FaceErrorKind::Internal => {
                tracing::error!(error = %face, "face engine failure");
                fdo::Error::Failed(face.public_message())
            }
        },
        other => {
            tracing::error!(error = %other, "engine unavailable");
            fdo::Error::Failed(other.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use image::{ImageFormat, Rgb, RgbImage};
    use roster_core::{FaceStore, WholeFrameLocator, DEFAULT_CONFIDENCE_THRESHOLD};
    use roster_store::{open_faces_in_memory, SqliteModelStore};
    use serde_json::Value;
    use std::io::Cursor;

    fn png(image: &RgbImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn face_a() -> Vec<u8> {
        png(&RgbImage::from_fn(64, 64, |_, y| if y % 4 < 2 { Rgb([210, 190, 180]) } else { Rgb([40, 30, 30]) }))
    }

    fn face_b() -> Vec<u8> {
        png(&RgbImage::from_fn(64, 64, |x, _| if x % 4 < 2 { Rgb([220, 200, 170]) } else { Rgb([60, 40, 40]) }))
    }

    fn stranger() -> Vec<u8> {
        png(&RgbImage::from_fn(64, 64, |x, y| Rgb([((x + y) * 2) as u8; 3])))
    }

    async fn service() -> RosterService {
        let store = FaceStore::open(
            WholeFrameLocator,
            SqliteModelStore::new(open_faces_in_memory().unwrap()),
            DEFAULT_CONFIDENCE_THRESHOLD,
        )
        .unwrap();
        let db = tokio_rusqlite::Connection::open_in_memory().await.unwrap();
        db.call(|conn| Ok(bootstrap_catalog(conn))).await.unwrap().unwrap();
        RosterService::new(spawn_engine(store).unwrap(), db)
    }

    fn parse(json: &str) -> Value {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn test_enroll_then_check_in() {
        let svc = service().await;
        let course = svc.add_course("CS101", "Intro to CS").await.unwrap();
        let ada = svc.add_student("S-001", "Ada", "Lovelace").await.unwrap();
        let alan = svc.add_student("S-002", "Alan", "Turing").await.unwrap();

        let enrolled = parse(&svc.enroll_face(ada, face_a()).await.unwrap());
        assert_eq!(enrolled["label"], 1);
        assert_eq!(enrolled["new_label"], true);
        svc.enroll_face(alan, face_b()).await.unwrap();

        let hit = parse(&svc.recognize(face_b()).await.unwrap());
        assert_eq!(hit["student_id"], alan);
        assert_eq!(hit["student_name"], "Alan Turing");

        let checked = parse(&svc.check_in(course, face_a(), "2026-10-18").await.unwrap());
        assert_eq!(checked["roll_code"], "S-001");
        assert_eq!(checked["record"]["status"], "present");

        let summary = parse(&svc.attendance_summary(course, "2026-10-18").await.unwrap());
        assert_eq!(summary[0]["status"], "present");
        assert_eq!(summary[1]["status"], Value::Null);
    }

    #[tokio::test]
    async fn test_stranger_is_not_matched() {
        let svc = service().await;
        let ada = svc.add_student("S-001", "Ada", "Lovelace").await.unwrap();
        svc.enroll_face(ada, face_a()).await.unwrap();

        let err = svc.recognize(stranger()).await.unwrap_err();
        assert!(matches!(err, fdo::Error::Failed(ref m) if m == "no matching student found"));
    }

    #[tokio::test]
    async fn test_enroll_errors() {
        let svc = service().await;
        assert!(matches!(svc.enroll_face(9, face_a()).await, Err(fdo::Error::InvalidArgs(_))));

        let ada = svc.add_student("S-001", "Ada", "Lovelace").await.unwrap();
        let err = svc.enroll_face(ada, b"garbage".to_vec()).await.unwrap_err();
        assert!(matches!(err, fdo::Error::InvalidArgs(_)));
    }

    #[tokio::test]
    async fn test_record_defaults_and_overwrite() {
        let svc = service().await;
        let course = svc.add_course("CS101", "Intro to CS").await.unwrap();
        let ada = svc.add_student("S-001", "Ada", "Lovelace").await.unwrap();

        let first = parse(&svc.record_attendance(course, ada, "", "").await.unwrap());
        assert_eq!(first["record"]["status"], "present");
        svc.record_attendance(course, ada, "", "late").await.unwrap();

        let summary = parse(&svc.attendance_summary(course, "").await.unwrap());
        assert_eq!(summary.as_array().unwrap().len(), 1);
        assert_eq!(summary[0]["status"], "late");
    }

    #[tokio::test]
    async fn test_bad_arguments_are_invalid_args() {
        let svc = service().await;
        let course = svc.add_course("CS101", "Intro to CS").await.unwrap();
        let ada = svc.add_student("S-001", "Ada", "Lovelace").await.unwrap();

        let cases = [
            svc.record_attendance(course, ada, "18/10/2026", "").await,
            svc.record_attendance(course, ada, "", "asleep").await,
            svc.record_attendance(course, 404, "", "").await,
            svc.attendance_summary(404, "").await,
            svc.get_course(404).await,
        ];
        for result in cases {
            assert!(matches!(result, Err(fdo::Error::InvalidArgs(_))), "{result:?}");
        }
        assert!(matches!(svc.add_course("CS101", "Again").await, Err(fdo::Error::InvalidArgs(_))));
    }

    #[tokio::test]
    async fn test_status_reports_model() {
        let svc = service().await;
        let status = parse(&svc.status().await.unwrap());
        assert_eq!(status["enrolled_students"], 0);
        assert_eq!(status["model"], "empty");
    }
}
