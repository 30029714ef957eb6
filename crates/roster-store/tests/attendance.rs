use chrono::NaiveDate;
use roster_store::{
    open_catalog, open_catalog_in_memory, AttendanceStatus, Catalog, Ledger, StoreError,
};
use rusqlite::Connection;
use std::sync::{Arc, Barrier};

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
}

fn count_rows(conn: &Connection, course_id: i64, student_id: i64, date: NaiveDate) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM attendance WHERE course_id = ?1 AND student_id = ?2 AND date = ?3",
        rusqlite::params![course_id, student_id, date.format("%Y-%m-%d").to_string()],
        |r| r.get(0),
    )
    .unwrap()
}

#[test]
fn upsert_overwrites_instead_of_duplicating() {
    let conn = open_catalog_in_memory().unwrap();
    let catalog = Catalog::new(&conn);
    let course = catalog.add_course("CS101", "Intro to CS").unwrap();
    let student = catalog.add_student("S-001", "Ada", "Lovelace").unwrap();
    let ledger = Ledger::new(&conn);

    ledger.upsert(course.id, student.id, day(18), AttendanceStatus::Present).unwrap();
    ledger.upsert(course.id, student.id, day(18), AttendanceStatus::Absent).unwrap();

    assert_eq!(count_rows(&conn, course.id, student.id, day(18)), 1);
    let record = ledger.get(course.id, student.id, day(18)).unwrap().unwrap();
    assert_eq!(record.status, AttendanceStatus::Absent);
}

#[test]
fn dates_and_courses_are_separate_keys() {
    let conn = open_catalog_in_memory().unwrap();
    let catalog = Catalog::new(&conn);
    let cs = catalog.add_course("CS101", "Intro to CS").unwrap();
    let ma = catalog.add_course("MA201", "Linear Algebra").unwrap();
    let student = catalog.add_student("S-001", "Ada", "Lovelace").unwrap();
    let ledger = Ledger::new(&conn);

    ledger.upsert(cs.id, student.id, day(18), AttendanceStatus::Present).unwrap();
    ledger.upsert(cs.id, student.id, day(19), AttendanceStatus::Late).unwrap();
    ledger.upsert(ma.id, student.id, day(18), AttendanceStatus::Excused).unwrap();

    assert_eq!(ledger.get(cs.id, student.id, day(18)).unwrap().unwrap().status, AttendanceStatus::Present);
    assert_eq!(ledger.get(cs.id, student.id, day(19)).unwrap().unwrap().status, AttendanceStatus::Late);
    assert_eq!(ledger.get(ma.id, student.id, day(18)).unwrap().unwrap().status, AttendanceStatus::Excused);
    assert!(ledger.get(ma.id, student.id, day(19)).unwrap().is_none());
}

#[test]
fn upsert_unknown_student_or_course() {
    let conn = open_catalog_in_memory().unwrap();
    let catalog = Catalog::new(&conn);
    let course = catalog.add_course("CS101", "Intro to CS").unwrap();
    let student = catalog.add_student("S-001", "Ada", "Lovelace").unwrap();
    let ledger = Ledger::new(&conn);

    let err = ledger.upsert(course.id, 404, day(18), AttendanceStatus::Present).unwrap_err();
    assert!(matches!(err, StoreError::UnknownReference(_)));
    let err = ledger.upsert(404, student.id, day(18), AttendanceStatus::Present).unwrap_err();
    assert!(matches!(err, StoreError::UnknownReference(_)));
}

#[test]
fn summary_lists_every_student_once() {
    let conn = open_catalog_in_memory().unwrap();
    let catalog = Catalog::new(&conn);
    let course = catalog.add_course("CS101", "Intro to CS").unwrap();
    let other = catalog.add_course("MA201", "Linear Algebra").unwrap();
    let c = catalog.add_student("S-003", "Grace", "Hopper").unwrap();
    let a = catalog.add_student("S-001", "Ada", "Lovelace").unwrap();
    let b = catalog.add_student("S-002", "Alan", "Turing").unwrap();
    let ledger = Ledger::new(&conn);

    ledger.upsert(course.id, a.id, day(18), AttendanceStatus::Present).unwrap();
    ledger.upsert(course.id, c.id, day(18), AttendanceStatus::Absent).unwrap();
    // Neither another day nor another course may leak into the summary.
    ledger.upsert(course.id, b.id, day(17), AttendanceStatus::Present).unwrap();
    ledger.upsert(other.id, b.id, day(18), AttendanceStatus::Present).unwrap();

    let rows = ledger.summary(course.id, day(18)).unwrap();
    let view: Vec<(&str, Option<AttendanceStatus>)> =
        rows.iter().map(|r| (r.roll_code.as_str(), r.status)).collect();
    assert_eq!(
        view,
        vec![
            ("S-001", Some(AttendanceStatus::Present)),
            ("S-002", None),
            ("S-003", Some(AttendanceStatus::Absent)),
        ]
    );
    assert_eq!(rows[1].first_name, "Alan");
}

#[test]
fn summary_of_unknown_course() {
    let conn = open_catalog_in_memory().unwrap();
    let err = Ledger::new(&conn).summary(7, day(18)).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[test]
fn concurrent_upserts_leave_one_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("attendance.db");

    let (course_id, student_id) = {
        let conn = open_catalog(&path).unwrap();
        let catalog = Catalog::new(&conn);
        let course = catalog.add_course("CS101", "Intro to CS").unwrap();
        let student = catalog.add_student("S-001", "Ada", "Lovelace").unwrap();
        (course.id, student.id)
    };

    let writers = 4;
    let barrier = Arc::new(Barrier::new(writers));
    let handles: Vec<_> = (0..writers)
        .map(|i| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let conn = open_catalog(&path).unwrap();
                let status = if i % 2 == 0 {
                    AttendanceStatus::Present
                } else {
                    AttendanceStatus::Absent
                };
                barrier.wait();
                for _ in 0..10 {
                    Ledger::new(&conn).upsert(course_id, student_id, day(18), status).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let conn = open_catalog(&path).unwrap();
    assert_eq!(count_rows(&conn, course_id, student_id, day(18)), 1);
}
