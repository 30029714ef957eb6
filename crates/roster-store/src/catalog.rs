//! Students and courses. Create and read only; nothing is updated or deleted,
//! so a roll code never changes once attendance points at it.

use crate::error::{is_unique_violation, StoreError, StoreResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Student {
    pub id: i64,
    pub roll_code: String,
    pub first_name: String,
    pub last_name: String,
}

impl Student {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            roll_code: row.get(1)?,
            first_name: row.get(2)?,
            last_name: row.get(3)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Course {
    pub id: i64,
    pub course_code: String,
    pub course_name: String,
}

impl Course {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            course_code: row.get(1)?,
            course_name: row.get(2)?,
        })
    }
}

pub struct Catalog<'conn> {
    conn: &'conn Connection,
}

impl<'conn> Catalog<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn add_student(&self, roll_code: &str, first_name: &str, last_name: &str) -> StoreResult<Student> {
        let roll_code = required("roll code", roll_code)?;
        let first_name = required("first name", first_name)?;
        let last_name = required("last name", last_name)?;

        self.conn
            .execute(
                "INSERT INTO students (roll_code, first_name, last_name) VALUES (?1, ?2, ?3)",
                params![roll_code, first_name, last_name],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Duplicate(format!("student with roll code {roll_code}"))
                } else {
                    e.into()
                }
            })?;

        let student = Student {
            id: self.conn.last_insert_rowid(),
            roll_code: roll_code.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        };
        tracing::info!(student_id = student.id, roll_code, "student added");
        Ok(student)
    }

    pub fn add_course(&self, course_code: &str, course_name: &str) -> StoreResult<Course> {
        let course_code = required("course code", course_code)?;
        let course_name = required("course name", course_name)?;

        self.conn
            .execute(
                "INSERT INTO courses (course_code, course_name) VALUES (?1, ?2)",
                params![course_code, course_name],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Duplicate(format!("course {course_code}"))
                } else {
                    e.into()
                }
            })?;

        let course = Course {
            id: self.conn.last_insert_rowid(),
            course_code: course_code.to_string(),
            course_name: course_name.to_string(),
        };
        tracing::info!(course_id = course.id, course_code, "course added");
        Ok(course)
    }

    pub fn list_students(&self) -> StoreResult<Vec<Student>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, roll_code, first_name, last_name FROM students ORDER BY id")?;
        let students = stmt
            .query_map([], Student::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(students)
    }

    pub fn list_courses(&self) -> StoreResult<Vec<Course>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, course_code, course_name FROM courses ORDER BY id")?;
        let courses = stmt
            .query_map([], Course::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(courses)
    }

    pub fn get_student(&self, id: i64) -> StoreResult<Option<Student>> {
        let student = self
            .conn
            .query_row(
                "SELECT id, roll_code, first_name, last_name FROM students WHERE id = ?1",
                [id],
                Student::from_row,
            )
            .optional()?;
        Ok(student)
    }

    pub fn get_course(&self, id: i64) -> StoreResult<Option<Course>> {
        let course = self
            .conn
            .query_row(
                "SELECT id, course_code, course_name FROM courses WHERE id = ?1",
                [id],
                Course::from_row,
            )
            .optional()?;
        Ok(course)
    }
}

fn required<'a>(field: &str, value: &'a str) -> StoreResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(StoreError::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(value)
}
