//! SQLite-backed [`ModelStore`]: the label map and LBPH samples live in one
//! database and each enrollment is a single transaction, so the two can never
//! disagree after a crash.

use crate::error::{StoreError, StoreResult};
use chrono::{SecondsFormat, Utc};
use roster_core::{Histogram, Label, ModelSnapshot, ModelStore, PendingSample, StudentId};
use rusqlite::{params, Connection};

pub struct SqliteModelStore {
    conn: Connection,
}

impl SqliteModelStore {
    /// Wrap a connection returned by [`crate::open_faces`] or
    /// [`crate::open_faces_in_memory`].
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn load_snapshot(&self) -> StoreResult<ModelSnapshot> {
        let mut stmt = self
            .conn
            .prepare("SELECT label, student_id FROM face_labels ORDER BY label")?;
        let labels = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, StudentId>(1)?)))?
            .map(|row| {
                let (label, student_id) = row?;
                Ok((to_label(label)?, student_id))
            })
            .collect::<StoreResult<Vec<_>>>()?;

        let mut stmt = self
            .conn
            .prepare("SELECT label, histogram FROM face_samples ORDER BY id")?;
        let samples = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)))?
            .map(|row| {
                let (label, blob) = row?;
                let histogram = Histogram::from_bytes(&blob)
                    .map_err(|e| StoreError::InvalidData(format!("sample for label {label}: {e}")))?;
                Ok((to_label(label)?, histogram))
            })
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(ModelSnapshot { labels, samples })
    }

    pub fn commit_sample(&mut self, sample: &PendingSample<'_>) -> StoreResult<()> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let tx = self.conn.transaction()?;
        if sample.new_label {
            tx.execute(
                "INSERT INTO face_labels (label, student_id, enrolled_at) VALUES (?1, ?2, ?3)",
                params![sample.label.0, sample.student_id, now],
            )?;
        }
        tx.execute(
            "INSERT INTO face_samples (label, histogram, created_at) VALUES (?1, ?2, ?3)",
            params![sample.label.0, sample.histogram.to_bytes(), now],
        )?;
        tx.commit()?;

        tracing::debug!(
            label = sample.label.0,
            student_id = sample.student_id,
            new_label = sample.new_label,
            "face sample committed"
        );
        Ok(())
    }
}

impl ModelStore for SqliteModelStore {
    fn load(&mut self) -> Result<ModelSnapshot, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.load_snapshot()?)
    }

    fn commit(
        &mut self,
        sample: &PendingSample<'_>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.commit_sample(sample)?)
    }
}

fn to_label(raw: i64) -> StoreResult<Label> {
    u32::try_from(raw)
        .ok()
        .filter(|&v| v >= 1)
        .map(Label)
        .ok_or_else(|| StoreError::InvalidData(format!("face label {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_faces_in_memory;
    use image::{GrayImage, Luma};

    fn histogram(shade: u8) -> Histogram {
        let face = GrayImage::from_fn(34, 34, |x, _| Luma([shade.wrapping_add((x * 3) as u8)]));
        Histogram::from_face(&face).unwrap()
    }

    fn count(store: &SqliteModelStore, table: &str) -> i64 {
        store
            .connection()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_commit_then_load() {
        let mut store = SqliteModelStore::new(open_faces_in_memory().unwrap());
        let h = histogram(10);
        store
            .commit_sample(&PendingSample { label: Label(1), student_id: 40, new_label: true, histogram: &h })
            .unwrap();
        store
            .commit_sample(&PendingSample { label: Label(1), student_id: 40, new_label: false, histogram: &h })
            .unwrap();

        let snapshot = store.load_snapshot().unwrap();
        assert_eq!(snapshot.labels, vec![(Label(1), 40)]);
        assert_eq!(snapshot.samples.len(), 2);
        assert_eq!(snapshot.samples[0].1, h);
    }

    #[test]
    fn test_second_label_for_student_is_refused() {
        let mut store = SqliteModelStore::new(open_faces_in_memory().unwrap());
        let h = histogram(10);
        store
            .commit_sample(&PendingSample { label: Label(1), student_id: 40, new_label: true, histogram: &h })
            .unwrap();
        let result = store.commit_sample(&PendingSample {
            label: Label(2),
            student_id: 40,
            new_label: true,
            histogram: &h,
        });
        assert!(result.is_err());
        assert_eq!(count(&store, "face_labels"), 1);
        assert_eq!(count(&store, "face_samples"), 1);
    }

    #[test]
    fn test_failed_sample_rolls_back_label() {
        let mut store = SqliteModelStore::new(open_faces_in_memory().unwrap());
        store.connection().execute_batch("DROP TABLE face_samples;").unwrap();

        let h = histogram(10);
        let result = store.commit_sample(&PendingSample {
            label: Label(1),
            student_id: 40,
            new_label: true,
            histogram: &h,
        });
        assert!(result.is_err());
        assert_eq!(count(&store, "face_labels"), 0);
    }

    #[test]
    fn test_corrupt_histogram_is_invalid_data() {
        let store = SqliteModelStore::new(open_faces_in_memory().unwrap());
        store
            .connection()
            .execute_batch(
                "INSERT INTO face_labels (label, student_id, enrolled_at) VALUES (1, 5, 'x');
                 INSERT INTO face_samples (label, histogram, created_at) VALUES (1, x'00010203', 'x');",
            )
            .unwrap();
        assert!(matches!(store.load_snapshot(), Err(StoreError::InvalidData(_))));
    }
}
