use serde::{Deserialize, Serialize};
use std::fmt;

/// Catalog id of a student (the `students.id` primary key).
pub type StudentId = i64;

/// Model-internal class label. Distinct from [`StudentId`]; starts at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label(pub u32);

impl Label {
    pub const FIRST: Label = Label(1);

    pub fn next(self) -> Label {
        Label(self.0 + 1)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Axis-aligned face rectangle in image pixels, with the detector's score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Clamp to an image of `width` × `height` and round to whole pixels.
    ///
    /// Returns `(x, y, w, h)`, or `None` when nothing of the box lies inside
    /// the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.max(0.0).round() as u32;
        let y0 = self.y.max(0.0).round() as u32;
        let x1 = ((self.x + self.width).round().max(0.0) as u32).min(width);
        let y1 = ((self.y + self.height).round().max(0.0) as u32).min(height);
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// Whether the LBPH model has ever been trained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    Empty,
    Trained,
}

/// Summary of the enrollment store, reported by the daemon's status call.
#[derive(Debug, Clone, Serialize)]
pub struct ModelStats {
    pub enrolled_students: usize,
    pub samples: usize,
    pub state: ModelState,
}

/// Why a recognition attempt produced no student.
#[derive(Debug, Clone, PartialEq)]
pub enum NoMatch {
    NoFace,
    MultipleFaces(usize),
    /// Nothing has been enrolled yet.
    EmptyModel,
    /// Nearest sample was too far away (`confidence >= threshold`).
    AboveThreshold { label: Label, confidence: f64 },
    /// The model predicted a label the label map does not know.
    StaleLabel { label: Label, confidence: f64 },
}

/// Result of matching one frame against the enrolled faces.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched {
        student_id: StudentId,
        label: Label,
        /// Chi-square distance to the nearest sample; lower is closer.
        confidence: f64,
    },
    Rejected(NoMatch),
}

impl MatchOutcome {
    pub fn student_id(&self) -> Option<StudentId> {
        match self {
            MatchOutcome::Matched { student_id, .. } => Some(*student_id),
            MatchOutcome::Rejected(_) => None,
        }
    }
}
