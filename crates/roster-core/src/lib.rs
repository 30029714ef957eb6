//! roster-core: Face enrollment and recognition for attendance check-in.
//!
//! Locates faces with SCRFD (ONNX Runtime) or treats pre-cropped frames as a
//! single face, describes them with LBPH histograms, and keeps the label map
//! that ties model labels to students.

pub mod detector;
pub mod enrollment;
pub mod frame;
pub mod labels;
pub mod lbph;
pub mod types;

pub use detector::{FaceLocator, ScrfdLocator, WholeFrameLocator};
pub use enrollment::{
    Enrollment, FaceError, FaceErrorKind, FaceStore, ModelSnapshot, ModelStore, PendingSample,
    DEFAULT_CONFIDENCE_THRESHOLD,
};
pub use labels::LabelMap;
pub use lbph::{Histogram, LbphModel};
pub use types::{BoundingBox, Label, MatchOutcome, ModelState, ModelStats, NoMatch, StudentId};
