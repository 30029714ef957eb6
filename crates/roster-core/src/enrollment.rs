//! Enrollment store: the LBPH model, its label map, and their persistence.
//!
//! [`FaceStore`] is a plain owned struct. It is not `Sync`-shared; the daemon
//! keeps it on one thread so every enroll is a serialized read-modify-write.
//!
//! Durable state changes before in-memory state: an enrollment is committed
//! through [`ModelStore::commit`] first, and only a successful commit touches
//! the model and label map. A failed commit leaves both exactly as they were.

use crate::detector::{DetectorError, FaceLocator};
use crate::frame::{self, FrameError};
use crate::labels::LabelMap;
use crate::lbph::{Histogram, LbphError, LbphModel};
use crate::types::{Label, MatchOutcome, ModelState, ModelStats, NoMatch, StudentId};
use image::RgbImage;
use thiserror::Error;

/// Distance below which a prediction is accepted.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 70.0;

#[derive(Error, Debug)]
pub enum FaceError {
    #[error("invalid image: {0}")]
    Frame(#[from] FrameError),
    #[error("face locator failed: {0}")]
    Locator(#[from] DetectorError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("{0} faces detected, expected one")]
    MultipleFacesDetected(usize),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] LbphError),
    #[error("failed to persist face model: {0}")]
    Persist(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Coarse grouping of [`FaceError`] for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceErrorKind {
    /// Zero or several faces; the caller should retake the frame.
    UnusableSample,
    /// The payload or crop could not be turned into a face sample.
    InvalidImage,
    /// The model could not be saved; nothing was enrolled.
    Persistence,
    Internal,
}

impl FaceError {
    pub fn kind(&self) -> FaceErrorKind {
        match self {
            FaceError::NoFaceDetected | FaceError::MultipleFacesDetected(_) => {
                FaceErrorKind::UnusableSample
            }
            FaceError::Frame(_) | FaceError::Recognizer(LbphError::FaceTooSmall { .. }) => {
                FaceErrorKind::InvalidImage
            }
            FaceError::Persist(_) => FaceErrorKind::Persistence,
            FaceError::Locator(_) | FaceError::Recognizer(_) => FaceErrorKind::Internal,
        }
    }

    /// Message safe to return to a client. Both face-count failures read the same.
    pub fn public_message(&self) -> String {
        match self.kind() {
            FaceErrorKind::UnusableSample => "no face detected or multiple faces detected".into(),
            FaceErrorKind::InvalidImage => format!("could not process image: {self}"),
            FaceErrorKind::Persistence => "could not save face model".into(),
            FaceErrorKind::Internal => "face processing failed".into(),
        }
    }
}

/// Everything a [`ModelStore`] has persisted.
#[derive(Debug, Default)]
pub struct ModelSnapshot {
    pub labels: Vec<(Label, StudentId)>,
    pub samples: Vec<(Label, Histogram)>,
}

/// One enrollment to make durable.
#[derive(Debug)]
pub struct PendingSample<'a> {
    pub label: Label,
    pub student_id: StudentId,
    /// The label is being allocated by this enrollment.
    pub new_label: bool,
    pub histogram: &'a Histogram,
}

/// Durable storage for the model and its label map.
///
/// `commit` must be all-or-nothing: after a crash the store holds either the
/// previous snapshot or the previous snapshot plus this sample (and label).
pub trait ModelStore {
    fn load(&mut self) -> Result<ModelSnapshot, Box<dyn std::error::Error + Send + Sync>>;
    fn commit(
        &mut self,
        sample: &PendingSample<'_>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Result of a successful enrollment.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrollment {
    pub student_id: StudentId,
    pub label: Label,
    /// First enrollment of this student.
    pub new_label: bool,
}

pub struct FaceStore<L, S> {
    locator: L,
    store: S,
    model: LbphModel,
    labels: LabelMap,
    threshold: f64,
}

impl<L: FaceLocator, S: ModelStore> FaceStore<L, S> {
    /// Load the persisted model and label map from `store`.
    pub fn open(locator: L, mut store: S, threshold: f64) -> Result<Self, FaceError> {
        let snapshot = store.load().map_err(FaceError::Persist)?;
        let labels = LabelMap::from_pairs(snapshot.labels);

        let orphaned = snapshot
            .samples
            .iter()
            .filter(|(label, _)| labels.student_of(*label).is_none())
            .count();
        if orphaned > 0 {
            tracing::warn!(orphaned, "face samples reference labels missing from the label map");
        }

        let mut model = LbphModel::new();
        model.train(snapshot.samples);
        tracing::info!(
            students = labels.len(),
            samples = model.len(),
            threshold,
            "face store loaded"
        );

        Ok(Self {
            locator,
            store,
            model,
            labels,
            threshold,
        })
    }

    /// Register one face sample for `student_id`.
    ///
    /// The frame must contain exactly one face. A student keeps the label of
    /// their first enrollment; later samples extend the model under it.
    pub fn enroll(&mut self, image: &RgbImage, student_id: StudentId) -> Result<Enrollment, FaceError> {
        let histogram = self.single_face_histogram(image)?;

        let (label, new_label) = match self.labels.label_of(student_id) {
            Some(label) => (label, false),
            None => (self.labels.next_label(), true),
        };

        self.store
            .commit(&PendingSample {
                label,
                student_id,
                new_label,
                histogram: &histogram,
            })
            .map_err(|e| {
                tracing::error!(student_id, %label, error = %e, "face model commit failed");
                FaceError::Persist(e)
            })?;

        if new_label {
            self.labels.insert(label, student_id);
        }
        if self.model.is_empty() {
            self.model.train(vec![(label, histogram)]);
        } else {
            self.model.update(vec![(label, histogram)]);
        }

        tracing::info!(student_id, %label, new_label, samples = self.model.len(), "enrolled face sample");
        Ok(Enrollment {
            student_id,
            label,
            new_label,
        })
    }

    /// Match a frame against the enrolled faces, keeping the rejection reason.
    pub fn identify(&mut self, image: &RgbImage) -> Result<MatchOutcome, FaceError> {
        let histogram = match self.single_face_histogram(image) {
            Ok(histogram) => histogram,
            Err(FaceError::NoFaceDetected) => return Ok(MatchOutcome::Rejected(NoMatch::NoFace)),
            Err(FaceError::MultipleFacesDetected(n)) => {
                return Ok(MatchOutcome::Rejected(NoMatch::MultipleFaces(n)))
            }
            Err(e) => return Err(e),
        };

        let outcome = match self.model.predict(&histogram) {
            None => MatchOutcome::Rejected(NoMatch::EmptyModel),
            Some((label, confidence)) if confidence >= self.threshold => {
                MatchOutcome::Rejected(NoMatch::AboveThreshold { label, confidence })
            }
            Some((label, confidence)) => match self.labels.student_of(label) {
                Some(student_id) => MatchOutcome::Matched {
                    student_id,
                    label,
                    confidence,
                },
                None => MatchOutcome::Rejected(NoMatch::StaleLabel { label, confidence }),
            },
        };

        tracing::debug!(?outcome, "identify");
        Ok(outcome)
    }

    /// The enrolled student in `image`, if any.
    pub fn recognize(&mut self, image: &RgbImage) -> Result<Option<StudentId>, FaceError> {
        Ok(self.identify(image)?.student_id())
    }

    pub fn label_of(&self, student_id: StudentId) -> Option<Label> {
        self.labels.label_of(student_id)
    }

    pub fn enrolled_students(&self) -> Vec<StudentId> {
        self.labels.students().collect()
    }

    pub fn model_store(&self) -> &S {
        &self.store
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn stats(&self) -> ModelStats {
        ModelStats {
            enrolled_students: self.labels.len(),
            samples: self.model.len(),
            state: if self.model.is_empty() {
                ModelState::Empty
            } else {
                ModelState::Trained
            },
        }
    }

    fn single_face_histogram(&mut self, image: &RgbImage) -> Result<Histogram, FaceError> {
        let faces = self.locator.locate(image)?;
        let face = match faces.as_slice() {
            [] => return Err(FaceError::NoFaceDetected),
            [face] => face,
            many => return Err(FaceError::MultipleFacesDetected(many.len())),
        };
        let gray = frame::face_region(image, face)?;
        Ok(Histogram::from_face(&gray)?)
    }
}
