use crate::config::{Config, LocatorKind};
use roster_core::detector::DetectorError;
use roster_core::frame::decode_image;
use roster_core::{
    Enrollment, FaceError, FaceLocator, FaceStore, MatchOutcome, ModelStats, ScrfdLocator,
    StudentId, WholeFrameLocator,
};
use roster_store::{open_faces, SqliteModelStore, StoreError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Face(#[from] FaceError),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("face locator unavailable: {0}")]
    Locator(#[from] DetectorError),
    #[error("face database: {0}")]
    Store(#[from] StoreError),
}

/// Locator chosen at startup from [`LocatorKind`].
pub type DynLocator = Box<dyn FaceLocator + Send>;

/// The store the daemon runs with.
pub type DaemonFaceStore = FaceStore<DynLocator, SqliteModelStore>;

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Enroll {
        image: Vec<u8>,
        student_id: StudentId,
        reply: oneshot::Sender<Result<Enrollment, EngineError>>,
    },
    Identify {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<MatchOutcome, EngineError>>,
    },
    Stats {
        reply: oneshot::Sender<ModelStats>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Enroll one encoded frame for `student_id`.
    pub async fn enroll(&self, image: Vec<u8>, student_id: StudentId) -> Result<Enrollment, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll {
                image,
                student_id,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Match one encoded frame against the enrolled faces.
    pub async fn identify(&self, image: Vec<u8>) -> Result<MatchOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Identify { image, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn stats(&self) -> Result<ModelStats, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Stats { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Load the configured locator and the persisted face model.
///
/// Fails fast if the detector model or the face database is unusable.
pub fn load_face_store(config: &Config) -> Result<DaemonFaceStore, EngineError> {
    let locator: DynLocator = match config.locator {
        LocatorKind::Scrfd => {
            let path = config.scrfd_model_path();
            let locator = ScrfdLocator::load(&path)?;
            tracing::info!(path = %path.display(), "SCRFD locator loaded");
            Box::new(locator)
        }
        LocatorKind::WholeFrame => {
            tracing::info!("using whole-frame locator; frames must be pre-cropped faces");
            Box::new(WholeFrameLocator)
        }
    };

    let conn = open_faces(&config.face_db_path)?;
    let store = FaceStore::open(locator, SqliteModelStore::new(conn), config.confidence_threshold)?;
    let stats = store.stats();
    tracing::info!(
        path = %config.face_db_path.display(),
        enrolled_students = stats.enrolled_students,
        samples = stats.samples,
        threshold = store.threshold(),
        "face model loaded"
    );
    Ok(store)
}

/// Move `store` onto a dedicated OS thread and serve requests until every
/// handle is dropped.
pub fn spawn_engine<L, S>(mut store: FaceStore<L, S>) -> Result<EngineHandle, EngineError>
where
    L: FaceLocator + Send + 'static,
    S: roster_core::ModelStore + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("roster-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll {
                        image,
                        student_id,
                        reply,
                    } => {
                        let result = run_enroll(&mut store, &image, student_id);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Identify { image, reply } => {
                        let result = run_identify(&mut store, &image);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Stats { reply } => {
                        let _ = reply.send(store.stats());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn run_enroll<L: FaceLocator, S: roster_core::ModelStore>(
    store: &mut FaceStore<L, S>,
    image: &[u8],
    student_id: StudentId,
) -> Result<Enrollment, EngineError> {
    let frame = decode_image(image).map_err(FaceError::from)?;
    match store.enroll(&frame, student_id) {
        Ok(enrollment) => Ok(enrollment),
        Err(e) => {
            tracing::warn!(student_id, error = %e, "enroll rejected");
            Err(e.into())
        }
    }
}

fn run_identify<L: FaceLocator, S: roster_core::ModelStore>(
    store: &mut FaceStore<L, S>,
    image: &[u8],
) -> Result<MatchOutcome, EngineError> {
    let frame = decode_image(image).map_err(FaceError::from)?;
    let outcome = store.identify(&frame)?;
    match &outcome {
        MatchOutcome::Matched {
            student_id,
            label,
            confidence,
        } => tracing::info!(student_id, %label, confidence, "face recognized"),
        MatchOutcome::Rejected(reason) => tracing::info!(?reason, "no match"),
    }
    Ok(outcome)
}
