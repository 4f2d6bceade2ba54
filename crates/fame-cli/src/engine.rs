use fame_core::detector::DetectorError;
use fame_core::enrollment::{DetectionOutcome, DetectionRequest};
use fame_core::{FaceDetector, ScrfdDetector};
use std::path::Path;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("detector thread exited")]
    ChannelClosed,
}

/// Messages sent from the controlling task to the detector thread.
struct EngineRequest {
    request: DetectionRequest,
    reply: oneshot::Sender<DetectionOutcome>,
}

/// Clone-safe handle to the detector thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Run a detection request on the detector thread and wait for its outcome.
    pub async fn detect(&self, request: DetectionRequest) -> Result<DetectionOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Load the SCRFD model and spawn the detector on a dedicated OS thread.
///
/// Fails fast if the model cannot be loaded.
pub fn spawn_engine(scrfd_path: &Path) -> Result<EngineHandle, EngineError> {
    let detector = ScrfdDetector::load(scrfd_path)?;
    tracing::info!(path = %scrfd_path.display(), "SCRFD detector loaded");
    Ok(spawn_with(Box::new(detector)))
}

/// Spawn the request loop around an already constructed detector.
pub fn spawn_with(mut detector: Box<dyn FaceDetector + Send>) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("fame-detector".into())
        .spawn(move || {
            tracing::debug!("detector thread started");
            while let Some(EngineRequest { request, reply }) = rx.blocking_recv() {
                let outcome = request.run(detector.as_mut());
                // The receiver may have gone away (cancelled enrollment).
                let _ = reply.send(outcome);
            }
            tracing::debug!("detector thread exiting");
        })
        .expect("failed to spawn detector thread");

    EngineHandle { tx }
}
