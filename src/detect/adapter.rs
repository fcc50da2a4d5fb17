//! Detector adapter: frame in, face records out, frame always released.

use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::detect::registry::{BackendRegistry, SharedDetector};
use crate::detect::result::DetectedEntity;
use crate::error::PipelineError;
use crate::frame::{Frame, FrameInfo};

/// Faces found in one frame, plus the metadata of the frame they came from.
#[derive(Clone, Debug)]
pub struct Detection {
    pub frame: FrameInfo,
    pub entities: Vec<DetectedEntity>,
    /// Faces the backend reported with out-of-range values, left out of
    /// `entities`.
    pub rejected: usize,
    pub elapsed: Duration,
}

/// Wraps a face detector backend for use by the pipeline worker.
///
/// `detect` takes the frame by value. The frame is released when that call
/// returns, on every path: faces found, no image, backend error, backend
/// panic. There is no per-branch release code to forget.
#[derive(Clone)]
pub struct DetectorAdapter {
    backend: SharedDetector,
    name: &'static str,
}

impl DetectorAdapter {
    pub fn new(backend: SharedDetector) -> Result<Self> {
        let name = backend
            .lock()
            .map_err(|_| anyhow::anyhow!("face detector lock poisoned"))?
            .name();
        Ok(Self { backend, name })
    }

    /// Pick the named backend from a registry.
    pub fn from_registry(registry: &BackendRegistry, name: &str) -> Result<Self> {
        Self::new(registry.resolve(name)?)
    }

    pub fn backend_name(&self) -> &'static str {
        self.name
    }

    pub fn backend(&self) -> SharedDetector {
        self.backend.clone()
    }

    /// Run the backend's warm-up hook.
    pub fn warm_up(&self) -> Result<()> {
        let mut backend = self
            .backend
            .lock()
            .map_err(|_| anyhow::anyhow!("face detector lock poisoned"))?;
        backend.warm_up()
    }

    /// Detect faces in `frame`, consuming it.
    pub fn detect(&self, frame: Frame) -> Result<Detection, PipelineError> {
        let info = frame.info();
        let Some(image) = frame.image() else {
            return Err(PipelineError::FrameUnavailable);
        };

        let started = Instant::now();
        let mut backend = self
            .backend
            .lock()
            .map_err(|_| PipelineError::DetectorFailure("face detector lock poisoned".into()))?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            backend.detect(image, frame.rotation)
        }));
        drop(backend);
        let elapsed = started.elapsed();

        let entities = match outcome {
            Ok(Ok(entities)) => entities,
            Ok(Err(err)) => return Err(PipelineError::DetectorFailure(format!("{:#}", err))),
            Err(payload) => {
                return Err(PipelineError::DetectorFailure(format!(
                    "{} panicked: {}",
                    self.name,
                    panic_message(payload.as_ref())
                )))
            }
        };

        let reported = entities.len();
        let mut last_invalid = None;
        let entities: Vec<DetectedEntity> = entities
            .into_iter()
            .filter(|entity| match entity.validate() {
                Ok(()) => true,
                Err(err) => {
                    log::warn!("{}: dropping face in frame #{}: {}", self.name, info.sequence, err);
                    last_invalid = Some(err);
                    false
                }
            })
            .collect();
        let rejected = reported - entities.len();
        if entities.is_empty() {
            if let Some(err) = last_invalid {
                return Err(PipelineError::DetectorFailure(format!("{}: {}", self.name, err)));
            }
        }

        log::debug!(
            "{}: {} face(s) in frame #{} after {:?}",
            self.name,
            entities.len(),
            info.sequence,
            elapsed
        );
        Ok(Detection {
            frame: info,
            entities,
            rejected,
            elapsed,
        })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::{ScriptedDetector, ScriptedOutcome};
    use crate::detect::result::{BoundingBox, FaceAttributes, Probability};
    use crate::error::ErrorKind;
    use crate::frame::{ImageData, PixelFormat, Rotation};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn adapter(script: Vec<ScriptedOutcome>) -> DetectorAdapter {
        let backend: SharedDetector = Arc::new(Mutex::new(ScriptedDetector::with_script(script)));
        DetectorAdapter::new(backend).unwrap()
    }

    fn frame(with_image: bool, released: &Arc<AtomicUsize>) -> Frame {
        let released = released.clone();
        let image = with_image
            .then(|| ImageData::new(vec![1u8; 16], 4, 4, PixelFormat::Luma8).unwrap());
        Frame::new(image, 4, 4, Rotation::Deg0, 0, move || {
            released.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn face(smile: f32) -> DetectedEntity {
        DetectedEntity::new(
            BoundingBox::new(0, 0, 2, 2),
            FaceAttributes {
                smile: Probability::Known(smile),
                ..Default::default()
            },
        )
    }

    #[test]
    fn success_releases_frame_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let adapter = adapter(vec![ScriptedOutcome::Faces(vec![face(0.4), face(0.1)])]);
        let detection = adapter.detect(frame(true, &released)).unwrap();
        assert_eq!(detection.entities.len(), 2);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_faces_is_a_success() {
        let released = Arc::new(AtomicUsize::new(0));
        let adapter = adapter(vec![]);
        assert!(adapter.detect(frame(true, &released)).unwrap().entities.is_empty());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_image_is_frame_unavailable_and_still_released() {
        let released = Arc::new(AtomicUsize::new(0));
        let adapter = adapter(vec![ScriptedOutcome::Faces(vec![face(0.9)])]);
        let err = adapter.detect(frame(false, &released)).unwrap_err();
        assert_eq!(err, PipelineError::FrameUnavailable);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backend_error_becomes_detector_failure() {
        let released = Arc::new(AtomicUsize::new(0));
        let adapter = adapter(vec![ScriptedOutcome::Fail("model crashed".into())]);
        let err = adapter.detect(frame(true, &released)).unwrap_err();
        assert_eq!(err, PipelineError::DetectorFailure("model crashed".into()));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backend_panic_is_contained() {
        let released = Arc::new(AtomicUsize::new(0));
        let adapter = adapter(vec![
            ScriptedOutcome::Panic("tensor shape mismatch".into()),
            ScriptedOutcome::Faces(vec![face(0.5)]),
        ]);
        let err = adapter.detect(frame(true, &released)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DetectorFailure);
        assert!(err.to_string().contains("tensor shape mismatch"));
        assert_eq!(released.load(Ordering::SeqCst), 1);

        // The backend stays usable for the next frame.
        let next = adapter.detect(frame(true, &released)).unwrap();
        assert_eq!(next.entities.len(), 1);
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn invalid_face_does_not_hide_its_neighbours() {
        let released = Arc::new(AtomicUsize::new(0));
        let adapter = adapter(vec![ScriptedOutcome::Faces(vec![face(0.9), face(1.5)])]);
        let detection = adapter.detect(frame(true, &released)).unwrap();
        assert_eq!(detection.entities, vec![face(0.9)]);
        assert_eq!(detection.rejected, 1);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn only_invalid_faces_is_a_detector_failure() {
        let released = Arc::new(AtomicUsize::new(0));
        let adapter = adapter(vec![ScriptedOutcome::Faces(vec![face(1.7), face(-0.2)])]);
        let err = adapter.detect(frame(true, &released)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DetectorFailure);
        assert!(err.to_string().contains("scripted"));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
