//! The frame pipeline: gate, rate limiter, detector, derivation, publisher.
//!
//! One worker thread pulls the newest pending frame from the gate, asks the
//! rate limiter whether it may run, hands it to the detector adapter and
//! publishes what comes back. Detection is the only blocking step. The source
//! thread only ever touches the gate, so it never waits on detection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::clock::Clock;
use crate::detect::{Detection, DetectorAdapter};
use crate::emotion::{EmotionDeriver, Thresholds, UnknownPolicy};
use crate::error::PipelineError;
use crate::frame::Frame;
use crate::gate::{BackpressureGate, Submission};
use crate::geometry::{map_rect, CoordinateMapper};
use crate::ingest::FrameSource;
use crate::publish::{FaceState, Observation, Snapshot, StatePublisher};
use crate::throttle::RateLimiter;

pub const DEFAULT_DETECTION_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSettings {
    /// Minimum time between detection starts. Zero disables throttling.
    pub detection_interval: Duration,
    pub thresholds: Thresholds,
    pub unknown_policy: UnknownPolicy,
    /// Mirror mapped boxes for a front camera preview.
    pub front_facing: bool,
    pub view_width: i32,
    pub view_height: i32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            detection_interval: DEFAULT_DETECTION_INTERVAL,
            thresholds: Thresholds::default(),
            unknown_policy: UnknownPolicy::default(),
            front_facing: true,
            view_width: 1080,
            view_height: 1920,
        }
    }
}

/// Counters across the whole pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Frames handed to the gate.
    pub submitted: u64,
    /// Frames the gate released without processing.
    pub dropped: u64,
    /// Frames the gate handed to the worker.
    pub selected: u64,
    /// Selected frames the rate limiter turned away.
    pub throttled: u64,
    /// Successful detection cycles, including ones with no face.
    pub detected: u64,
    /// Frames that arrived with no image.
    pub unavailable: u64,
    /// Detection calls that failed.
    pub failed: u64,
    /// Faces left out of a snapshot for out-of-range values.
    pub rejected_faces: u64,
    pub published: u64,
}

#[derive(Default)]
struct Counters {
    throttled: AtomicU64,
    detected: AtomicU64,
    unavailable: AtomicU64,
    failed: AtomicU64,
    rejected_faces: AtomicU64,
    published: AtomicU64,
}

struct Shared {
    gate: BackpressureGate,
    publisher: Arc<StatePublisher>,
    view: Mutex<(i32, i32)>,
    counters: Counters,
}

impl Shared {
    fn view(&self) -> (i32, i32) {
        *self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A running pipeline. Dropping it shuts the worker down.
pub struct Pipeline {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    detector_name: &'static str,
}

impl Pipeline {
    /// Validate settings, warm the detector up and start the worker thread.
    pub fn start(
        settings: PipelineSettings,
        adapter: DetectorAdapter,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        settings
            .thresholds
            .validate()
            .context("invalid emotion thresholds")?;
        adapter.warm_up().with_context(|| {
            format!(
                "failed to warm up face detector {}",
                adapter.backend_name()
            )
        })?;

        let shared = Arc::new(Shared {
            gate: BackpressureGate::new(),
            publisher: Arc::new(StatePublisher::new()),
            view: Mutex::new((settings.view_width, settings.view_height)),
            counters: Counters::default(),
        });
        let detector_name = adapter.backend_name();

        let worker = Worker {
            shared: shared.clone(),
            adapter,
            clock,
            limiter: RateLimiter::new(settings.detection_interval),
            mapper: CoordinateMapper::new(settings.front_facing),
            deriver: EmotionDeriver::new(settings.thresholds, settings.unknown_policy),
        };
        let handle = std::thread::Builder::new()
            .name("sentimo-worker".into())
            .spawn(move || worker.run())
            .context("failed to spawn pipeline worker")?;

        log::info!(
            "pipeline started: detector={}, interval={:?}, smile>={}, eye_open>={}, policy={:?}",
            detector_name,
            settings.detection_interval,
            settings.thresholds.smile,
            settings.thresholds.eye_open,
            settings.unknown_policy
        );
        Ok(Self {
            shared,
            worker: Some(handle),
            detector_name,
        })
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector_name
    }

    /// Push a frame in. Never blocks on detection.
    pub fn submit(&self, frame: Frame) -> Submission {
        self.shared.gate.offer(frame)
    }

    /// A handle the source thread can submit through.
    pub fn sink(&self) -> PipelineSink {
        PipelineSink {
            shared: self.shared.clone(),
        }
    }

    pub fn publisher(&self) -> Arc<StatePublisher> {
        self.shared.publisher.clone()
    }

    pub fn observe(&self) -> Observation {
        self.shared.publisher.observe()
    }

    pub fn acknowledge_error(&self) -> Option<PipelineError> {
        self.shared.publisher.acknowledge_error()
    }

    /// Start `source`. A refusal is published and returned; nothing retries
    /// on its own, the caller has to call this again.
    pub fn connect_source(&self, source: &mut dyn FrameSource) -> Result<(), PipelineError> {
        match source.connect() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.shared.publisher.publish_error(err.clone());
                Err(err)
            }
        }
    }

    /// Change the display extent used for later mappings.
    pub fn set_view_extent(&self, width: i32, height: i32) {
        *self
            .shared
            .view
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = (width, height);
    }

    pub fn stats(&self) -> PipelineStats {
        let gate = self.shared.gate.stats();
        let counters = &self.shared.counters;
        PipelineStats {
            submitted: gate.submitted,
            dropped: gate.dropped,
            selected: gate.selected,
            throttled: counters.throttled.load(Ordering::Relaxed),
            detected: counters.detected.load(Ordering::Relaxed),
            unavailable: counters.unavailable.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            rejected_faces: counters.rejected_faces.load(Ordering::Relaxed),
            published: counters.published.load(Ordering::Relaxed),
        }
    }

    /// Wait until no frame is pending or in flight. `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.shared.gate.wait_idle(timeout)
    }

    /// Stop the pipeline.
    ///
    /// Publishing stops at once and the pending frame is released. A
    /// detection already running finishes first; its frame is released when
    /// it returns and its result is discarded.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        self.shared.publisher.close();
        self.shared.gate.close();
        if handle.join().is_err() {
            log::error!("pipeline worker panicked during shutdown");
        }
        let stats = self.stats();
        log::info!(
            "pipeline stopped: submitted={} dropped={} throttled={} detected={} failed={}",
            stats.submitted,
            stats.dropped,
            stats.throttled,
            stats.detected,
            stats.failed
        );
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cloneable submit handle, safe to move onto the source thread.
#[derive(Clone)]
pub struct PipelineSink {
    shared: Arc<Shared>,
}

impl crate::gate::FrameSink for PipelineSink {
    fn submit(&self, frame: Frame) {
        self.shared.gate.offer(frame);
    }
}

struct Worker {
    shared: Arc<Shared>,
    adapter: DetectorAdapter,
    clock: Arc<dyn Clock>,
    limiter: RateLimiter,
    mapper: CoordinateMapper,
    deriver: EmotionDeriver,
}

impl Worker {
    fn run(mut self) {
        log::debug!("pipeline worker running");
        let shared = self.shared.clone();
        while let Some((frame, _cycle)) = shared.gate.next() {
            self.process(frame);
        }
        log::debug!("pipeline worker exiting");
    }

    fn process(&mut self, frame: Frame) {
        let counters = &self.shared.counters;
        let now = self.clock.now_ms();
        if !self.limiter.should_process(now) {
            counters.throttled.fetch_add(1, Ordering::Relaxed);
            log::trace!("frame #{} throttled at {}ms", frame.sequence, now);
            return;
        }

        match self.adapter.detect(frame) {
            Ok(detection) => {
                counters.detected.fetch_add(1, Ordering::Relaxed);
                counters
                    .rejected_faces
                    .fetch_add(detection.rejected as u64, Ordering::Relaxed);
                self.publish(detection);
            }
            Err(PipelineError::FrameUnavailable) => {
                counters.unavailable.fetch_add(1, Ordering::Relaxed);
                log::debug!("frame without image skipped");
            }
            Err(err) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                self.shared.publisher.publish_error(err);
            }
        }
    }

    fn publish(&mut self, detection: Detection) {
        let info = detection.frame;
        let (view_width, view_height) = self.shared.view();
        let transform = match self.mapper.update(
            info.upright_width as i32,
            info.upright_height as i32,
            view_width,
            view_height,
        ) {
            Ok(transform) => Some(transform),
            Err(err) => {
                self.shared.publisher.publish_error(err);
                self.mapper.current()
            }
        };

        let faces = detection
            .entities
            .iter()
            .map(|entity| FaceState {
                emotion: self.deriver.derive(&entity.attributes, info.timestamp_ms),
                frame_bounds: entity.bounds,
                display_bounds: transform.map(|t| map_rect(&entity.bounds, &t)),
                tracking_id: entity.tracking_id,
            })
            .collect::<Vec<_>>();

        if let Some(face) = faces.first() {
            log::debug!(
                "frame #{}: {} face(s), primary {} ({:?})",
                info.sequence,
                faces.len(),
                face.emotion.category(),
                detection.elapsed
            );
        }
        let snapshot = Snapshot {
            frame: info,
            faces,
            transform,
        };
        if self.shared.publisher.publish(snapshot) {
            self.shared.counters.published.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::detect::{
        BoundingBox, DetectedEntity, FaceAttributes, Probability, ScriptedDetector,
        ScriptedOutcome, SharedDetector,
    };
    use crate::emotion::EmotionCategory;
    use crate::error::ErrorKind;
    use crate::frame::{ImageData, PixelFormat, Rotation};
    use std::sync::atomic::AtomicUsize;

    fn adapter(script: Vec<ScriptedOutcome>) -> DetectorAdapter {
        let backend: SharedDetector = Arc::new(Mutex::new(ScriptedDetector::with_script(script)));
        DetectorAdapter::new(backend).unwrap()
    }

    fn frame(sequence: u64, with_image: bool, released: &Arc<AtomicUsize>) -> Frame {
        let released = released.clone();
        let image = with_image
            .then(|| ImageData::new(vec![0u8; 64 * 48], 64, 48, PixelFormat::Luma8).unwrap());
        Frame::new(image, 64, 48, Rotation::Deg0, sequence * 10, move || {
            released.fetch_add(1, Ordering::SeqCst);
        })
        .with_sequence(sequence)
    }

    fn happy_face() -> DetectedEntity {
        DetectedEntity::new(
            BoundingBox::new(8, 8, 24, 24),
            FaceAttributes {
                smile: Probability::Known(0.9),
                left_eye_open: Probability::Known(0.8),
                right_eye_open: Probability::Known(0.7),
            },
        )
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            detection_interval: Duration::ZERO,
            front_facing: false,
            view_width: 32,
            view_height: 24,
            ..PipelineSettings::default()
        }
    }

    #[test]
    fn publishes_derived_state_with_display_bounds() {
        let released = Arc::new(AtomicUsize::new(0));
        let clock = Arc::new(ManualClock::new(0));
        let mut pipeline = Pipeline::start(
            settings(),
            adapter(vec![ScriptedOutcome::Faces(vec![happy_face()])]),
            clock,
        )
        .unwrap();

        pipeline.submit(frame(1, true, &released));
        assert!(pipeline.wait_idle(Duration::from_secs(5)));

        let seen = pipeline.observe();
        let snapshot = seen.snapshot.unwrap();
        let face = snapshot.primary().unwrap();
        assert_eq!(face.emotion.category(), EmotionCategory::Happy);
        assert_eq!(face.emotion.timestamp_ms(), 10);
        let rect = face.display_bounds.unwrap();
        assert_eq!((rect.left, rect.top, rect.right, rect.bottom), (4.0, 4.0, 12.0, 12.0));
        assert!(seen.error.is_none());

        pipeline.shutdown();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.stats().published, 1);
    }

    #[test]
    fn failure_is_published_and_pipeline_continues() {
        let released = Arc::new(AtomicUsize::new(0));
        let clock = Arc::new(ManualClock::new(0));
        let pipeline = Pipeline::start(
            settings(),
            adapter(vec![
                ScriptedOutcome::Fail("model not loaded".into()),
                ScriptedOutcome::Faces(vec![happy_face()]),
            ]),
            clock,
        )
        .unwrap();

        pipeline.submit(frame(1, true, &released));
        assert!(pipeline.wait_idle(Duration::from_secs(5)));
        let seen = pipeline.observe();
        assert_eq!(seen.error.unwrap().kind(), ErrorKind::DetectorFailure);
        assert!(seen.snapshot.is_none());

        assert!(pipeline.acknowledge_error().is_some());
        pipeline.submit(frame(2, true, &released));
        assert!(pipeline.wait_idle(Duration::from_secs(5)));
        let seen = pipeline.observe();
        assert!(seen.error.is_none());
        assert_eq!(seen.snapshot.unwrap().frame.sequence, 2);

        drop(pipeline);
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn out_of_range_face_is_dropped_from_the_snapshot() {
        let released = Arc::new(AtomicUsize::new(0));
        let clock = Arc::new(ManualClock::new(0));
        let mut broken = happy_face();
        broken.attributes.smile = Probability::Known(1.5);
        let pipeline = Pipeline::start(
            settings(),
            adapter(vec![ScriptedOutcome::Faces(vec![broken, happy_face()])]),
            clock,
        )
        .unwrap();

        pipeline.submit(frame(1, true, &released));
        assert!(pipeline.wait_idle(Duration::from_secs(5)));
        let seen = pipeline.observe();
        assert!(seen.error.is_none());
        let snapshot = seen.snapshot.unwrap();
        assert_eq!(snapshot.faces.len(), 1);
        assert_eq!(snapshot.faces[0].emotion.category(), EmotionCategory::Happy);

        let stats = pipeline.stats();
        assert_eq!((stats.detected, stats.failed, stats.rejected_faces), (1, 0, 1));
        drop(pipeline);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn frame_without_image_is_skipped_quietly() {
        let released = Arc::new(AtomicUsize::new(0));
        let clock = Arc::new(ManualClock::new(0));
        let pipeline = Pipeline::start(settings(), adapter(vec![]), clock).unwrap();

        pipeline.submit(frame(1, false, &released));
        assert!(pipeline.wait_idle(Duration::from_secs(5)));
        let seen = pipeline.observe();
        assert!(seen.snapshot.is_none());
        assert!(seen.error.is_none());
        assert_eq!(pipeline.stats().unavailable, 1);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn degenerate_view_reports_invalid_input_but_still_publishes() {
        let released = Arc::new(AtomicUsize::new(0));
        let clock = Arc::new(ManualClock::new(0));
        let pipeline = Pipeline::start(
            settings(),
            adapter(vec![
                ScriptedOutcome::Faces(vec![happy_face()]),
                ScriptedOutcome::Faces(vec![happy_face()]),
            ]),
            clock,
        )
        .unwrap();

        pipeline.submit(frame(1, true, &released));
        assert!(pipeline.wait_idle(Duration::from_secs(5)));
        let good = pipeline.observe().snapshot.unwrap().transform.unwrap();

        pipeline.set_view_extent(0, 24);
        pipeline.submit(frame(2, true, &released));
        assert!(pipeline.wait_idle(Duration::from_secs(5)));
        let seen = pipeline.observe();
        assert_eq!(seen.error.unwrap().kind(), ErrorKind::InvalidInput);
        let snapshot = seen.snapshot.unwrap();
        assert_eq!(snapshot.frame.sequence, 2);
        assert_eq!(snapshot.transform, Some(good));
    }

    #[test]
    fn throttled_frames_never_reach_the_detector() {
        let released = Arc::new(AtomicUsize::new(0));
        let clock = Arc::new(ManualClock::new(0));
        let backend = Arc::new(Mutex::new(ScriptedDetector::new()));
        let shared: SharedDetector = backend.clone();
        let pipeline = Pipeline::start(
            PipelineSettings {
                detection_interval: Duration::from_millis(1000),
                ..settings()
            },
            DetectorAdapter::new(shared).unwrap(),
            clock.clone(),
        )
        .unwrap();

        pipeline.submit(frame(1, true, &released));
        assert!(pipeline.wait_idle(Duration::from_secs(5)));
        clock.advance(999);
        pipeline.submit(frame(2, true, &released));
        assert!(pipeline.wait_idle(Duration::from_secs(5)));
        clock.advance(1);
        pipeline.submit(frame(3, true, &released));
        assert!(pipeline.wait_idle(Duration::from_secs(5)));

        assert_eq!(backend.lock().unwrap().calls(), 2);
        let stats = pipeline.stats();
        assert_eq!((stats.detected, stats.throttled), (2, 1));
        assert_eq!(released.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn refused_source_publishes_permission_denied() {
        use crate::ingest::{open_source, SourceConfig};

        let clock = Arc::new(ManualClock::new(0));
        let pipeline = Pipeline::start(settings(), adapter(vec![]), clock.clone()).unwrap();
        let mut source = open_source(
            SourceConfig {
                permission_granted: false,
                ..SourceConfig::default()
            },
            clock,
        )
        .unwrap();

        let err = pipeline.connect_source(source.as_mut()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert_eq!(pipeline.observe().error, Some(err));
    }

    #[test]
    fn submissions_after_shutdown_are_released() {
        let released = Arc::new(AtomicUsize::new(0));
        let clock = Arc::new(ManualClock::new(0));
        let mut pipeline = Pipeline::start(settings(), adapter(vec![]), clock).unwrap();
        pipeline.shutdown();
        assert_eq!(pipeline.submit(frame(1, true, &released)), Submission::Rejected);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
