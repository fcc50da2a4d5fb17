//! Single-slot state publisher.
//!
//! Holds the latest snapshot and the latest error. Writers replace, readers
//! copy out whatever is current. There is no history and no queue: a slow
//! consumer skips straight to the newest state. A version counter plus a
//! `Condvar` lets consumers block until something changes.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::detect::BoundingBox;
use crate::emotion::EmotionState;
use crate::error::PipelineError;
use crate::frame::FrameInfo;
use crate::geometry::{DisplayRect, ViewTransform};

/// Derived state of one detected face.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FaceState {
    pub emotion: EmotionState,
    /// Box in upright frame pixels, as reported by the detector.
    pub frame_bounds: BoundingBox,
    /// Box in view pixels; `None` until a view transform is known.
    pub display_bounds: Option<DisplayRect>,
    pub tracking_id: Option<u32>,
}

/// Everything derived from one successful detection cycle.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Snapshot {
    pub frame: FrameInfo,
    pub faces: Vec<FaceState>,
    pub transform: Option<ViewTransform>,
}

impl Snapshot {
    /// The face the overlay headlines: the first one reported.
    pub fn primary(&self) -> Option<&FaceState> {
        self.faces.first()
    }
}

/// What a consumer sees on `observe`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Observation {
    pub version: u64,
    pub snapshot: Option<Arc<Snapshot>>,
    pub error: Option<PipelineError>,
}

impl Observation {
    /// Emotion state of the primary face, if any.
    pub fn state(&self) -> Option<&EmotionState> {
        self.snapshot
            .as_deref()
            .and_then(Snapshot::primary)
            .map(|face| &face.emotion)
    }
}

#[derive(Default)]
struct Slot {
    version: u64,
    snapshot: Option<Arc<Snapshot>>,
    error: Option<PipelineError>,
    closed: bool,
}

#[derive(Default)]
pub struct StatePublisher {
    slot: Mutex<Slot>,
    updated: Condvar,
}

impl StatePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, apply: impl FnOnce(&mut Slot)) -> bool {
        {
            let mut slot = self.lock();
            if slot.closed {
                return false;
            }
            apply(&mut slot);
            slot.version += 1;
        }
        self.updated.notify_all();
        true
    }

    /// Replace the snapshot. Returns `false` once the publisher is closed.
    pub fn publish(&self, snapshot: Snapshot) -> bool {
        let snapshot = Arc::new(snapshot);
        self.write(move |slot| slot.snapshot = Some(snapshot))
    }

    /// Replace the error. The snapshot is left alone.
    pub fn publish_error(&self, error: PipelineError) -> bool {
        let message = error.to_string();
        let accepted = self.write(move |slot| slot.error = Some(error));
        if accepted {
            log::warn!("publishing pipeline error: {}", message);
        } else {
            log::debug!("publisher closed, dropping error: {}", message);
        }
        accepted
    }

    /// Clear the current error so it does not fire again.
    ///
    /// Returns the error that was cleared. Clearing still bumps the version.
    pub fn acknowledge_error(&self) -> Option<PipelineError> {
        let cleared = {
            let mut slot = self.lock();
            let cleared = slot.error.take();
            if cleared.is_some() {
                slot.version += 1;
            }
            cleared
        };
        if cleared.is_some() {
            self.updated.notify_all();
        }
        cleared
    }

    /// Clear the error of the observation at `seen`, if nothing newer has
    /// been published since.
    ///
    /// Returns the version after clearing, so a consumer can treat the
    /// clear as already seen. `None` when there was no error or the slot
    /// moved past `seen`.
    pub fn acknowledge_error_at(&self, seen: u64) -> Option<u64> {
        let version = {
            let mut slot = self.lock();
            if slot.version != seen || slot.error.is_none() {
                return None;
            }
            slot.error = None;
            slot.version += 1;
            slot.version
        };
        self.updated.notify_all();
        Some(version)
    }

    pub fn observe(&self) -> Observation {
        let slot = self.lock();
        Observation {
            version: slot.version,
            snapshot: slot.snapshot.clone(),
            error: slot.error.clone(),
        }
    }

    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// Block until the version moves past `since`, the publisher closes, or
    /// `timeout` passes. Returns the observation current at that point.
    pub fn wait_for_update(&self, since: u64, timeout: Duration) -> Observation {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        while slot.version <= since && !slot.closed {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (next, _) = self
                .updated
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            slot = next;
        }
        Observation {
            version: slot.version,
            snapshot: slot.snapshot.clone(),
            error: slot.error.clone(),
        }
    }

    /// Stop accepting publishes. The last state stays observable.
    pub fn close(&self) {
        self.lock().closed = true;
        self.updated.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
